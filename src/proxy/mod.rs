pub mod manager;

// Re-export common types
pub use manager::{proxy_url, ProxyRotator};
