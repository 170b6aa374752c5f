pub mod driver;
pub mod session;

// Re-export common types
pub use driver::{BrowserHandle, BrowserLauncher, ChromeLauncher};
pub use session::{Session, SessionState, StockRetry};
