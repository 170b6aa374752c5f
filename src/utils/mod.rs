pub mod logging;
pub mod status;

// Re-export common functions and types
pub use logging::{init_logging, default_log_file};
pub use status::{RunStatus, StatusStore};
