use std::time::Duration;
use thiserror::Error;

/// Failures raised by the browser and extraction layer.
///
/// The fault classifier keys on the variant and on driver text; the URL a
/// variant carries is for logs only.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Navigation or page operation exceeded its upper bound
    #[error("timeout after {elapsed:?} while {operation}")]
    Timeout { operation: String, elapsed: Duration },

    /// None of the expected page markers appeared in time
    #[error("page marker wait timed out after {elapsed:?} on {url}")]
    MarkerTimeout { url: String, elapsed: Duration },

    /// An anti-bot interstitial could not be dismissed
    #[error("anti-bot challenge detected on {url}")]
    Challenge { url: String },

    /// The session has no live browser handle
    #[error("webdriver session not active (state: {state})")]
    SessionNotActive { state: String },

    /// Launching a browser handle failed
    #[error("session not created: {0}")]
    Launch(String),

    /// Raw driver failure text
    #[error("browser error: {0}")]
    Browser(String),
}
