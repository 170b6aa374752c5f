pub mod classifier;
pub mod controller;

// Re-export common types
pub use classifier::{classify, classify_error, Fault, FaultSet};
pub use controller::{decide, AttemptState, FailureTracker, RecoveryAction, RecoveryPolicy};
