use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cli::config::RecoverySettings;
use crate::recovery::classifier::{Fault, FaultSet};

/// Response to a classified task failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Tear down the browser handle, launch a new one and retry
    RecreateSession,
    /// Release the handle, wait, relaunch and retry
    CleanupAndBackoff { delay: Duration },
    /// Move to the next proxy (or direct) and retry after a short wait
    RotateProxy { delay: Duration },
    /// Halt the pool and force a checkpoint
    PauseAndCheckpoint,
    /// Give up on the task
    Fail,
}

/// Thresholds driving recovery decisions
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Total execution attempts per task
    pub max_attempts: u32,
    /// Session recreations allowed per task
    pub max_session_recreations: u32,
    /// Consecutive pool-wide failures before escalating
    pub escalate_after: u32,
    pub resource_backoff: Duration,
    pub proxy_backoff: Duration,
}

impl From<&RecoverySettings> for RecoveryPolicy {
    fn from(settings: &RecoverySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            max_session_recreations: settings.max_session_recreations,
            escalate_after: settings.escalate_after_consecutive.max(1),
            resource_backoff: Duration::from_millis(settings.resource_backoff_ms),
            proxy_backoff: Duration::from_millis(settings.proxy_backoff_ms),
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from(&RecoverySettings::default())
    }
}

/// Where a task stands when it fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptState {
    /// Attempts made so far, including the one that just failed
    pub attempt: u32,
    /// Session recreations already spent on this task
    pub session_recreations: u32,
    /// Pool-wide consecutive failures, including this one
    pub consecutive_failures: u32,
}

/// Map a fault set to a recovery action.
///
/// Pure and deterministic. Precedence:
/// 1. unclassified failures, or `escalate_after` consecutive failures, pause the pool
/// 2. an exhausted attempt budget fails the task
/// 3. resource exhaustion cleans up and backs off
/// 4. session faults recreate the session while recreations remain
/// 5. network faults and rate limiting rotate the proxy
pub fn decide(faults: FaultSet, state: AttemptState, policy: &RecoveryPolicy) -> RecoveryAction {
    if faults.is_empty() || state.consecutive_failures >= policy.escalate_after {
        return RecoveryAction::PauseAndCheckpoint;
    }

    if state.attempt >= policy.max_attempts {
        return RecoveryAction::Fail;
    }

    if faults.contains(Fault::ResourceExhaustion) {
        return RecoveryAction::CleanupAndBackoff {
            delay: policy.resource_backoff,
        };
    }

    if faults.contains(Fault::SessionFault) {
        return if state.session_recreations < policy.max_session_recreations {
            RecoveryAction::RecreateSession
        } else {
            RecoveryAction::Fail
        };
    }

    RecoveryAction::RotateProxy {
        delay: policy.proxy_backoff,
    }
}

/// Pool-wide run of consecutive failures
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: u32,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the new streak length
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive += 1;
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}
