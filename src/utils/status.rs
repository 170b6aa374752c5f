use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Run status as reported to a supervisor
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunStatus {
    pub is_running: bool,

    /// Tasks that reached a terminal outcome
    pub progress: usize,

    /// Tasks discovered for this run
    pub total: usize,

    pub current_url: String,

    /// The run finished without error
    pub completed: bool,

    /// Last error seen, kept after the run ends
    pub error: Option<String>,

    /// The pool halted on an escalation
    pub paused: bool,

    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_file: Option<PathBuf>,
}

/// Shared, mutex-guarded run status
#[derive(Debug, Clone, Default)]
pub struct StatusStore {
    status: Arc<Mutex<RunStatus>>,
}

impl StatusStore {
    /// Create a new status store
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new run
    pub async fn begin(&self, output_file: PathBuf) {
        let mut status = self.status.lock().await;
        *status = RunStatus {
            is_running: true,
            start_time: Some(Utc::now()),
            output_file: Some(output_file),
            ..Default::default()
        };
    }

    pub async fn set_total(&self, total: usize) {
        self.status.lock().await.total = total;
    }

    pub async fn set_current_url(&self, url: &str) {
        self.status.lock().await.current_url = url.to_string();
    }

    /// Count one terminal task outcome
    pub async fn record_progress(&self) {
        self.status.lock().await.progress += 1;
    }

    pub async fn set_error(&self, error: impl Into<String>) {
        self.status.lock().await.error = Some(error.into());
    }

    pub async fn set_paused(&self) {
        self.status.lock().await.paused = true;
    }

    /// Close the run, successfully or with an error
    pub async fn finish(&self, error: Option<String>) {
        let mut status = self.status.lock().await;
        status.is_running = false;
        status.completed = error.is_none() && !status.paused;
        status.current_url.clear();
        if error.is_some() {
            status.error = error;
        }
        status.end_time = Some(Utc::now());
    }

    /// Get a copy of the current status
    pub async fn get(&self) -> RunStatus {
        self.status.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.status.lock().await.is_running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = StatusStore::new();
        store.begin(PathBuf::from("out.json")).await;
        store.set_total(3).await;
        store.set_current_url("https://shop.example/p/1").await;
        store.record_progress().await;
        store.set_error("timeout after 30s while navigating").await;

        let status = store.get().await;
        assert!(status.is_running);
        assert_eq!(status.progress, 1);
        assert_eq!(status.total, 3);
        assert!(status.start_time.is_some());

        store.finish(None).await;
        let status = store.get().await;
        assert!(!status.is_running);
        assert!(status.completed);
        assert!(status.current_url.is_empty());
        // The last error stays visible after a successful finish
        assert_eq!(status.error.as_deref(), Some("timeout after 30s while navigating"));
        assert!(status.end_time.is_some());
    }

    #[tokio::test]
    async fn test_paused_or_failed_run_is_not_completed() {
        let store = StatusStore::new();
        store.begin(PathBuf::from("out.json")).await;
        store.set_paused().await;
        store.finish(None).await;
        assert!(!store.get().await.completed);

        store.begin(PathBuf::from("out.json")).await;
        assert!(!store.get().await.paused);
        store.finish(Some("Stopped by user request".to_string())).await;
        let status = store.get().await;
        assert!(!status.completed);
        assert_eq!(status.error.as_deref(), Some("Stopped by user request"));
    }
}
