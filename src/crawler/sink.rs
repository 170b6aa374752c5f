use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cli::config::StorageSettings;
use crate::crawler::scheduler::{Decision, Scheduler};
use crate::crawler::task::{Task, TaskOutcome};
use crate::storage::cache::ResultCache;
use crate::storage::checkpoint::CheckpointWriter;
use crate::storage::dataset::Dataset;
use crate::storage::visited::{VisitOutcome, VisitedLog};

/// Where task outcomes land.
///
/// Every store sits behind its own mutex and is only ever updated one key at
/// a time. Locks are taken in the order dataset, cache, visited log.
pub struct ResultSink {
    dataset: Mutex<Dataset>,
    cache: Mutex<ResultCache>,
    visited: Mutex<VisitedLog>,
    checkpoints: Mutex<CheckpointWriter>,
    scheduler: Scheduler,
    output: PathBuf,
    checkpoint_interval: usize,
    recorded: AtomicUsize,
}

impl ResultSink {
    /// Create a new sink writing `dataset` to `output`
    pub fn new(dataset: Dataset, output: impl Into<PathBuf>, settings: &StorageSettings) -> Result<Self> {
        let output = output.into();
        let cache = ResultCache::load(settings.cache_path());
        let visited = VisitedLog::open(settings.visited_path())?;

        Ok(Self {
            dataset: Mutex::new(dataset),
            cache: Mutex::new(cache),
            visited: Mutex::new(visited),
            checkpoints: Mutex::new(CheckpointWriter::new(&output, settings.checkpoint_retention)),
            scheduler: Scheduler::new(settings),
            output,
            checkpoint_interval: settings.checkpoint_interval,
            recorded: AtomicUsize::new(0),
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Terminal outcomes recorded so far
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Consult the cache and visited log for `key`
    pub async fn decide(&self, key: &str) -> Decision {
        let cache = self.cache.lock().await;
        let visited = self.visited.lock().await;
        self.scheduler.decide(key, &cache, &visited)
    }

    /// Record a terminal outcome, checkpointing every `checkpoint_interval` outcomes
    pub async fn record(&self, task: &Task, outcome: &TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Extracted(snapshot) => {
                self.dataset.lock().await.apply(task, snapshot)?;
                if self.scheduler.cache_enabled() {
                    self.cache.lock().await.insert(&task.key, snapshot.clone());
                }
                self.visited.lock().await.append(&task.key, VisitOutcome::Ok)?;
            }
            TaskOutcome::Cached(snapshot) => {
                self.dataset.lock().await.apply(task, snapshot)?;
            }
            TaskOutcome::SkippedVisited => {}
            TaskOutcome::Failed { .. } => {
                self.visited.lock().await.append(&task.key, VisitOutcome::Failed)?;
            }
        }

        let recorded = self.recorded.fetch_add(1, Ordering::SeqCst) + 1;
        if self.checkpoint_interval > 0 && recorded % self.checkpoint_interval == 0 {
            debug!("{} outcomes recorded, writing checkpoint", recorded);
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Write a checkpoint snapshot and persist the cache
    pub async fn checkpoint(&self) -> Result<PathBuf> {
        let path = {
            let dataset = self.dataset.lock().await;
            self.checkpoints.lock().await.write(dataset.value())?
        };

        self.save_cache().await?;
        Ok(path)
    }

    async fn save_cache(&self) -> Result<()> {
        if self.scheduler.cache_enabled() {
            self.cache.lock().await.save()?;
        }
        Ok(())
    }

    /// Write the final output and persist the cache
    pub async fn finish(&self) -> Result<()> {
        self.dataset.lock().await.save(&self.output)?;
        self.save_cache().await?;
        info!("Output written: {}", self.output.display());
        Ok(())
    }

    /// Copy of the working dataset
    pub async fn dataset(&self) -> Dataset {
        self.dataset.lock().await.clone()
    }
}
