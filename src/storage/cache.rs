use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::crawler::task::Snapshot;
use crate::storage::checkpoint::write_atomic;

/// Latest snapshot stored for one normalized URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub normalized_url: String,
    pub snapshot: Snapshot,
    pub timestamp: DateTime<Utc>,
}

/// Durable map from normalized URL to its latest extraction snapshot
pub struct ResultCache {
    /// Backing JSON file
    path: PathBuf,

    entries: BTreeMap<String, CacheEntry>,

    /// Inserts since the last save
    dirty: usize,
}

impl ResultCache {
    /// Load the cache file, starting empty if it is missing or unreadable
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = if path.exists() {
            match Self::read_entries(&path) {
                Ok(entries) => {
                    info!("Loaded {} cached results from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring unreadable cache {}: {:#}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            debug!("No cache file at {}, starting empty", path.display());
            BTreeMap::new()
        };

        Self {
            path,
            entries,
            dirty: 0,
        }
    }

    fn read_entries(path: &Path) -> Result<BTreeMap<String, CacheEntry>> {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read cache file: {}", path.display()))?;
        let entries = serde_json::from_str(&contents)
            .context(format!("Failed to parse cache file: {}", path.display()))?;
        Ok(entries)
    }

    /// Look up a normalized URL
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store the latest snapshot for a normalized URL
    pub fn insert(&mut self, key: &str, snapshot: Snapshot) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                normalized_url: key.to_string(),
                snapshot,
                timestamp: Utc::now(),
            },
        );
        self.dirty += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of inserts not yet saved
    pub fn pending_writes(&self) -> usize {
        self.dirty
    }

    /// Persist the cache atomically
    pub fn save(&mut self) -> Result<()> {
        write_atomic(&self.path, &self.entries)?;
        debug!("Saved {} cache entries to {}", self.entries.len(), self.path.display());
        self.dirty = 0;
        Ok(())
    }
}
