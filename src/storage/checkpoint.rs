use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialize `value` as pretty JSON and replace `path` atomically.
///
/// The data goes to a sibling temp file which is synced and then renamed
/// over the target, so readers never observe a partial file.
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let encoded = serde_json::to_vec_pretty(value).context("Failed to serialize JSON")?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let temp_path = path.with_file_name(format!("{}.tmp", file_name));

    let mut file = File::create(&temp_path)
        .context(format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(&encoded)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
        .context(format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

/// Periodic snapshots of the working dataset next to the output file
pub struct CheckpointWriter {
    /// Final output path; checkpoints are named after it
    output: PathBuf,

    /// Number of checkpoint files to keep
    retention: usize,

    /// Checkpoints written by this writer
    sequence: u64,
}

impl CheckpointWriter {
    /// Create a new checkpoint writer
    pub fn new(output: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            output: output.into(),
            retention: retention.max(1),
            sequence: 0,
        }
    }

    fn prefix(&self) -> String {
        let name = self
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        format!("{}.checkpoint_", name)
    }

    fn directory(&self) -> PathBuf {
        match self.output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Write a checkpoint and prune old ones, returning the new file's path
    pub fn write<T: Serialize + ?Sized>(&mut self, dataset: &T) -> Result<PathBuf> {
        self.sequence += 1;
        let path = self.directory().join(format!(
            "{}{}_{:06}.json",
            self.prefix(),
            Utc::now().format("%Y%m%d_%H%M%S"),
            self.sequence
        ));

        write_atomic(&path, dataset)?;
        info!("Checkpoint saved to {}", path.display());

        if let Err(e) = self.prune() {
            warn!("Failed to prune old checkpoints: {}", e);
        }

        Ok(path)
    }

    /// Existing checkpoint files, oldest first
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let dir = self.directory();
        if !dir.exists() {
            return Ok(vec![]);
        }

        let prefix = self.prefix();
        let mut checkpoints = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".json"));

            if path.is_file() && is_checkpoint {
                checkpoints.push(path);
            }
        }

        // Timestamp then zero-padded sequence, so names sort chronologically
        checkpoints.sort();
        Ok(checkpoints)
    }

    /// Delete checkpoints beyond the retention count
    pub fn prune(&self) -> Result<usize> {
        let checkpoints = self.list()?;
        let excess = checkpoints.len().saturating_sub(self.retention);

        for path in &checkpoints[..excess] {
            fs::remove_file(path).context(format!("Failed to remove checkpoint: {}", path.display()))?;
            debug!("Pruned checkpoint {}", path.display());
        }

        Ok(excess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_atomic_replaces_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("out.json");

        write_atomic(&path, &json!([{"a": 1}])).unwrap();
        write_atomic(&path, &json!([{"a": 2}])).unwrap();

        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, json!([{"a": 2}]));
        assert!(!path.with_file_name("out.json.tmp").exists());
    }

    #[test]
    fn test_checkpoints_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("result.json");
        let mut writer = CheckpointWriter::new(&output, 2);

        let mut written = Vec::new();
        for i in 0..4 {
            written.push(writer.write(&json!({ "round": i })).unwrap());
        }

        let remaining = writer.list().unwrap();
        assert_eq!(remaining, written[2..].to_vec());

        let last: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&remaining[1]).unwrap()).unwrap();
        assert_eq!(last, json!({ "round": 3 }));
    }
}
