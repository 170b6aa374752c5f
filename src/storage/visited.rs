use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADER: &str = "# visited urls: <normalized url>\t<ok|failed>";

/// Outcome recorded for a visited URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitOutcome {
    Ok,
    Failed,
}

impl VisitOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            VisitOutcome::Ok => "ok",
            VisitOutcome::Failed => "failed",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "ok" => Some(VisitOutcome::Ok),
            "failed" => Some(VisitOutcome::Failed),
            _ => None,
        }
    }
}

/// Append-only, write-once log of (url, outcome) pairs
pub struct VisitedLog {
    path: PathBuf,
    recorded: HashSet<(String, VisitOutcome)>,
}

impl VisitedLog {
    /// Open the log, creating it with a header line if it does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let recorded = if path.exists() {
            Self::read(&path)?
        } else {
            let mut file = File::create(&path)
                .context(format!("Failed to create visited log: {}", path.display()))?;
            writeln!(file, "{}", HEADER)?;
            HashSet::new()
        };

        info!("Visited log {} holds {} entries", path.display(), recorded.len());
        Ok(Self { path, recorded })
    }

    fn read(path: &Path) -> Result<HashSet<(String, VisitOutcome)>> {
        let file = File::open(path).context(format!("Failed to open visited log: {}", path.display()))?;
        let mut recorded = HashSet::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Bare URL lines count as successful visits
            let (url, outcome) = match line.split_once('\t') {
                Some((url, outcome)) => match VisitOutcome::parse(outcome) {
                    Some(outcome) => (url, outcome),
                    None => continue,
                },
                None => (line, VisitOutcome::Ok),
            };
            recorded.insert((url.to_string(), outcome));
        }

        Ok(recorded)
    }

    /// Whether `key` has a successful visit on record
    pub fn contains_ok(&self, key: &str) -> bool {
        self.recorded.contains(&(key.to_string(), VisitOutcome::Ok))
    }

    /// Record an outcome; a pair already on record is not written again
    pub fn append(&mut self, key: &str, outcome: VisitOutcome) -> Result<bool> {
        let entry = (key.to_string(), outcome);
        if self.recorded.contains(&entry) {
            return Ok(false);
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .context(format!("Failed to open visited log: {}", self.path.display()))?;
        writeln!(file, "{}\t{}", key, outcome.as_str())?;

        debug!("Visited {} ({})", key, outcome.as_str());
        self.recorded.insert(entry);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}
