use tracing::debug;

use crate::cli::config::StorageSettings;
use crate::crawler::task::Snapshot;
use crate::storage::cache::ResultCache;
use crate::storage::visited::VisitedLog;

/// What to do with a task before any browser work
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Run the extractor
    Execute,
    /// Reuse the stored snapshot
    UseCached(Snapshot),
    /// Already done in an earlier run
    SkipVisited,
}

/// Decides whether a normalized URL needs extraction
#[derive(Debug, Clone)]
pub struct Scheduler {
    cache_enabled: bool,
    skip_visited: bool,
    force_rescan: bool,
}

impl Scheduler {
    /// Create a new scheduler from storage settings
    pub fn new(settings: &StorageSettings) -> Self {
        Self {
            cache_enabled: settings.cache_enabled,
            skip_visited: settings.skip_visited,
            force_rescan: settings.force_rescan,
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Decide for `key`: cache first, then the visited log.
    ///
    /// Force-rescan always executes.
    pub fn decide(&self, key: &str, cache: &ResultCache, visited: &VisitedLog) -> Decision {
        if self.force_rescan {
            return Decision::Execute;
        }

        if self.cache_enabled {
            if let Some(entry) = cache.get(key) {
                debug!("Cache hit: {}", key);
                return Decision::UseCached(entry.snapshot.clone());
            }
        }

        if self.skip_visited && visited.contains_ok(key) {
            debug!("Skipping visited URL: {}", key);
            return Decision::SkipVisited;
        }

        Decision::Execute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::visited::VisitOutcome;

    fn snapshot(price: f64) -> Snapshot {
        Snapshot {
            price: Some(price),
            in_stock: Some(true),
            ranked_offers: vec![],
            platform_url: None,
            product_name_via_url: None,
            with_exchange_price: None,
        }
    }

    #[test]
    fn test_cache_then_visited_then_execute() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ResultCache::load(tmp.path().join("cache.json"));
        let mut visited = VisitedLog::open(tmp.path().join("visited.txt")).unwrap();

        cache.insert("https://a.example/1", snapshot(10.0));
        visited.append("https://a.example/1", VisitOutcome::Ok).unwrap();
        visited.append("https://a.example/2", VisitOutcome::Ok).unwrap();
        visited.append("https://a.example/3", VisitOutcome::Failed).unwrap();

        let scheduler = Scheduler::new(&StorageSettings::default());
        assert_eq!(
            scheduler.decide("https://a.example/1", &cache, &visited),
            Decision::UseCached(snapshot(10.0))
        );
        assert_eq!(scheduler.decide("https://a.example/2", &cache, &visited), Decision::SkipVisited);
        assert_eq!(scheduler.decide("https://a.example/3", &cache, &visited), Decision::Execute);
        assert_eq!(scheduler.decide("https://a.example/4", &cache, &visited), Decision::Execute);
    }

    #[test]
    fn test_force_rescan_and_disabled_layers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ResultCache::load(tmp.path().join("cache.json"));
        let mut visited = VisitedLog::open(tmp.path().join("visited.txt")).unwrap();
        cache.insert("https://a.example/1", snapshot(10.0));
        visited.append("https://a.example/1", VisitOutcome::Ok).unwrap();

        let forced = Scheduler::new(&StorageSettings {
            force_rescan: true,
            ..Default::default()
        });
        assert_eq!(forced.decide("https://a.example/1", &cache, &visited), Decision::Execute);

        let no_cache = Scheduler::new(&StorageSettings {
            cache_enabled: false,
            ..Default::default()
        });
        assert_eq!(no_cache.decide("https://a.example/1", &cache, &visited), Decision::SkipVisited);

        let nothing = Scheduler::new(&StorageSettings {
            cache_enabled: false,
            skip_visited: false,
            ..Default::default()
        });
        assert_eq!(nothing.decide("https://a.example/1", &cache, &visited), Decision::Execute);
    }
}
