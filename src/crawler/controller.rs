use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::browser::driver::{BrowserLauncher, ChromeLauncher};
use crate::cli::config::HarvestConfig;
use crate::crawler::extractor::{Extractor, SelectorExtractor};
use crate::crawler::pool::{RunSummary, SessionPool};
use crate::crawler::sink::ResultSink;
use crate::crawler::task::{ShardInfo, Task};
use crate::planner::shard::shard_range;
use crate::storage::dataset::Dataset;
use crate::utils::status::{RunStatus, StatusStore};

/// Parameters of one run, as accepted from a supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub input_path: PathBuf,

    /// Defaults to a timestamped file next to the input
    pub output_path: Option<PathBuf>,

    /// First record of the input to consider
    #[serde(default)]
    pub start_index: usize,

    /// Number of records to consider from `start_index`
    pub max_entries: Option<usize>,

    /// Only process this shard's slice of the discovered tasks
    pub shard: Option<ShardInfo>,
}

impl RunRequest {
    /// Create a new request for a whole input file
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: None,
            start_index: 0,
            max_entries: None,
            shard: None,
        }
    }
}

/// `<input stem>_<site>_<timestamp>.json` in the input's directory
pub fn default_output_path(input: &Path, site: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = format!("{}_{}_{}.json", stem, site, chrono::Local::now().format("%Y%m%d_%H%M%S"));
    input.with_file_name(name)
}

/// Discover the tasks of a request, narrowed to its shard
pub fn select_tasks(dataset: &Dataset, identifier: &str, request: &RunRequest) -> Result<Vec<Task>> {
    let mut tasks = dataset.discover_tasks(identifier, request.start_index, request.max_entries);

    if let Some(shard) = request.shard {
        let range = shard_range(tasks.len(), shard.index, shard.total)?;
        info!(
            "Shard {}/{} takes tasks {}..{} of {}",
            shard.index + 1,
            shard.total,
            range.start,
            range.end,
            tasks.len()
        );
        tasks = tasks.drain(range).collect();
        for task in &mut tasks {
            task.shard = Some(shard);
        }
    }

    Ok(tasks)
}

/// Starts, stops and reports on runs
pub struct RunController {
    config: HarvestConfig,
    launcher: Arc<dyn BrowserLauncher>,
    extractor: Arc<dyn Extractor>,
    status: StatusStore,
    stop: Mutex<Option<Arc<AtomicBool>>>,
    handle: Mutex<Option<JoinHandle<Result<RunSummary>>>>,
}

impl RunController {
    /// Create a new run controller
    pub fn new(config: HarvestConfig, launcher: Arc<dyn BrowserLauncher>, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            config,
            launcher,
            extractor,
            status: StatusStore::new(),
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Controller driving Chrome with the configured site profile
    pub fn with_chrome(config: HarvestConfig) -> Self {
        let launcher = Arc::new(ChromeLauncher::new(config.browser.clone()));
        let extractor = Arc::new(
            SelectorExtractor::new(config.site.clone()).with_navigation_timeout(config.browser.command_timeout()),
        );
        Self::new(config, launcher, extractor)
    }

    /// Spawn a run in the background, returning its output path
    pub async fn start(&self, request: RunRequest) -> Result<PathBuf> {
        let mut handle = self.handle.lock().await;
        if self.status.is_running().await {
            anyhow::bail!("A run is already in progress");
        }

        let output = request
            .output_path
            .clone()
            .unwrap_or_else(|| default_output_path(&request.input_path, &self.config.site.name));
        self.status.begin(output.clone()).await;

        let stop = Arc::new(AtomicBool::new(false));
        *self.stop.lock().await = Some(stop.clone());

        let job = RunJob {
            config: self.config.clone(),
            launcher: self.launcher.clone(),
            extractor: self.extractor.clone(),
            status: self.status.clone(),
            stop,
            request,
            output: output.clone(),
        };
        *handle = Some(tokio::spawn(job.run()));

        info!("Run started, writing to {}", output.display());
        Ok(output)
    }

    /// Ask the running workers to stop after their current task
    pub async fn stop(&self) -> Result<()> {
        if !self.status.is_running().await {
            anyhow::bail!("No run is currently in progress");
        }

        if let Some(stop) = self.stop.lock().await.as_ref() {
            stop.store(true, Ordering::SeqCst);
            info!("Stop requested");
        }
        Ok(())
    }

    pub async fn status(&self) -> RunStatus {
        self.status.get().await
    }

    /// Wait for the current run to end
    pub async fn wait(&self) -> Result<RunSummary> {
        let handle = self
            .handle
            .lock()
            .await
            .take()
            .context("No run has been started")?;
        handle.await.context("Run task panicked")?
    }

    /// Start a run and wait for it
    pub async fn run(&self, request: RunRequest) -> Result<RunSummary> {
        self.start(request).await?;
        self.wait().await
    }
}

/// Everything a background run owns
struct RunJob {
    config: HarvestConfig,
    launcher: Arc<dyn BrowserLauncher>,
    extractor: Arc<dyn Extractor>,
    status: StatusStore,
    stop: Arc<AtomicBool>,
    request: RunRequest,
    output: PathBuf,
}

impl RunJob {
    async fn run(self) -> Result<RunSummary> {
        let status = self.status.clone();
        let stop = self.stop.clone();

        let result = self.execute().await;
        match &result {
            Ok(summary) if stop.load(Ordering::SeqCst) => {
                warn!("Run stopped with {} tasks pending", summary.pending);
                status.finish(Some("Stopped by user request".to_string())).await;
            }
            Ok(summary) => {
                info!(
                    "Run finished: {} extracted, {} cached, {} skipped, {} failed",
                    summary.succeeded, summary.cached, summary.skipped, summary.failed
                );
                status.finish(None).await;
            }
            Err(e) => {
                error!("Run failed: {:#}", e);
                status.finish(Some(format!("{:#}", e))).await;
            }
        }
        result
    }

    async fn execute(self) -> Result<RunSummary> {
        let dataset = Dataset::load(&self.request.input_path)?;
        let tasks = select_tasks(&dataset, &self.config.site.link_identifier, &self.request)?;
        self.status.set_total(tasks.len()).await;
        info!("{} unique URLs to process", tasks.len());

        let sink = Arc::new(ResultSink::new(dataset, &self.output, &self.config.storage)?);
        let pool = SessionPool::new(
            &self.config,
            self.launcher.clone(),
            self.extractor.clone(),
            sink.clone(),
            self.status.clone(),
        )
        .with_stop_flag(self.stop.clone());

        if self.config.proxy.enabled && self.config.proxy.probe_on_start {
            let healthy = pool
                .probe_proxies(
                    &self.config.proxy.probe_url,
                    Duration::from_secs(self.config.proxy.probe_timeout_secs),
                )
                .await?;
            if healthy == 0 {
                warn!("No proxy passed the health probe, running without proxies");
            }
        }

        let summary = pool.run(tasks).await?;
        sink.finish().await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{BrowserHandle, MockBrowserLauncher};
    use crate::crawler::extractor::PageState;
    use crate::offers::RawOffer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::fs;

    struct FakeBrowser;

    #[async_trait]
    impl BrowserHandle for FakeBrowser {
        async fn goto(&mut self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn page_source(&mut self) -> Result<String> {
            Ok(String::new())
        }

        async fn current_url(&mut self) -> Result<String> {
            Ok(String::new())
        }

        async fn click(&mut self, _selector: &str) -> Result<bool> {
            Ok(false)
        }

        async fn quit(&mut self) {}
    }

    struct SoldOutExtractor;

    #[async_trait]
    impl Extractor for SoldOutExtractor {
        async fn fetch(&self, _browser: &mut dyn BrowserHandle, url: &str) -> Result<PageState> {
            Ok(PageState::new(url, url, ""))
        }

        fn find_price_markers(&self, _page: &PageState) -> Option<f64> {
            Some(5000.0)
        }

        fn find_availability_markers(&self, _page: &PageState) -> bool {
            true
        }

        fn find_offer_blocks(&self, _page: &PageState) -> Vec<RawOffer> {
            vec![
                RawOffer::new("Bank Offer", "₹1000 off on SBI Credit Cards on orders of ₹6000 and above"),
                RawOffer::new("Partner Offer", "Get GST invoice on business purchases"),
            ]
        }
    }

    fn records() -> serde_json::Value {
        json!([
            { "model": "A", "store_links": [{ "name": "Shop", "url": "https://shop.example/p/1" }] },
            { "model": "B", "store_links": [{ "name": "Shop", "url": "https://shop.example/p/2" }] },
            { "model": "C", "store_links": [{ "name": "Shop", "url": "https://shop.example/p/3" }] },
            { "model": "D", "store_links": [{ "name": "Other", "url": "https://other.example/p/4" }] }
        ])
    }

    fn controller(dir: &Path, launches: usize) -> RunController {
        let mut config = HarvestConfig::default();
        config.site.name = "shop".to_string();
        config.site.link_identifier = "shop".to_string();
        config.pool.workers = 1;
        config.pool.task_delay_ms = (0, 0);
        config.storage.data_dir = dir.to_path_buf();

        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .times(launches)
            .returning(|_| Ok(Box::new(FakeBrowser)));
        RunController::new(config, Arc::new(launcher), Arc::new(SoldOutExtractor))
    }

    #[test]
    fn test_select_tasks_by_shard() {
        let dataset = Dataset::from_value(records()).unwrap();
        let mut request = RunRequest::new("all_data.json");

        assert_eq!(select_tasks(&dataset, "shop", &request).unwrap().len(), 3);

        request.shard = Some(ShardInfo { index: 1, total: 2 });
        let tasks = select_tasks(&dataset, "shop", &request).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].url, "https://shop.example/p/3");
        assert_eq!(tasks[0].shard, Some(ShardInfo { index: 1, total: 2 }));

        request.shard = Some(ShardInfo { index: 2, total: 2 });
        assert!(select_tasks(&dataset, "shop", &request).is_err());
    }

    #[test]
    fn test_default_output_path() {
        let path = default_output_path(Path::new("/data/all_data.json"), "shop");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("all_data_shop_"));
        assert!(name.ends_with(".json"));
        assert_eq!(path.parent().unwrap(), Path::new("/data"));
    }

    #[tokio::test]
    async fn test_run_writes_output_and_status() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("all_data.json");
        fs::write(&input, records().to_string()).unwrap();
        let output = tmp.path().join("result.json");

        let controller = controller(tmp.path(), 1);
        let mut request = RunRequest::new(&input);
        request.output_path = Some(output.clone());
        request.start_index = 1;
        request.max_entries = Some(2);

        let summary = controller.run(request).await.unwrap();
        assert_eq!(summary.succeeded, 2);

        let status = controller.status().await;
        assert!(!status.is_running);
        assert!(status.completed);
        assert_eq!(status.total, 2);
        assert_eq!(status.progress, 2);
        assert_eq!(status.output_file.as_deref(), Some(output.as_path()));

        let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert!(written[0]["store_links"][0].get("price").is_none());
        let link = &written[1]["store_links"][0];
        assert_eq!(link["price"], json!(5000.0));
        // Sold-out marker wins over the offers found on the page
        assert_eq!(link["in_stock"], json!(false));
        assert_eq!(link["ranked_offers"][0]["rank"], json!(1));
        assert_eq!(link["ranked_offers"][0]["is_applicable"], json!(false));
        assert_eq!(link["ranked_offers"][0]["net_effective_price"], json!(5000.0));
        assert_eq!(written[3]["store_links"][0].get("price"), None);
    }

    #[tokio::test]
    async fn test_stop_without_run_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let controller = controller(tmp.path(), 0);
        assert!(controller.stop().await.is_err());
        assert!(controller.wait().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_input_reports_error() {
        let tmp = tempfile::tempdir().unwrap();
        let controller = controller(tmp.path(), 0);
        let request = RunRequest::new(tmp.path().join("missing.json"));

        assert!(controller.run(request).await.is_err());
        let status = controller.status().await;
        assert!(!status.is_running);
        assert!(!status.completed);
        assert!(status.error.unwrap().contains("Failed to read dataset"));
    }
}
