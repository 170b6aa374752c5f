use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::driver::{BrowserHandle, BrowserLauncher};
use crate::cli::config::ProxyConfig;
use crate::crawler::extractor::Extractor;
use crate::crawler::task::{determine_stock, PageObservation, StockState};
use crate::error::HarvestError;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No browser launched yet
    Created,
    /// Browser up and usable
    Active,
    /// Browser failed and must be recreated before use
    Invalid,
    /// Shut down for good
    Retired,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Active => "active",
            SessionState::Invalid => "invalid",
            SessionState::Retired => "retired",
        };
        write!(f, "{}", name)
    }
}

/// Re-fetch policy when stock cannot be determined
#[derive(Debug, Clone, Copy)]
pub struct StockRetry {
    /// Extra page loads after the first one
    pub retries: u32,
    pub delay: Duration,
}

impl Default for StockRetry {
    fn default() -> Self {
        Self {
            retries: 2,
            delay: Duration::from_secs(2),
        }
    }
}

/// One worker's browser, never shared with another worker
pub struct Session {
    pub id: Uuid,
    launcher: Arc<dyn BrowserLauncher>,
    handle: Option<Box<dyn BrowserHandle>>,
    state: SessionState,
    completed_tasks: u32,
    max_tasks_before_renewal: u32,
    renewals: u32,
    proxy: Option<ProxyConfig>,
}

impl Session {
    /// Create a new session; no browser is launched until `start`
    pub fn new(launcher: Arc<dyn BrowserLauncher>, max_tasks_before_renewal: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            launcher,
            handle: None,
            state: SessionState::Created,
            completed_tasks: 0,
            max_tasks_before_renewal,
            renewals: 0,
            proxy: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn completed_tasks(&self) -> u32 {
        self.completed_tasks
    }

    pub fn renewals(&self) -> u32 {
        self.renewals
    }

    /// Proxy the current browser routes through
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    async fn launch(&mut self, proxy: Option<ProxyConfig>) -> Result<()> {
        match self.launcher.launch(proxy.clone()).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.proxy = proxy;
                self.state = SessionState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Invalid;
                Err(e).context(format!("Session {} failed to launch a browser", self.id))
            }
        }
    }

    /// Launch the browser
    pub async fn start(&mut self, proxy: Option<ProxyConfig>) -> Result<()> {
        if self.state == SessionState::Retired {
            anyhow::bail!("Session {} is retired", self.id);
        }

        self.launch(proxy).await?;
        debug!("Session {} started", self.id);
        Ok(())
    }

    /// Load `url` and read it with `extractor`.
    ///
    /// An undetermined stock state triggers up to `stock.retries` further
    /// page loads before `Unknown` is accepted.
    pub async fn execute(&mut self, url: &str, extractor: &dyn Extractor, stock: StockRetry) -> Result<PageObservation> {
        if self.state != SessionState::Active {
            return Err(HarvestError::SessionNotActive {
                state: self.state.to_string(),
            }
            .into());
        }
        let handle = self.handle.as_deref_mut().ok_or_else(|| HarvestError::SessionNotActive {
            state: "no browser".to_string(),
        })?;

        let mut attempt = 0;
        loop {
            let page = extractor.fetch(handle, url).await?;

            let price = extractor.find_price_markers(&page);
            let sold_out = extractor.find_availability_markers(&page);
            let raw_offers = extractor.find_offer_blocks(&page);
            let state = determine_stock(sold_out, raw_offers.len());

            if state != StockState::Unknown || attempt >= stock.retries {
                debug!("{} -> {:?}, {} offers, price {:?}", url, state, raw_offers.len(), price);
                return Ok(PageObservation {
                    final_url: page.final_url.clone(),
                    price,
                    stock: state,
                    raw_offers,
                    product_name: extractor.find_product_name(&page),
                    exchange_price: extractor.find_exchange_price(&page),
                });
            }

            attempt += 1;
            debug!("Stock unknown for {}, reloading ({}/{})", url, attempt, stock.retries);
            tokio::time::sleep(stock.delay).await;
        }
    }

    /// Flag the browser as unusable after a failure
    pub fn mark_invalid(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Invalid;
        }
    }

    /// Close the browser without launching another
    pub async fn teardown(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.quit().await;
        }
        if self.state != SessionState::Retired {
            self.state = SessionState::Invalid;
        }
    }

    /// Replace the browser, optionally moving to another proxy
    pub async fn recreate(&mut self, proxy: Option<ProxyConfig>) -> Result<()> {
        if self.state == SessionState::Retired {
            anyhow::bail!("Session {} is retired", self.id);
        }

        self.teardown().await;
        self.launch(proxy).await?;
        self.completed_tasks = 0;
        info!("Session {} recreated", self.id);
        Ok(())
    }

    /// Count a finished task; renew the browser once the limit is reached
    pub async fn release(&mut self) -> Result<()> {
        self.completed_tasks += 1;

        if self.max_tasks_before_renewal == 0 || self.completed_tasks < self.max_tasks_before_renewal {
            return Ok(());
        }

        info!("Session {} renewing after {} tasks", self.id, self.completed_tasks);
        let proxy = self.proxy.clone();
        self.teardown().await;
        self.completed_tasks = 0;
        self.renewals += 1;
        self.launch(proxy).await
    }

    /// Close the browser for good
    pub async fn retire(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.quit().await;
        }
        self.state = SessionState::Retired;
        debug!("Session {} retired", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.handle.is_some() && self.state != SessionState::Retired {
            warn!("Session {} dropped without retiring", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::MockBrowserLauncher;
    use crate::crawler::extractor::PageState;
    use crate::offers::RawOffer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
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
            Ok("https://shop.example/p/1".to_string())
        }

        async fn click(&mut self, _selector: &str) -> Result<bool> {
            Ok(false)
        }

        async fn quit(&mut self) {}
    }

    /// Replays (sold_out, offer_count) per fetch
    struct StockExtractor {
        pages: Mutex<Vec<(bool, usize)>>,
        fetches: AtomicUsize,
    }

    impl StockExtractor {
        fn new(mut pages: Vec<(bool, usize)>) -> Self {
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for StockExtractor {
        async fn fetch(&self, _browser: &mut dyn BrowserHandle, url: &str) -> Result<PageState> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let (sold_out, offers) = self.pages.lock().unwrap().pop().unwrap_or((false, 0));
            Ok(PageState::new(url, url, format!("{}:{}", sold_out, offers)))
        }

        fn find_price_markers(&self, _page: &PageState) -> Option<f64> {
            Some(999.0)
        }

        fn find_availability_markers(&self, page: &PageState) -> bool {
            page.html.starts_with("true")
        }

        fn find_offer_blocks(&self, page: &PageState) -> Vec<RawOffer> {
            let count: usize = page.html.split(':').nth(1).unwrap().parse().unwrap();
            (0..count).map(|i| RawOffer::new("Bank Offer", format!("offer {}", i))).collect()
        }
    }

    fn launcher(launches: usize) -> Arc<dyn BrowserLauncher> {
        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .times(launches)
            .returning(|_| Ok(Box::new(FakeBrowser)));
        Arc::new(launcher)
    }

    fn no_delay() -> StockRetry {
        StockRetry {
            retries: 2,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_sold_out_marker_beats_offers() {
        let mut session = Session::new(launcher(1), 10);
        session.start(None).await.unwrap();

        let extractor = StockExtractor::new(vec![(true, 2)]);
        let observation = session.execute("https://shop.example/p/1", &extractor, no_delay()).await.unwrap();

        assert_eq!(observation.stock, StockState::OutOfStock);
        assert_eq!(observation.raw_offers.len(), 2);
        assert_eq!(extractor.fetches.load(Ordering::SeqCst), 1);
        session.retire().await;
    }

    #[tokio::test]
    async fn test_unknown_stock_refetches_twice() {
        let mut session = Session::new(launcher(1), 10);
        session.start(None).await.unwrap();

        let extractor = StockExtractor::new(vec![(false, 0), (false, 0), (false, 0), (false, 3)]);
        let observation = session.execute("https://shop.example/p/1", &extractor, no_delay()).await.unwrap();
        assert_eq!(observation.stock, StockState::Unknown);
        assert_eq!(extractor.fetches.load(Ordering::SeqCst), 3);

        let extractor = StockExtractor::new(vec![(false, 0), (false, 1)]);
        let observation = session.execute("https://shop.example/p/1", &extractor, no_delay()).await.unwrap();
        assert_eq!(observation.stock, StockState::InStock);
        assert_eq!(extractor.fetches.load(Ordering::SeqCst), 2);
        session.retire().await;
    }

    #[tokio::test]
    async fn test_release_renews_at_limit() {
        let mut session = Session::new(launcher(2), 2);
        session.start(None).await.unwrap();

        session.release().await.unwrap();
        assert_eq!(session.completed_tasks(), 1);
        assert_eq!(session.renewals(), 0);

        session.release().await.unwrap();
        assert_eq!(session.completed_tasks(), 0);
        assert_eq!(session.renewals(), 1);
        assert_eq!(session.state(), SessionState::Active);
        session.retire().await;
    }

    #[tokio::test]
    async fn test_invalid_session_refuses_work_until_recreated() {
        let mut session = Session::new(launcher(2), 10);
        let extractor = StockExtractor::new(vec![(false, 1)]);

        let err = session.execute("https://shop.example/p/1", &extractor, no_delay()).await.unwrap_err();
        assert!(err.to_string().contains("webdriver session not active"));

        session.start(None).await.unwrap();
        session.mark_invalid();
        assert_eq!(session.state(), SessionState::Invalid);
        assert!(session.execute("https://shop.example/p/1", &extractor, no_delay()).await.is_err());

        session.recreate(None).await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.execute("https://shop.example/p/1", &extractor, no_delay()).await.is_ok());

        session.retire().await;
        assert_eq!(session.state(), SessionState::Retired);
        assert!(session.start(None).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_session_invalid() {
        let mut launcher = MockBrowserLauncher::new();
        launcher
            .expect_launch()
            .times(1)
            .returning(|_| Err(HarvestError::Launch("chrome not reachable".to_string()).into()));

        let mut session = Session::new(Arc::new(launcher), 10);
        let err = session.start(None).await.unwrap_err();
        assert_eq!(session.state(), SessionState::Invalid);
        assert!(format!("{:#}", err).contains("session not created"));
    }
}
