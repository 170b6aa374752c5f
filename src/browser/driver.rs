use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::future::Future;
use std::time::{Duration, Instant};
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tracing::{debug, error};

use crate::cli::config::{BrowserSettings, ProxyConfig};
use crate::error::HarvestError;
use crate::proxy::manager::proxy_url;

/// A live browser owned by exactly one session
#[async_trait]
pub trait BrowserHandle: Send {
    /// Navigate to a URL
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// Get the current page source
    async fn page_source(&mut self) -> Result<String>;

    /// URL the browser ended up on after redirects
    async fn current_url(&mut self) -> Result<String>;

    /// Click the first element matching `selector`; `false` if none matched
    async fn click(&mut self, selector: &str) -> Result<bool>;

    /// Close the browser. Errors are logged, never returned.
    async fn quit(&mut self);
}

/// Launches browser handles, optionally routed through a proxy
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, proxy: Option<ProxyConfig>) -> Result<Box<dyn BrowserHandle>>;
}

/// Run a browser operation under a hard upper bound.
///
/// Expiry becomes `HarvestError::Timeout`, which classifies as a network fault.
pub async fn bounded<T, F>(bound: Duration, operation: &str, operation_future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(bound, operation_future).await {
        Ok(result) => result,
        Err(_) => Err(HarvestError::Timeout {
            operation: operation.to_string(),
            elapsed: started.elapsed(),
        }
        .into()),
    }
}

/// Chrome driven over WebDriver
pub struct ChromeHandle {
    driver: Option<WebDriver>,
    command_timeout: Duration,
}

impl ChromeHandle {
    fn driver(&self) -> Result<&WebDriver> {
        self.driver.as_ref().ok_or_else(|| {
            HarvestError::SessionNotActive {
                state: "closed".to_string(),
            }
            .into()
        })
    }
}

fn browser_error(e: WebDriverError) -> HarvestError {
    HarvestError::Browser(e.to_string())
}

async fn click_first(driver: &WebDriver, selector: &str) -> Result<bool> {
    let elements = driver
        .find_all(By::Css(selector))
        .await
        .map_err(browser_error)
        .context(format!("Failed to query selector: {}", selector))?;

    match elements.into_iter().next() {
        Some(element) => {
            element
                .click()
                .await
                .map_err(browser_error)
                .context(format!("Failed to click: {}", selector))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[async_trait]
impl BrowserHandle for ChromeHandle {
    async fn goto(&mut self, url: &str) -> Result<()> {
        let driver = self.driver()?;
        debug!("Navigating to: {}", url);

        bounded(self.command_timeout, "navigating", async {
            driver
                .goto(url)
                .await
                .map_err(browser_error)
                .context(format!("Failed to navigate to URL: {}", url))
        })
        .await
    }

    async fn page_source(&mut self) -> Result<String> {
        let driver = self.driver()?;
        bounded(self.command_timeout, "reading page source", async {
            driver.source().await.map_err(browser_error).context("Failed to get page source")
        })
        .await
    }

    async fn current_url(&mut self) -> Result<String> {
        let driver = self.driver()?;
        let url = bounded(self.command_timeout, "reading current url", async {
            driver.current_url().await.map_err(browser_error).context("Failed to get current URL")
        })
        .await?;
        Ok(url.to_string())
    }

    async fn click(&mut self, selector: &str) -> Result<bool> {
        let driver = self.driver()?;
        bounded(self.command_timeout, "clicking", click_first(driver, selector)).await
    }

    async fn quit(&mut self) {
        if let Some(driver) = self.driver.take() {
            let closed = bounded(self.command_timeout, "closing browser", async move {
                driver.quit().await.map_err(|e| anyhow::Error::new(browser_error(e)))
            })
            .await;
            if let Err(e) = closed {
                error!("Error closing browser session: {:#}", e);
            }
            debug!("Browser session closed");
        }
    }
}

impl Drop for ChromeHandle {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Spawn a task to quit the driver
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

/// Launches Chrome through a WebDriver endpoint
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    /// Create a new Chrome launcher
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn capabilities(&self, proxy: Option<&ProxyConfig>) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();

        if let Some(user_agent) = self.settings.user_agents.choose(&mut rand::thread_rng()) {
            caps.add_chrome_arg(&format!("--user-agent={}", user_agent))?;
        }

        let (width, height) = self.settings.window_size;
        caps.add_chrome_arg(&format!("--window-size={},{}", width, height))?;

        if self.settings.headless {
            caps.set_headless()?;
        }

        if let Some(url) = proxy.and_then(proxy_url) {
            caps.add_chrome_arg(&format!("--proxy-server={}", url))?;
        }

        caps.add_chrome_arg("--disable-blink-features=AutomationControlled")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--no-sandbox")?;

        caps.add_chrome_option("excludeSwitches", serde_json::json!(["enable-automation"]))?;
        caps.add_chrome_option("useAutomationExtension", false)?;

        Ok(caps)
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, proxy: Option<ProxyConfig>) -> Result<Box<dyn BrowserHandle>> {
        let caps = self
            .capabilities(proxy.as_ref())
            .map_err(|e| HarvestError::Launch(e.to_string()))?;

        let command_timeout = self.settings.command_timeout();
        let driver = bounded(command_timeout, "connecting to webdriver", async {
            WebDriver::new(&self.settings.webdriver_url, caps)
                .await
                .map_err(|e| HarvestError::Launch(e.to_string()))
                .context(format!("Failed to connect to WebDriver at {}", self.settings.webdriver_url))
        })
        .await?;

        let page_load_timeout = Duration::from_secs(self.settings.page_load_timeout_secs);
        bounded(command_timeout, "setting page load timeout", async {
            driver
                .set_page_load_timeout(page_load_timeout)
                .await
                .map_err(|e| anyhow::Error::new(HarvestError::Launch(e.to_string())))
        })
        .await?;

        match &proxy {
            Some(proxy) => debug!("Browser launched through proxy {}", proxy.name),
            None => debug!("Browser launched without proxy"),
        }

        Ok(Box::new(ChromeHandle {
            driver: Some(driver),
            command_timeout,
        }))
    }
}
