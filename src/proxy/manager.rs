use anyhow::{Context, Result};
use reqwest::Client;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cli::config::{ProxyConfig, ProxySettings};

/// Render a proxy as the URL Chrome and reqwest expect
pub fn proxy_url(proxy: &ProxyConfig) -> Option<String> {
    let (scheme, default_port) = match proxy.proxy_type.as_str() {
        "http" => ("http", 8080),
        "socks5" => ("socks5", 1080),
        _ => {
            error!("Unsupported proxy type: {}", proxy.proxy_type);
            return None;
        }
    };

    let port = proxy.port.unwrap_or(default_port);
    let url = if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
        format!("{}://{}:{}@{}:{}", scheme, username, password, proxy.address, port)
    } else {
        format!("{}://{}:{}", scheme, proxy.address, port)
    };

    Some(url)
}

struct ProxySlot {
    proxy: ProxyConfig,
    consecutive_failures: u32,
}

/// Ordered proxy rotation with eviction.
///
/// A proxy is dropped after `max_consecutive_failures` failures in a row.
/// Once every proxy is gone the rotator hands out `None` and callers run
/// without a proxy.
pub struct ProxyRotator {
    slots: Vec<ProxySlot>,
    cursor: usize,
    max_consecutive_failures: u32,
    evicted: Vec<ProxyConfig>,
}

impl ProxyRotator {
    /// Create a new proxy rotator
    pub fn new(config: &ProxySettings) -> Self {
        let slots = if config.enabled {
            config.proxy_list.iter()
                .filter(|p| proxy_url(p).is_some())
                .map(|p| ProxySlot { proxy: p.clone(), consecutive_failures: 0 })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            slots,
            cursor: 0,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
            evicted: Vec::new(),
        }
    }

    /// Proxies still in rotation
    pub fn available(&self) -> usize {
        self.slots.len()
    }

    pub fn evicted(&self) -> &[ProxyConfig] {
        &self.evicted
    }

    /// Hand out the next proxy in order, or `None` for direct execution
    pub fn next_proxy(&mut self) -> Option<ProxyConfig> {
        if self.slots.is_empty() {
            return None;
        }

        let slot = &self.slots[self.cursor % self.slots.len()];
        self.cursor = (self.cursor + 1) % self.slots.len();
        Some(slot.proxy.clone())
    }

    /// Count a failure against `failed` and move on to the next proxy
    pub fn rotate_after_failure(&mut self, failed: Option<&ProxyConfig>) -> Option<ProxyConfig> {
        if let Some(failed) = failed {
            if let Some(index) = self.slots.iter().position(|s| &s.proxy == failed) {
                self.slots[index].consecutive_failures += 1;
                let failures = self.slots[index].consecutive_failures;

                if failures >= self.max_consecutive_failures {
                    let slot = self.slots.remove(index);
                    warn!("Evicting proxy {} after {} consecutive failures", slot.proxy.name, failures);
                    self.evicted.push(slot.proxy);
                    // The proxy that followed the evicted one now sits at `index`
                    self.cursor = index;
                } else {
                    self.cursor = index + 1;
                }
            }
        }

        if self.slots.is_empty() {
            debug!("No proxies left, continuing without one");
            return None;
        }

        self.cursor %= self.slots.len();
        let next = self.next_proxy();
        if let Some(proxy) = &next {
            debug!("Rotated to proxy: {}", proxy.name);
        }
        next
    }

    /// Reset the failure streak of a proxy that just worked
    pub fn record_success(&mut self, proxy: Option<&ProxyConfig>) {
        if let Some(proxy) = proxy {
            if let Some(slot) = self.slots.iter_mut().find(|s| &s.proxy == proxy) {
                slot.consecutive_failures = 0;
            }
        }
    }

    /// Probe every proxy and evict the ones that fail
    pub async fn probe_all(&mut self, probe_url: &str, timeout: Duration) -> Result<usize> {
        let mut healthy = Vec::new();
        for slot in std::mem::take(&mut self.slots) {
            if Self::probe(&slot.proxy, probe_url, timeout).await? {
                debug!("Proxy tested OK: {}", slot.proxy.name);
                healthy.push(slot);
            } else {
                warn!("Proxy test failed: {}", slot.proxy.name);
                self.evicted.push(slot.proxy);
            }
        }

        self.slots = healthy;
        self.cursor = 0;
        info!("{} proxies passed the health probe", self.slots.len());
        Ok(self.slots.len())
    }

    /// Test a single proxy
    async fn probe(proxy: &ProxyConfig, probe_url: &str, timeout: Duration) -> Result<bool> {
        let Some(url) = proxy_url(proxy) else {
            return Ok(false);
        };

        let upstream = match reqwest::Proxy::all(&url) {
            Ok(upstream) => upstream,
            Err(e) => {
                error!("Invalid proxy URL {}: {}", url, e);
                return Ok(false);
            }
        };

        // Create a proxy-specific client
        let client = Client::builder()
            .proxy(upstream)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        match client.get(probe_url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Probe through {} failed: {}", proxy.name, e);
                Ok(false)
            }
        }
    }
}
