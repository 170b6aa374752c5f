use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HarvestConfig {
    pub pool: PoolSettings,
    pub recovery: RecoverySettings,
    pub proxy: ProxySettings,
    pub browser: BrowserSettings,
    pub storage: StorageSettings,
    pub site: SiteProfile,
}

/// Worker pool settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PoolSettings {
    /// Number of concurrent sessions
    pub workers: usize,
    /// Completed tasks before a session renews its browser
    pub max_tasks_before_renewal: u32,
    /// Random pause between tasks, min and max in milliseconds
    pub task_delay_ms: (u64, u64),
}

/// Retry and escalation thresholds
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecoverySettings {
    /// Total execution attempts per task
    pub max_attempts: u32,
    /// Session recreations allowed per task
    pub max_session_recreations: u32,
    /// Consecutive failures that pause the whole pool
    pub escalate_after_consecutive: u32,
    pub resource_backoff_ms: u64,
    pub proxy_backoff_ms: u64,
    /// Extra page loads when stock could not be determined
    pub stock_retries: u32,
    pub stock_retry_delay_ms: u64,
}

/// Proxy settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    /// Consecutive failures before a proxy is dropped from rotation
    pub max_consecutive_failures: u32,
    /// Probe every proxy before the run starts
    pub probe_on_start: bool,
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    pub proxy_list: Vec<ProxyConfig>,
}

/// Individual proxy configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProxyConfig {
    pub name: String,
    pub proxy_type: String, // "http", "socks5"
    pub address: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Browser launch settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub headless: bool,
    pub page_load_timeout_secs: u64,
    pub window_size: (u32, u32),
    /// One is picked at random for every launched browser
    pub user_agents: Vec<String>,
}

/// Artifact locations and caching behaviour
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub cache_enabled: bool,
    pub cache_file: String,
    pub visited_file: String,
    /// Skip URLs already recorded as done in the visited log
    pub skip_visited: bool,
    /// Re-extract everything, ignoring cache and visited log
    pub force_rescan: bool,
    /// Terminal outcomes between checkpoints
    pub checkpoint_interval: usize,
    pub checkpoint_retention: usize,
}

/// Selectors and markers describing one source site
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SiteProfile {
    pub name: String,
    /// Store links whose name or URL contains this are processed
    pub link_identifier: String,
    /// Any of these means the page finished rendering
    pub ready_selectors: Vec<String>,
    pub price_selectors: Vec<String>,
    pub sold_out_selectors: Vec<String>,
    /// Case-insensitive page text that marks the item unavailable
    pub sold_out_texts: Vec<String>,
    pub offer_block_selector: String,
    pub offer_title_selector: String,
    pub offer_text_selector: String,
    pub product_name_selectors: Vec<String>,
    pub exchange_price_selectors: Vec<String>,
    pub challenge_selectors: Vec<String>,
    pub challenge_texts: Vec<String>,
    /// Clicked once to dismiss an interstitial
    pub dismiss_selectors: Vec<String>,
    pub marker_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            max_tasks_before_renewal: 100,
            task_delay_ms: (500, 1500),
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_session_recreations: 2,
            escalate_after_consecutive: 5,
            resource_backoff_ms: 10_000,
            proxy_backoff_ms: 2_000,
            stock_retries: 2,
            stock_retry_delay_ms: 2_000,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_consecutive_failures: 3,
            probe_on_start: false,
            probe_url: "https://www.google.com".to_string(),
            probe_timeout_secs: 10,
            proxy_list: vec![],
        }
    }
}

impl BrowserSettings {
    /// Upper bound on a single browser command, a little above the page load timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs + 5)
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            page_load_timeout_secs: 30,
            window_size: (1920, 1080),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            ],
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_enabled: true,
            cache_file: "url_cache.json".to_string(),
            visited_file: "visited_urls.txt".to_string(),
            skip_visited: true,
            force_rescan: false,
            checkpoint_interval: 50,
            checkpoint_retention: 3,
        }
    }
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            link_identifier: String::new(),
            ready_selectors: vec!["body".to_string()],
            price_selectors: vec!["[itemprop=price]".to_string(), ".price".to_string()],
            sold_out_selectors: vec![],
            sold_out_texts: vec![
                "currently unavailable".to_string(),
                "out of stock".to_string(),
                "sold out".to_string(),
            ],
            offer_block_selector: ".offer".to_string(),
            offer_title_selector: ".offer-title".to_string(),
            offer_text_selector: ".offer-text".to_string(),
            product_name_selectors: vec!["h1".to_string()],
            exchange_price_selectors: vec![],
            challenge_selectors: vec!["form[action*=captcha]".to_string()],
            challenge_texts: vec![
                "enter the characters you see below".to_string(),
                "verify you are a human".to_string(),
            ],
            dismiss_selectors: vec![],
            marker_timeout_secs: 15,
            poll_interval_ms: 500,
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            recovery: RecoverySettings::default(),
            proxy: ProxySettings::default(),
            browser: BrowserSettings::default(),
            storage: StorageSettings::default(),
            site: SiteProfile::default(),
        }
    }
}

impl StorageSettings {
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_file)
    }

    pub fn visited_path(&self) -> PathBuf {
        self.data_dir.join(&self.visited_file)
    }
}

impl HarvestConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "offer-harvester", "offer-harvester") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            // Create and save the default configuration
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a site profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))
    }

    /// Parse configuration from YAML; omitted sections take their defaults
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub fn save_as_profile(&self, profile: &str) -> Result<()> {
        let config_dir = Self::config_dir();
        let sites_dir = config_dir.join("sites");

        // Create the sites directory if it doesn't exist
        if !sites_dir.exists() {
            fs::create_dir_all(&sites_dir)
                .context(format!("Failed to create sites directory: {}", sites_dir.display()))?;
        }

        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub fn list_profiles() -> Result<Vec<String>> {
        let config_dir = Self::config_dir();
        let sites_dir = config_dir.join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(stem) = path.file_stem() {
                    if let Some(name) = stem.to_str() {
                        profiles.push(name.to_string());
                    }
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
pool:
  workers: 4
site:
  name: demo
  link_identifier: amazon
  price_selectors: [".a-price .a-offscreen"]
"#;
        let config = HarvestConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pool.workers, 4);
        assert_eq!(config.pool.max_tasks_before_renewal, 100);
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.proxy.max_consecutive_failures, 3);
        assert_eq!(config.storage.checkpoint_interval, 50);
        assert_eq!(config.site.link_identifier, "amazon");
        assert_eq!(config.site.marker_timeout_secs, 15);
    }

    #[test]
    fn test_bundled_profiles_parse() {
        for (yaml, name) in [
            (include_str!("../../profiles/amazon.yaml"), "amazon"),
            (include_str!("../../profiles/flipkart.yaml"), "flipkart"),
        ] {
            let config = HarvestConfig::from_yaml(yaml).unwrap();
            assert_eq!(config.site.name, name);
            assert_eq!(config.site.link_identifier, name);
            assert!(!config.site.price_selectors.is_empty());
            assert_eq!(config.recovery.max_attempts, 3);
        }
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profile.yaml");

        let mut config = HarvestConfig::default();
        config.storage.force_rescan = true;
        config.save_to_file(&path).unwrap();

        let loaded = HarvestConfig::load_from_file(&path).unwrap();
        assert!(loaded.storage.force_rescan);
        assert_eq!(loaded.browser.webdriver_url, config.browser.webdriver_url);
    }
}
