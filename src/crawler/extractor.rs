use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::driver::{bounded, BrowserHandle};
use crate::cli::config::SiteProfile;
use crate::error::HarvestError;
use crate::offers::RawOffer;

/// A rendered page as seen by an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct PageState {
    /// URL that was requested
    pub url: String,

    /// URL the browser ended up on
    pub final_url: String,

    /// Rendered HTML
    pub html: String,
}

impl PageState {
    pub fn new(url: impl Into<String>, final_url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            final_url: final_url.into(),
            html: html.into(),
        }
    }
}

/// Site-specific page reading.
///
/// `fetch` drives the browser; the `find_*` methods are pure functions of the
/// fetched page. A missing field is `None` or empty, never an error.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Load `url` and wait until the page is usable
    async fn fetch(&self, browser: &mut dyn BrowserHandle, url: &str) -> Result<PageState>;

    fn find_price_markers(&self, page: &PageState) -> Option<f64>;

    /// `true` when the page carries an explicit sold-out marker
    fn find_availability_markers(&self, page: &PageState) -> bool;

    fn find_offer_blocks(&self, page: &PageState) -> Vec<RawOffer>;

    fn find_product_name(&self, _page: &PageState) -> Option<String> {
        None
    }

    fn find_exchange_price(&self, _page: &PageState) -> Option<f64> {
        None
    }
}

/// Navigation bound used unless the launcher's command timeout is supplied
const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(35);

/// Shortest bound on one page read, even when the marker window is spent
const MIN_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Parse the first number in a price label such as `₹1,23,999.00`
pub fn parse_price(text: &str) -> Option<f64> {
    static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();
    let number = NUMBER
        .get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").ok())
        .as_ref()?;

    number
        .find(text)
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|price| *price > 0.0)
}

fn compile(selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!("Invalid selector '{}': {:?}", s, e);
                None
            }
        })
        .collect()
}

fn compile_one(selector: &str) -> Option<Selector> {
    compile(&[selector.to_string()]).into_iter().next()
}

fn element_text(element: ElementRef) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(document: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document
            .select(selector)
            .map(element_text)
            .find(|text| !text.is_empty())
    })
}

/// What one look at the page revealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageCheck {
    Ready,
    Challenge,
    Pending,
}

/// Extractor driven entirely by a `SiteProfile`
pub struct SelectorExtractor {
    profile: SiteProfile,
    navigation_timeout: Duration,
    ready: Vec<Selector>,
    price: Vec<Selector>,
    sold_out: Vec<Selector>,
    sold_out_texts: Vec<String>,
    offer_block: Option<Selector>,
    offer_title: Option<Selector>,
    offer_text: Option<Selector>,
    product_name: Vec<Selector>,
    exchange_price: Vec<Selector>,
    challenge: Vec<Selector>,
    challenge_texts: Vec<String>,
}

impl SelectorExtractor {
    /// Create a new extractor for a site profile
    pub fn new(profile: SiteProfile) -> Self {
        let lowercase = |texts: &[String]| -> Vec<String> { texts.iter().map(|t| t.to_lowercase()).collect() };

        Self {
            ready: compile(&profile.ready_selectors),
            price: compile(&profile.price_selectors),
            sold_out: compile(&profile.sold_out_selectors),
            sold_out_texts: lowercase(&profile.sold_out_texts),
            offer_block: compile_one(&profile.offer_block_selector),
            offer_title: compile_one(&profile.offer_title_selector),
            offer_text: compile_one(&profile.offer_text_selector),
            product_name: compile(&profile.product_name_selectors),
            exchange_price: compile(&profile.exchange_price_selectors),
            challenge: compile(&profile.challenge_selectors),
            challenge_texts: lowercase(&profile.challenge_texts),
            profile,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }

    /// Bound page loads by `timeout` instead of the default
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    fn page_text(document: &Html) -> String {
        document.root_element().text().collect::<String>().to_lowercase()
    }

    fn check(&self, html: &str) -> PageCheck {
        let document = Html::parse_document(html);

        let challenged = self.challenge.iter().any(|s| document.select(s).next().is_some()) || {
            let text = Self::page_text(&document);
            self.challenge_texts.iter().any(|t| text.contains(t.as_str()))
        };
        if challenged {
            return PageCheck::Challenge;
        }

        if self.ready.is_empty() || self.ready.iter().any(|s| document.select(s).next().is_some()) {
            PageCheck::Ready
        } else {
            PageCheck::Pending
        }
    }

    async fn try_dismiss(&self, browser: &mut dyn BrowserHandle, bound: Duration) -> Result<bool> {
        for selector in &self.profile.dismiss_selectors {
            if bounded(bound, "clicking dismiss selector", browser.click(selector)).await? {
                debug!("Clicked dismiss selector: {}", selector);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    async fn fetch(&self, browser: &mut dyn BrowserHandle, url: &str) -> Result<PageState> {
        bounded(self.navigation_timeout, "navigating", browser.goto(url)).await?;

        let timeout = Duration::from_secs(self.profile.marker_timeout_secs);
        let poll = Duration::from_millis(self.profile.poll_interval_ms.max(10));
        let started = Instant::now();
        let mut dismissed = false;

        loop {
            // A read that never returns must not outlive the marker window
            let read_bound = timeout.saturating_sub(started.elapsed()).max(MIN_READ_TIMEOUT);
            let html = bounded(read_bound, "reading page source", browser.page_source()).await?;

            match self.check(&html) {
                PageCheck::Ready => {
                    let final_url = bounded(read_bound, "reading current url", browser.current_url()).await?;
                    return Ok(PageState::new(url, final_url, html));
                }
                PageCheck::Challenge if dismissed => {
                    return Err(HarvestError::Challenge { url: url.to_string() }.into());
                }
                PageCheck::Challenge => {
                    dismissed = true;
                    if self.try_dismiss(browser, read_bound).await? {
                        info!("Dismissed interstitial on {}", url);
                    } else {
                        return Err(HarvestError::Challenge { url: url.to_string() }.into());
                    }
                }
                PageCheck::Pending => {}
            }

            if started.elapsed() >= timeout {
                return Err(HarvestError::MarkerTimeout {
                    url: url.to_string(),
                    elapsed: started.elapsed(),
                }
                .into());
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn find_price_markers(&self, page: &PageState) -> Option<f64> {
        let document = Html::parse_document(&page.html);
        self.price.iter().find_map(|selector| {
            document
                .select(selector)
                .find_map(|element| parse_price(&element_text(element)))
        })
    }

    fn find_availability_markers(&self, page: &PageState) -> bool {
        let document = Html::parse_document(&page.html);
        if self.sold_out.iter().any(|s| document.select(s).next().is_some()) {
            return true;
        }
        let text = Self::page_text(&document);
        self.sold_out_texts.iter().any(|t| text.contains(t.as_str()))
    }

    fn find_offer_blocks(&self, page: &PageState) -> Vec<RawOffer> {
        let Some(block) = &self.offer_block else {
            return Vec::new();
        };
        let document = Html::parse_document(&page.html);

        document
            .select(block)
            .filter_map(|element| {
                let hint = self
                    .offer_title
                    .as_ref()
                    .and_then(|s| element.select(s).next())
                    .map(element_text)
                    .unwrap_or_default();
                let text = self
                    .offer_text
                    .as_ref()
                    .and_then(|s| element.select(s).next())
                    .map(element_text)
                    .unwrap_or_else(|| element_text(element));

                (!text.is_empty()).then(|| RawOffer::new(hint, text))
            })
            .collect()
    }

    fn find_product_name(&self, page: &PageState) -> Option<String> {
        let document = Html::parse_document(&page.html);
        first_text(&document, &self.product_name)
    }

    fn find_exchange_price(&self, page: &PageState) -> Option<f64> {
        let document = Html::parse_document(&page.html);
        first_text(&document, &self.exchange_price).and_then(|text| parse_price(&text))
    }
}
