use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::offers::{rank, OfferParser, RankedOffer, RawOffer};
use crate::recovery::FaultSet;

/// Position of this execution unit in a sharded run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Zero-based shard index
    pub index: usize,

    /// Total number of shards
    pub total: usize,
}

/// One URL to extract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task
    pub id: Uuid,

    /// URL as first seen in the dataset
    pub url: String,

    /// Normalized URL; the cache and visited-log key
    pub key: String,

    /// JSON pointers to every dataset entry carrying this URL
    pub locations: Vec<String>,

    /// Discovery position within the run
    pub position: usize,

    /// Shard this task belongs to, if the run is sharded
    pub shard: Option<ShardInfo>,
}

impl Task {
    /// Create a new task
    pub fn new(url: String, key: String, position: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            key,
            locations: Vec::new(),
            position,
            shard: None,
        }
    }
}

/// Tri-state availability outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockState {
    InStock,
    OutOfStock,
    Unknown,
}

impl StockState {
    /// Persisted form: `true`, `false` or `null`
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            StockState::InStock => Some(true),
            StockState::OutOfStock => Some(false),
            StockState::Unknown => None,
        }
    }

    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => StockState::InStock,
            Some(false) => StockState::OutOfStock,
            None => StockState::Unknown,
        }
    }
}

/// Combine the page signals into a stock state.
///
/// An explicit sold-out marker always wins; otherwise the presence of any
/// offer means the item can be bought.
pub fn determine_stock(sold_out_marker: bool, offers_found: usize) -> StockState {
    if sold_out_marker {
        StockState::OutOfStock
    } else if offers_found > 0 {
        StockState::InStock
    } else {
        StockState::Unknown
    }
}

/// Raw facts read from one page by a session
#[derive(Debug, Clone, PartialEq)]
pub struct PageObservation {
    /// URL the browser ended up on
    pub final_url: String,
    pub price: Option<f64>,
    pub stock: StockState,
    pub raw_offers: Vec<RawOffer>,
    pub product_name: Option<String>,
    pub exchange_price: Option<f64>,
}

/// Everything extracted for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub url: String,
    pub final_url: String,
    pub price: Option<f64>,
    pub stock: StockState,
    pub raw_offers: Vec<RawOffer>,
    pub ranked_offers: Vec<RankedOffer>,
    pub exchange_price: Option<f64>,
    pub product_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExtractionResult {
    /// Parse and rank the observed offers for the observed price
    pub fn from_observation(url: &str, observation: PageObservation, parser: &OfferParser) -> Self {
        let offers = parser.parse_all(&observation.raw_offers);
        let ranked_offers = rank(&offers, observation.price.unwrap_or(0.0));

        Self {
            url: url.to_string(),
            final_url: observation.final_url,
            price: observation.price,
            stock: observation.stock,
            raw_offers: observation.raw_offers,
            ranked_offers,
            exchange_price: observation.exchange_price,
            product_name: observation.product_name,
            timestamp: Utc::now(),
        }
    }

    /// The persisted subset of this result
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            price: self.price,
            in_stock: self.stock.as_flag(),
            ranked_offers: self.ranked_offers.clone(),
            platform_url: Some(self.final_url.clone()),
            product_name_via_url: self.product_name.clone(),
            with_exchange_price: self.exchange_price,
        }
    }
}

/// Result fields written into dataset entries, cache files and shard outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub price: Option<f64>,
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub ranked_offers: Vec<RankedOffer>,
    pub platform_url: Option<String>,
    pub product_name_via_url: Option<String>,
    pub with_exchange_price: Option<f64>,
}

impl Snapshot {
    /// Dataset field names carried by a snapshot
    pub const FIELDS: [&'static str; 6] = [
        "price",
        "in_stock",
        "ranked_offers",
        "platform_url",
        "product_name_via_url",
        "with_exchange_price",
    ];
}

/// Terminal outcome of a task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Extracted in this run
    Extracted(Snapshot),

    /// Served from the result cache without touching a browser
    Cached(Snapshot),

    /// Already recorded as done in the visited log
    SkippedVisited,

    /// Gave up after recovery
    Failed { error: String, faults: FaultSet },
}
