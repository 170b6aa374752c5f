use serde::{Deserialize, Serialize};

/// Offer text as it was read from a page, before parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOffer {
    /// Heading of the page region the offer was found in (e.g. "Bank Offer")
    #[serde(default)]
    pub hint: String,

    /// Full offer description
    pub text: String,
}

impl RawOffer {
    /// Create a new raw offer
    pub fn new(hint: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            hint: hint.into(),
            text: text.into(),
        }
    }
}

/// Category of a promotional offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferType {
    #[serde(rename = "Bank Offer")]
    BankOffer,
    #[serde(rename = "Cashback")]
    Cashback,
    #[serde(rename = "No Cost EMI")]
    NoCostEmi,
    #[serde(rename = "Partner Offer")]
    PartnerOffer,
    #[serde(rename = "Exchange Offer")]
    ExchangeOffer,
    #[serde(rename = "Offer")]
    GenericOffer,
}

impl OfferType {
    /// Human readable label, matching the serialized form
    pub fn label(&self) -> &'static str {
        match self {
            OfferType::BankOffer => "Bank Offer",
            OfferType::Cashback => "Cashback",
            OfferType::NoCostEmi => "No Cost EMI",
            OfferType::PartnerOffer => "Partner Offer",
            OfferType::ExchangeOffer => "Exchange Offer",
            OfferType::GenericOffer => "Offer",
        }
    }
}

/// Card family an offer is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardType {
    #[serde(rename = "Credit Card")]
    Credit,
    #[serde(rename = "Debit Card")]
    Debit,
    #[serde(rename = "Credit/Debit Card")]
    Either,
}

impl CardType {
    pub fn label(&self) -> &'static str {
        match self {
            CardType::Credit => "Credit Card",
            CardType::Debit => "Debit Card",
            CardType::Either => "Credit/Debit Card",
        }
    }
}

/// Structured offer produced by the parser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Original offer text
    pub raw_text: String,

    /// Offer category
    pub offer_type: OfferType,

    /// Canonical bank or payment provider name
    pub bank: Option<String>,

    /// Discount amount in currency units (0 when none was found)
    pub amount: f64,

    /// Minimum purchase value required
    pub min_spend: Option<f64>,

    /// Card restriction
    pub card_type: Option<CardType>,

    /// Card network (Visa, Mastercard, ...)
    pub card_provider: Option<String>,

    /// Validity window text
    pub validity: Option<String>,

    /// Whether the discount applies at checkout rather than later
    pub is_instant: bool,
}

/// An offer scored in the context of one page's price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedOffer {
    #[serde(flatten)]
    pub offer: Offer,

    /// Score in [0, 100]; only bank offers are scored
    pub score: Option<f64>,

    /// 1-based rank among bank offers
    pub rank: Option<usize>,

    /// Price after this offer is applied
    pub net_effective_price: f64,

    /// Whether the page price satisfies the offer's minimum spend
    pub is_applicable: bool,

    /// Short explanation for the reader of the output
    pub note: String,
}
