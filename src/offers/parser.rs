use regex::Regex;
use tracing::{debug, warn};

use crate::offers::banks::{match_bank, match_card_provider};
use crate::offers::model::{CardType, Offer, OfferType, RawOffer};

const CURRENCY: &str = r"(?:INR|Rs\.?|₹)\s*";
const NUMBER: &str = r"([\d,]+(?:\.\d+)?)";

/// Turns raw offer text into structured offers.
///
/// Every field is best effort: absence yields `None` (or a zero amount),
/// never an error.
pub struct OfferParser {
    bank_keywords: Vec<Regex>,
    cashback_keywords: Vec<Regex>,
    emi_keywords: Vec<Regex>,
    partner_keywords: Vec<Regex>,
    exchange_keywords: Vec<Regex>,
    flat_amounts: Vec<Regex>,
    capped_percentages: Vec<Regex>,
    cashback_amounts: Vec<Regex>,
    min_spend: Vec<Regex>,
    validity: Vec<Regex>,
    credit: Vec<Regex>,
    debit: Vec<Regex>,
    card: Vec<Regex>,
}

/// Compile patterns, dropping (and logging) any that fail
fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Invalid offer pattern '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

/// Expand `{C}` (currency prefix) and `{N}` (captured number) placeholders
fn templates(raw: &[&str]) -> Vec<String> {
    raw.iter()
        .map(|t| format!("(?i){}", t.replace("{C}", CURRENCY).replace("{N}", NUMBER)))
        .collect()
}

fn keywords(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|k| format!(r"(?i)\b{}\b", k)).collect()
}

fn parse_number(text: &str) -> Option<f64> {
    text.replace(',', "").parse::<f64>().ok()
}

impl OfferParser {
    /// Create a new parser with the built-in template tables
    pub fn new() -> Self {
        let bank_keywords = compile(&keywords(&[
            "bank offer",
            "card offer",
            "bank",
            "credit cards?",
            "debit cards?",
            "net ?banking",
        ]));
        let cashback_keywords = compile(&keywords(&["cashback", "cash back"]));
        let emi_keywords = compile(&keywords(&["no cost emi", "no-cost emi", "emi", "installments?"]));
        let partner_keywords = compile(&keywords(&["partner offers?", "partner", "affiliate"]));
        let exchange_keywords = compile(&keywords(&["exchange", "trade-in"]));

        // Ordered: flat amounts, then percentage with a cap, then cashback
        let flat_amounts = compile(&templates(&[
            r"(?:additional\s+)?flat\s+{C}{N}",
            r"{C}{N}\s+(?:instant\s+)?discount",
            r"{C}{N}\s+off\b",
            r"save\s+{C}{N}",
        ]));
        let capped_percentages = compile(&templates(&[
            r"[\d.]+\s*%\s+(?:instant\s+)?(?:discount|off|cashback)\s+up\s*to\s+{C}{N}",
            r"up\s+to\s+[\d.]+\s*%\s+(?:off|discount|cashback).*?(?:max|maximum|up\s+to)\s+{C}{N}",
            r"[\d.]+\s*%\s+(?:off|discount|cashback).*?(?:capped\s+at|maximum|max\.?)\s+{C}{N}",
        ]));
        let cashback_amounts = compile(&templates(&[
            r"{C}{N}\s+(?:cashback|cash\s+back)",
            r"(?:cashback|cash\s+back)\s+(?:of\s+)?(?:up\s+to\s+)?{C}{N}",
        ]));
        let min_spend = compile(&templates(&[
            r"min(?:imum|i)?\.?\s+(?:purchase|spend|transaction|order)\s+(?:value\s+)?(?:of\s+)?{C}{N}",
            r"(?:minimum|min)\s+(?:spend|purchase|order)\s*:\s*{C}{N}",
            r"(?:valid|applicable)\s+on\s+(?:orders?|purchases?|transactions?)\s+(?:of\s+|above\s+|worth\s+|over\s+)+{C}{N}",
            r"(?:orders?|purchases?|spending)\s+(?:of\s+|above\s+|worth\s+)+{C}{N}\s+(?:or\s+more|and\s+above)",
            r"(?:spend|purchase|order)\s+(?:minimum|min|at\s+least)\s+(?:of\s+)?{C}{N}",
            r"on\s+(?:orders?|purchases?)\s+(?:above|over)\s+{C}{N}",
        ]));
        let validity = compile(&templates(&[
            r"offer\s+valid\s+(?:till|until|up\s+to)\s+([^,.;]+)",
            r"valid\s+(?:till|until|up\s+to)\s+([^,.;]+)",
            r"expires?\s+(?:on\s+|by\s+)?([^,.;]+)",
            r"valid\s+(?:from|between).*?(?:to|till|until)\s+([^,.;]+)",
            r"(?:validity|valid)\s*:\s*([^,.;]+)",
        ]));

        Self {
            bank_keywords,
            cashback_keywords,
            emi_keywords,
            partner_keywords,
            exchange_keywords,
            flat_amounts,
            capped_percentages,
            cashback_amounts,
            min_spend,
            validity,
            credit: compile(&keywords(&["credit", "cc"])),
            debit: compile(&keywords(&["debit", "dc"])),
            card: compile(&keywords(&["cards?"])),
        }
    }

    /// Parse every raw offer, keeping discovery order
    pub fn parse_all(&self, raw: &[RawOffer]) -> Vec<Offer> {
        raw.iter().map(|offer| self.parse(offer)).collect()
    }

    /// Parse a single raw offer
    pub fn parse(&self, raw: &RawOffer) -> Offer {
        let text = raw.text.trim();
        let offer_type = self.classify(&raw.hint, text);
        let bank = match_bank(text).or_else(|| match_bank(&raw.hint)).map(str::to_string);
        let amount = self.extract_amount(text);
        let lower = text.to_lowercase();
        let mentions_cashback = lower.contains("cashback") || lower.contains("cash back");

        let offer = Offer {
            raw_text: text.to_string(),
            offer_type,
            bank,
            amount,
            min_spend: self.extract_min_spend(text),
            card_type: self.extract_card_type(text),
            card_provider: match_card_provider(text).map(str::to_string),
            validity: self.extract_validity(text),
            is_instant: lower.contains("instant") || !mentions_cashback,
        };

        debug!(
            "Parsed {} offer: amount={} bank={:?} min_spend={:?}",
            offer.offer_type.label(),
            offer.amount,
            offer.bank,
            offer.min_spend
        );

        offer
    }

    /// Classify the offer type; bank offers take precedence over every other kind
    pub fn classify(&self, hint: &str, text: &str) -> OfferType {
        let combined = format!("{} {}", hint, text);
        let any = |patterns: &[Regex]| patterns.iter().any(|p| p.is_match(&combined));

        if any(&self.bank_keywords) || match_bank(&combined).is_some() {
            OfferType::BankOffer
        } else if any(&self.cashback_keywords) {
            OfferType::Cashback
        } else if any(&self.emi_keywords) {
            OfferType::NoCostEmi
        } else if any(&self.partner_keywords) {
            OfferType::PartnerOffer
        } else if any(&self.exchange_keywords) {
            OfferType::ExchangeOffer
        } else {
            OfferType::GenericOffer
        }
    }

    /// Discount amount from the first matching template, 0 when none match
    pub fn extract_amount(&self, text: &str) -> f64 {
        self.flat_amounts
            .iter()
            .chain(self.capped_percentages.iter())
            .chain(self.cashback_amounts.iter())
            .find_map(|pattern| {
                pattern
                    .captures(text)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| parse_number(m.as_str()))
            })
            .unwrap_or(0.0)
    }

    /// Minimum purchase value, if the offer states one
    pub fn extract_min_spend(&self, text: &str) -> Option<f64> {
        self.min_spend.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_number(m.as_str()))
        })
    }

    /// Card restriction, if any card is mentioned
    pub fn extract_card_type(&self, text: &str) -> Option<CardType> {
        let mentions = |patterns: &[Regex]| patterns.iter().any(|p| p.is_match(text));
        let credit = mentions(&self.credit);
        let debit = mentions(&self.debit);

        match (credit, debit) {
            (true, true) => Some(CardType::Either),
            (true, false) => Some(CardType::Credit),
            (false, true) => Some(CardType::Debit),
            (false, false) if mentions(&self.card) => Some(CardType::Either),
            _ => None,
        }
    }

    /// Validity window text
    pub fn extract_validity(&self, text: &str) -> Option<String> {
        self.validity.iter().find_map(|pattern| {
            pattern
                .captures(text)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }
}

impl Default for OfferParser {
    fn default() -> Self {
        Self::new()
    }
}
