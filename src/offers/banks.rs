use regex::Regex;
use std::sync::OnceLock;

/// Canonical bank and payment-provider names with the aliases seen in offer text
const BANK_ALIASES: &[(&str, &[&str])] = &[
    // Public sector
    ("State Bank of India", &["SBI", "State Bank", "State Bank of India", "SBI Bank"]),
    ("Punjab National Bank", &["PNB", "Punjab National Bank", "PNB Bank"]),
    ("Bank of Baroda", &["BoB", "Bank of Baroda", "Baroda", "BoB Bank"]),
    ("Canara Bank", &["Canara", "Canara Bank"]),
    ("Union Bank of India", &["Union Bank", "Union Bank of India"]),
    ("Indian Bank", &["Indian Bank"]),
    ("Bank of India", &["Bank of India"]),
    ("UCO Bank", &["UCO", "UCO Bank"]),
    ("Indian Overseas Bank", &["IOB", "Indian Overseas Bank", "IOB Bank"]),
    ("Central Bank of India", &["Central Bank", "Central Bank of India"]),
    ("Bank of Maharashtra", &["Bank of Maharashtra", "Maharashtra Bank"]),
    // Private sector
    ("HDFC Bank", &["HDFC", "HDFC Bank"]),
    ("ICICI Bank", &["ICICI", "ICICI Bank"]),
    ("Axis Bank", &["Axis", "Axis Bank"]),
    ("Kotak Mahindra Bank", &["Kotak", "Kotak Mahindra", "Kotak Mahindra Bank"]),
    ("IndusInd Bank", &["IndusInd", "IndusInd Bank"]),
    ("Yes Bank", &["Yes Bank"]),
    ("IDFC FIRST Bank", &["IDFC", "IDFC FIRST", "IDFC Bank", "IDFC FIRST Bank"]),
    ("Federal Bank", &["Federal Bank"]),
    ("RBL Bank", &["RBL", "RBL Bank"]),
    ("Bandhan Bank", &["Bandhan Bank"]),
    // Small finance
    ("AU Small Finance Bank", &["AU", "AU Bank", "AU Small Finance", "AU Small Finance Bank"]),
    ("Equitas Small Finance Bank", &["Equitas", "Equitas Bank", "Equitas Small Finance Bank"]),
    ("Ujjivan Small Finance Bank", &["Ujjivan", "Ujjivan Bank", "Ujjivan Small Finance Bank"]),
    // Foreign
    ("Citibank", &["Citi", "Citibank"]),
    ("HSBC Bank", &["HSBC", "HSBC Bank"]),
    ("Standard Chartered Bank", &["Standard Chartered", "StanChart", "Standard Chartered Bank"]),
    ("DBS Bank", &["DBS", "DBS Bank"]),
    // Card issuers and wallets
    ("American Express", &["Amex", "American Express"]),
    ("OneCard", &["OneCard", "One Card"]),
    ("Airtel Payments Bank", &["Airtel Payments Bank", "Airtel Payments"]),
    ("Amazon Pay", &["Amazon Pay", "AmazonPay", "Amazon Pay UPI"]),
    ("PhonePe", &["PhonePe", "Phone Pe"]),
    ("Google Pay", &["Google Pay", "GooglePay", "GPay", "G Pay"]),
    ("Paytm", &["Paytm"]),
    ("MobiKwik", &["MobiKwik", "Mobi Kwik"]),
    ("CRED", &["CRED"]),
    ("PayZapp", &["PayZapp", "Pay Zapp"]),
    ("Flipkart Axis Bank", &["Flipkart Axis", "Flipkart Axis Bank"]),
    ("BHIM", &["BHIM"]),
    ("UPI", &["UPI", "Unified Payments Interface"]),
];

/// Card networks, checked in order
pub const CARD_PROVIDERS: &[&str] = &[
    "Visa",
    "Mastercard",
    "RuPay",
    "American Express",
    "Diners Club",
    "Discover",
    "Maestro",
];

struct AliasPattern {
    canonical: &'static str,
    alias_len: usize,
    regex: Regex,
}

/// Alias patterns ordered longest first, so "AU Small Finance Bank" is tried before "AU"
fn alias_patterns() -> &'static [AliasPattern] {
    static PATTERNS: OnceLock<Vec<AliasPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns: Vec<AliasPattern> = BANK_ALIASES
            .iter()
            .flat_map(|&(canonical, aliases)| {
                aliases.iter().filter_map(move |alias| {
                    let regex = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(alias))).ok()?;
                    Some(AliasPattern {
                        canonical,
                        alias_len: alias.chars().count(),
                        regex,
                    })
                })
            })
            .collect();

        // Stable sort keeps table order between aliases of equal length
        patterns.sort_by(|a, b| b.alias_len.cmp(&a.alias_len));
        patterns
    })
}

/// Resolve the canonical bank or payment provider mentioned in `text`
pub fn match_bank(text: &str) -> Option<&'static str> {
    if text.trim().is_empty() {
        return None;
    }

    alias_patterns()
        .iter()
        .find(|pattern| pattern.regex.is_match(text))
        .map(|pattern| pattern.canonical)
}

/// Resolve the card network mentioned in `text`
pub fn match_card_provider(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    CARD_PROVIDERS
        .iter()
        .copied()
        .find(|provider| lower.contains(&provider.to_lowercase()))
        .or_else(|| lower.contains("master card").then_some("Mastercard"))
}
