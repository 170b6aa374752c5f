use std::cmp::Ordering;

use crate::offers::model::{Offer, OfferType, RankedOffer};

const BASE_SCORE: f64 = 80.0;
const MAX_DISCOUNT_POINTS: f64 = 50.0;
const NO_MIN_SPEND_BONUS: f64 = 20.0;
const HEAVY_PENALTY_SCORE: f64 = 15.0;
const PENALTY_FLOOR: f64 = 20.0;
const INSTANT_BONUS: f64 = 5.0;

/// Score a bank offer against a page price.
///
/// Steps, in order:
/// 1. start at 80
/// 2. add `min(a / p * 200, 50)` when both price and amount are positive
/// 3. adjust for minimum spend: a shortfall above 50% of the price pins the
///    score to 15, a smaller shortfall costs half its percentage (floored at 20),
///    no minimum spend adds 20, and a minimum spend at or below 90% of the price
///    adds up to 10
/// 4. add 5 for instant discounts
/// 5. clamp to [0, 100]
pub fn score(amount: f64, min_spend: Option<f64>, price: f64, is_instant: bool) -> f64 {
    let mut score = BASE_SCORE;

    if price > 0.0 && amount > 0.0 {
        score += (amount / price * 100.0 * 2.0).min(MAX_DISCOUNT_POINTS);
    }

    match min_spend {
        Some(min) if min > price => {
            // Without a positive price the shortfall is unbounded
            let penalty_pct = if price > 0.0 {
                (min - price) / price * 100.0
            } else {
                f64::INFINITY
            };

            if penalty_pct > 50.0 {
                score = HEAVY_PENALTY_SCORE;
            } else {
                score -= penalty_pct * 0.5;
                score = score.max(PENALTY_FLOOR);
            }
        }
        Some(min) => {
            if price > 0.0 && min / price <= 0.9 {
                score += (1.0 - min / price) * 10.0;
            }
        }
        None => score += NO_MIN_SPEND_BONUS,
    }

    if is_instant {
        score += INSTANT_BONUS;
    }

    score.clamp(0.0, 100.0)
}

/// Whether the offer applies at `price`, and the price after applying it
pub fn applicability(offer: &Offer, price: f64) -> (bool, f64) {
    match offer.min_spend {
        Some(min) if price < min => (false, price),
        _ => (true, (price - offer.amount).max(0.0)),
    }
}

/// Score and rank one page's offers.
///
/// Bank offers come first, ordered by score descending with ties kept in
/// discovery order, and carry 1-based ranks. Every other offer follows in
/// discovery order with no score or rank.
pub fn rank(offers: &[Offer], price: f64) -> Vec<RankedOffer> {
    let mut bank_offers: Vec<RankedOffer> = Vec::new();
    let mut other_offers: Vec<RankedOffer> = Vec::new();

    for offer in offers {
        let (is_applicable, net_effective_price) = applicability(offer, price);
        let is_bank = offer.offer_type == OfferType::BankOffer;
        let score = is_bank.then(|| score(offer.amount, offer.min_spend, price, offer.is_instant));

        let ranked = RankedOffer {
            offer: offer.clone(),
            score,
            rank: None,
            net_effective_price,
            is_applicable,
            note: note(offer, price, is_applicable, net_effective_price),
        };

        if is_bank {
            bank_offers.push(ranked);
        } else {
            other_offers.push(ranked);
        }
    }

    // sort_by is stable, ties keep discovery order
    bank_offers.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .partial_cmp(&a.score.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    });

    for (index, offer) in bank_offers.iter_mut().enumerate() {
        offer.rank = Some(index + 1);
    }

    bank_offers.extend(other_offers);
    bank_offers
}

/// Short reader-facing explanation of what the offer means at this price
fn note(offer: &Offer, price: f64, is_applicable: bool, net_effective_price: f64) -> String {
    let mut parts = Vec::new();

    if !is_applicable {
        if let Some(min) = offer.min_spend {
            parts.push(format!(
                "Not applicable: requires a minimum purchase of ₹{:.0}, price is ₹{:.0} (₹{:.0} short).",
                min,
                price,
                min - price
            ));
        }
        if offer.amount > 0.0 {
            parts.push(format!("Would save ₹{:.0} once the minimum is met.", offer.amount));
        }
    } else if offer.amount > 0.0 {
        let savings = price - net_effective_price;
        if price > 0.0 {
            parts.push(format!(
                "Save ₹{:.0} ({:.1}%): pay ₹{:.0} instead of ₹{:.0}.",
                savings,
                savings / price * 100.0,
                net_effective_price,
                price
            ));
        } else {
            parts.push(format!("Save up to ₹{:.0}.", offer.amount));
        }
        if offer.offer_type == OfferType::Cashback || !offer.is_instant {
            parts.push("Credited after purchase.".to_string());
        }
    } else {
        parts.push(format!("{} with no fixed discount amount.", offer.offer_type.label()));
    }

    match (&offer.bank, offer.card_type) {
        (Some(bank), Some(card)) => parts.push(format!("Pay with {} {}.", bank, card.label())),
        (Some(bank), None) => parts.push(format!("Pay with {}.", bank)),
        _ => {}
    }

    if let Some(validity) = &offer.validity {
        parts.push(format!("Valid {}.", validity));
    }

    parts.join(" ")
}
