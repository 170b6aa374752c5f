pub mod banks;
pub mod model;
pub mod parser;
pub mod ranking;

// Re-export common types
pub use model::{CardType, Offer, OfferType, RankedOffer, RawOffer};
pub use parser::OfferParser;
pub use ranking::{rank, score};
