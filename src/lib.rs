pub mod browser;
pub mod cli;
pub mod crawler;
pub mod error;
pub mod offers;
pub mod planner;
pub mod proxy;
pub mod recovery;
pub mod storage;
pub mod utils;

pub use error::HarvestError;
