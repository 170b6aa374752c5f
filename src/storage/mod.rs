pub mod cache;
pub mod checkpoint;
pub mod dataset;
pub mod merge;
pub mod normalize;
pub mod visited;

// Re-export common types
pub use cache::{CacheEntry, ResultCache};
pub use checkpoint::{write_atomic, CheckpointWriter};
pub use dataset::Dataset;
pub use merge::{merge_shards, MergeReport};
pub use normalize::normalize_url;
pub use visited::{VisitOutcome, VisitedLog};
