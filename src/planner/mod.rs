pub mod shard;

// Re-export common types
pub use shard::{partition, plan, shard_output_name, shard_range, PlanInput, ShardAssignment, ShardPlan};
