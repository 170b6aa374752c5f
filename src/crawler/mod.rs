pub mod controller;
pub mod extractor;
pub mod pool;
pub mod scheduler;
pub mod sink;
pub mod task;

// Re-export common types
pub use controller::{default_output_path, select_tasks, RunController, RunRequest};
pub use extractor::{parse_price, Extractor, PageState, SelectorExtractor};
pub use pool::{RunSummary, SessionPool};
pub use scheduler::{Decision, Scheduler};
pub use sink::ResultSink;
pub use task::{PageObservation, ShardInfo, Snapshot, StockState, Task, TaskOutcome};
