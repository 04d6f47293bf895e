//! Scheduling and execution of multi-shard searches.
//!
//! The [`SearchScheduler`] turns one search into a [`ShardSearchTask`] per
//! shard, runs them on a shared worker pool under a node-wide and a
//! per-search thread budget, and streams matches through a
//! [`crate::queue::DocIdQueue`] to value-extraction consumers.

pub mod events;
pub mod extraction;
pub mod gate;
pub mod metrics;
pub mod scheduler;
pub mod task;

pub use self::events::{
    CancellationToken, ProgressPublisher, SearchEvent, SearchHandle, SearchOutcome, ShardError,
    ShardErrorKind,
};
pub use self::extraction::{
    CollectingHitReceiver, ExtractedHit, ExtractionStats, HitBatch, HitReceiver, ShardRegistry,
};
pub use self::gate::{GatePermit, TaskGate};
pub use self::metrics::{SearchMetrics, SearchMetricsCollector};
pub use self::scheduler::SearchScheduler;
pub use self::task::{ShardSearchTask, TaskContext, TaskReport, TaskStatus};
