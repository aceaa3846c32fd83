//! Sync engine: delta planning, tail compensation, batched loads with a
//! single in-flight job, and the orchestrator tying them together.

pub mod coordinator;
pub mod job_monitor;
pub mod planner;
pub mod progress;
pub mod tail;
pub mod version;

pub use coordinator::{
    Coordinator, CoordinatorBuilder, SyncOutcome, SyncReport, SyncRequest,
};
pub use job_monitor::{
    CompletedJob, InFlight, LoadJobMonitor, MonitorConfig, SubmittedJob,
};
pub use planner::{BatchWindow, DeltaPlanner, PlanMode, SyncPlan, plan_batches};
pub use progress::{ProgressCallback, SyncProgress, emit, log_progress};
pub use tail::TailCompensation;
