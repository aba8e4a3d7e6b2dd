//! Orchestration: the scheduler, merge coordination, progress events,
//! and the task-runner boundary.

pub mod events;
pub mod executor;
pub mod merge;
pub mod runner;

pub use events::{EventSink, ProgressEvent, ProgressKind};
pub use executor::{ParallelExecutor, RunContext, RunReport, RunStatus, RunVerdict};
pub use merge::{BatchIntegration, IntegrationOutcome, MergeCoordinator};
pub use runner::{OutcomeStatus, TaskOutcome, TaskRunner, TaskSpec, TaskUsage};
