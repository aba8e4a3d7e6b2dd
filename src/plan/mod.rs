//! Plan construction and persistence.

pub mod batch;
pub mod builder;
pub mod store;

pub use batch::{Batch, BatchNumber, ExecutionPlan, PlanId, PredictedConflict, WorkspaceSpec};
pub use builder::PlanBuilder;
pub use store::PlanStore;
