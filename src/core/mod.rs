//! Core data model: epics, tasks, the dependency graph, and cost records.

pub mod cost;
pub mod epic;
pub mod graph;
pub mod task;

pub use cost::{CostEntry, CostLedger, SessionId};
pub use epic::{Epic, EpicChange, EpicId, EpicStatus, EpicType};
pub use graph::DependencyGraph;
pub use task::{DependencyStrength, Task, TaskDependency, TaskId, TaskStatus};
