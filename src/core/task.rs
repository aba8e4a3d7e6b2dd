//! Task data model.
//!
//! Tasks are the smallest dispatchable units of work, executed by the
//! external task-runner collaborator against their epic's workspace.

use crate::core::epic::EpicId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Whether a dependency gates dispatch or merely advises ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStrength {
    /// Blocks start until the dependency task is Completed.
    Hard,
    /// Advisory; contributes to ordering but never blocks dispatch.
    Soft,
}

/// A declared dependency on another task, same-epic or cross-epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: TaskId,
    pub strength: DependencyStrength,
}

impl TaskDependency {
    pub fn hard(task_id: TaskId) -> Self {
        Self {
            task_id,
            strength: DependencyStrength::Hard,
        }
    }

    pub fn soft(task_id: TaskId) -> Self {
        Self {
            task_id,
            strength: DependencyStrength::Soft,
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Currently executing in the task runner.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed with an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// The smallest dispatchable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// The epic this task belongs to.
    pub epic_id: EpicId,
    /// Human-readable name.
    pub name: String,
    /// What the task should accomplish. Path-like tokens in here feed
    /// the plan builder's conflict prediction.
    pub description: String,
    /// Scheduling priority; lower runs first among ties.
    pub priority: u32,
    /// Declared dependencies on other tasks.
    pub depends_on: Vec<TaskDependency>,
    /// Whether the task has been marked done.
    pub done: bool,
    /// Current execution status.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task started execution.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task in an epic.
    pub fn new(epic_id: EpicId, name: &str, description: &str) -> Self {
        Self {
            id: TaskId::new(),
            epic_id,
            name: name.to_string(),
            description: description.to_string(),
            priority: 0,
            depends_on: Vec::new(),
            done: false,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Declare a dependency on another task.
    pub fn with_dependency(mut self, dep: TaskDependency) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Hard dependencies only.
    pub fn hard_dependencies(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.depends_on
            .iter()
            .filter(|d| d.strength == DependencyStrength::Hard)
            .map(|d| d.task_id)
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to Completed, set the done flag and completion time.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.done = true;
        self.completed_at = Some(Utc::now());
    }

    /// Transition to Failed with an error message.
    pub fn fail(&mut self, error: &str) {
        self.status = TaskStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Completed | TaskStatus::Failed { .. }
        )
    }
}
