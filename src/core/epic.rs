//! Epic data model.
//!
//! Epics are coarse units of work composed of tasks. An epic is either
//! parallel (batched with every other parallel epic) or sequential
//! (ordered by its declared epic dependencies).

use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an epic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EpicId(pub Uuid);

impl EpicId {
    /// Create a new unique epic identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for EpicId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EpicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EpicId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Whether an epic may run alongside other epics or must wait on
/// declared epic dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicType {
    /// No blocking dependencies; scheduled into the first batch.
    Parallel,
    /// Ordered by `depends_on_epics`; batched by dependency level.
    Sequential,
}

impl std::fmt::Display for EpicType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpicType::Parallel => write!(f, "parallel"),
            EpicType::Sequential => write!(f, "sequential"),
        }
    }
}

/// Epic lifecycle status, mutated only by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum EpicStatus {
    /// Created during planning, not yet scheduled.
    Planned,
    /// At least one task dispatched.
    Running,
    /// All tasks reached Completed.
    Completed,
    /// At least one task failed, or the workspace was abandoned.
    Failed {
        /// What failed the epic.
        error: String,
    },
}

impl Default for EpicStatus {
    fn default() -> Self {
        Self::Planned
    }
}

/// The closed set of mutations permitted on an epic after creation.
///
/// The planner adjusts type and dependencies, the executor adjusts
/// status. There is no field-name-driven generic update path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum EpicChange {
    SetType { epic_type: EpicType },
    SetDependsOn { depends_on_epics: Vec<EpicId> },
    SetStatus { status: EpicStatus },
}

/// A coarse unit of work composed of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    /// Unique identifier for this epic.
    pub id: EpicId,
    /// Human-readable name.
    pub name: String,
    /// Domain tag (e.g. "backend", "frontend").
    pub domain: String,
    /// Parallel or sequential scheduling.
    pub epic_type: EpicType,
    /// Epic-level dependencies; only meaningful for sequential epics.
    pub depends_on_epics: Vec<EpicId>,
    /// Ordered task membership.
    pub tasks: Vec<TaskId>,
    /// Current lifecycle status.
    pub status: EpicStatus,
    /// When the epic was created.
    pub created_at: DateTime<Utc>,
}

impl Epic {
    /// Create a new parallel epic with no dependencies.
    pub fn new(name: &str, domain: &str) -> Self {
        Self {
            id: EpicId::new(),
            name: name.to_string(),
            domain: domain.to_string(),
            epic_type: EpicType::Parallel,
            depends_on_epics: Vec::new(),
            tasks: Vec::new(),
            status: EpicStatus::Planned,
            created_at: Utc::now(),
        }
    }

    /// Create a sequential epic depending on the given epics.
    pub fn sequential(name: &str, domain: &str, depends_on: Vec<EpicId>) -> Self {
        let mut epic = Self::new(name, domain);
        epic.epic_type = EpicType::Sequential;
        epic.depends_on_epics = depends_on;
        epic
    }

    /// Apply one of the permitted mutations.
    pub fn apply(&mut self, change: EpicChange) {
        match change {
            EpicChange::SetType { epic_type } => self.epic_type = epic_type,
            EpicChange::SetDependsOn { depends_on_epics } => {
                self.depends_on_epics = depends_on_epics
            }
            EpicChange::SetStatus { status } => self.status = status,
        }
    }

    /// Register a task as belonging to this epic.
    pub fn add_task(&mut self, task_id: TaskId) {
        self.tasks.push(task_id);
    }

    /// Check if the epic reached a terminal status.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            EpicStatus::Completed | EpicStatus::Failed { .. }
        )
    }
}
