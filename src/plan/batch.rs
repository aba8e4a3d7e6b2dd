//! Execution plan representation: batches, workspace assignments, and
//! predicted conflicts.

use crate::core::epic::EpicId;
use crate::core::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Batch numbers are 1-based and monotonic within a plan.
pub type BatchNumber = u32;

/// Unique identifier for an execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of epics eligible to run together, bounded by a merge barrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// 1-based batch number.
    pub number: BatchNumber,
    /// Epics scheduled into this batch.
    pub epic_ids: Vec<EpicId>,
    /// Union of the batch epics' tasks.
    pub task_ids: Vec<TaskId>,
    /// Whether the batch holds independent parallel epics.
    pub can_parallel: bool,
    /// Batches that must be fully merged before this one starts.
    pub depends_on: Vec<BatchNumber>,
}

/// A heuristically detected file-path collision between tasks scheduled
/// into the same batch. Advisory only; never blocks scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedConflict {
    /// The overlapping path token.
    pub path: String,
    /// Tasks whose descriptions reference the path.
    pub task_ids: Vec<TaskId>,
}

/// Workspace assignment for one epic: a deterministic branch name and
/// on-disk path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    pub epic_id: EpicId,
    pub branch: String,
    pub path: PathBuf,
}

impl WorkspaceSpec {
    /// Derive the workspace assignment for an epic.
    ///
    /// Branch and path depend only on (project, epic id), so re-planning
    /// the same project yields the same assignments.
    pub fn derive(project: &str, epic_id: EpicId, workspace_root: &PathBuf) -> Self {
        Self {
            epic_id,
            branch: format!("{}/epic/{}", project, epic_id.short()),
            path: workspace_root.join(format!("{}-{}", project, epic_id.short())),
        }
    }
}

/// An ordered sequence of batches plus workspace assignments.
///
/// Immutable once built; the executor mutates only per-task/per-batch
/// status, which lives in the run state rather than here. Re-planning
/// produces a new plan via [`ExecutionPlan::next_version`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    /// Project the plan was built for; used to derive branch names.
    pub project: String,
    /// Monotonic plan version; re-planning bumps this.
    pub version: u32,
    pub batches: Vec<Batch>,
    pub workspace_assignments: BTreeMap<EpicId, WorkspaceSpec>,
    pub predicted_conflicts: Vec<PredictedConflict>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Create an empty plan shell for a project.
    pub fn new(project: &str) -> Self {
        Self {
            id: PlanId::new(),
            project: project.to_string(),
            version: 1,
            batches: Vec::new(),
            workspace_assignments: BTreeMap::new(),
            predicted_conflicts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Total number of epics across all batches.
    pub fn epic_count(&self) -> usize {
        self.batches.iter().map(|b| b.epic_ids.len()).sum()
    }

    /// Total number of tasks across all batches.
    pub fn task_count(&self) -> usize {
        self.batches.iter().map(|b| b.task_ids.len()).sum()
    }

    /// Whether the plan schedules anything at all.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Derive a fresh plan id/version for re-planning. The old plan is
    /// left untouched.
    pub fn next_version(&self) -> Self {
        let mut plan = self.clone();
        plan.id = PlanId::new();
        plan.version = self.version + 1;
        plan.created_at = Utc::now();
        plan
    }
}
