//! Task-runner collaborator contract.
//!
//! The engine never executes task work itself; it hands each task's
//! specification and workspace path to an external agent and awaits a
//! terminal result. This trait is the engine's single process boundary
//! and its one suspension point per task. Per-task timeouts, if any, are
//! the runner's responsibility.

use crate::core::cost::SessionId;
use crate::core::epic::EpicId;
use crate::core::task::{Task, TaskId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What the external agent receives for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: TaskId,
    pub epic_id: EpicId,
    pub name: String,
    pub description: String,
}

impl TaskSpec {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            epic_id: task.epic_id,
            name: task.name.clone(),
            description: task.description.clone(),
        }
    }
}

/// Token usage reported by the runner for cost recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUsage {
    pub session_id: SessionId,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

/// Terminal status reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Failed,
}

/// Result of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    /// Files the agent reports having produced or modified.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    pub error: Option<String>,
    pub usage: Option<TaskUsage>,
}

impl TaskOutcome {
    pub fn completed() -> Self {
        Self {
            status: OutcomeStatus::Completed,
            artifacts: Vec::new(),
            error: None,
            usage: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            artifacts: Vec::new(),
            error: Some(error.to_string()),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TaskUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// External collaborator that performs a task inside a workspace.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run one task to a terminal result.
    ///
    /// An `Err` return means the runner infrastructure itself failed,
    /// which the engine records the same way as a failed outcome.
    async fn run(&self, spec: &TaskSpec, workspace_path: &Path) -> Result<TaskOutcome>;
}
