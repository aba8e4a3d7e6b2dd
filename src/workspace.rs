//! Workspace lifecycle management.
//!
//! Each epic gets exactly one workspace per run: a branch plus a worktree
//! directory, both derived deterministically from the project and epic
//! identifiers. The manager owns the state machine
//! `pending -> active -> {merged | conflict | abandoned} -> cleanup`.

use crate::core::epic::EpicId;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::plan::batch::WorkspaceSpec;
use crate::{mlog_debug, mlog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Workspace lifecycle status.
///
/// Transitions only move forward, with one exception: `Conflict` returns
/// to `Active` once the conflict is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Pending,
    Active,
    Merged,
    Conflict,
    Abandoned,
    Cleanup,
}

impl WorkspaceStatus {
    /// Check whether a transition is legal.
    pub fn can_transition(self, to: WorkspaceStatus) -> bool {
        use WorkspaceStatus::*;
        matches!(
            (self, to),
            (Pending, Active)
                | (Pending, Abandoned)
                | (Active, Merged)
                | (Active, Conflict)
                | (Active, Abandoned)
                | (Conflict, Active)
                | (Merged, Cleanup)
                | (Abandoned, Cleanup)
                // Teardown is idempotent
                | (Cleanup, Cleanup)
        )
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkspaceStatus::Pending => "pending",
            WorkspaceStatus::Active => "active",
            WorkspaceStatus::Merged => "merged",
            WorkspaceStatus::Conflict => "conflict",
            WorkspaceStatus::Abandoned => "abandoned",
            WorkspaceStatus::Cleanup => "cleanup",
        };
        write!(f, "{}", s)
    }
}

/// One isolated branch+directory pair scoped to an epic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub epic_id: EpicId,
    pub project: String,
    pub branch: String,
    pub path: PathBuf,
    pub status: WorkspaceStatus,
    /// Integration point recorded when the workspace merges.
    pub merge_commit: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creates, tracks, and tears down one workspace per epic.
pub struct WorkspaceManager {
    git: GitOps,
    project: String,
    workspaces: HashMap<EpicId, Workspace>,
}

impl WorkspaceManager {
    pub fn new(git: GitOps, project: &str) -> Self {
        Self {
            git,
            project: project.to_string(),
            workspaces: HashMap::new(),
        }
    }

    pub fn git(&self) -> &GitOps {
        &self.git
    }

    pub fn get(&self, epic_id: &EpicId) -> Option<&Workspace> {
        self.workspaces.get(epic_id)
    }

    /// Create the workspace for an epic, or return the existing active
    /// one. Idempotent per (project, epic): a second call never creates
    /// a duplicate branch or directory.
    ///
    /// On a git failure the workspace is recorded as `Abandoned` and the
    /// error propagates; the caller fails the epic's tasks and moves on
    /// to sibling epics.
    pub fn create(&mut self, spec: &WorkspaceSpec) -> Result<&Workspace> {
        let already_active = self
            .workspaces
            .get(&spec.epic_id)
            .map(|ws| ws.status == WorkspaceStatus::Active)
            .unwrap_or(false);
        if already_active {
            mlog_debug!(
                "Workspace for epic {} already active, reusing",
                spec.epic_id.short()
            );
            return Ok(&self.workspaces[&spec.epic_id]);
        }

        mlog_debug!(
            "WorkspaceManager::create epic={} branch={} path={}",
            spec.epic_id.short(),
            spec.branch,
            spec.path.display()
        );

        let mut workspace = Workspace {
            epic_id: spec.epic_id,
            project: self.project.clone(),
            branch: spec.branch.clone(),
            path: spec.path.clone(),
            status: WorkspaceStatus::Pending,
            merge_commit: None,
            created_at: Utc::now(),
        };

        match self.git.create_workspace(&spec.branch, &spec.path) {
            Ok(()) => {
                workspace.status = WorkspaceStatus::Active;
                self.workspaces.insert(spec.epic_id, workspace);
                Ok(&self.workspaces[&spec.epic_id])
            }
            Err(e) => {
                mlog_warn!(
                    "Workspace creation failed for epic {}: {}",
                    spec.epic_id.short(),
                    e
                );
                workspace.status = WorkspaceStatus::Abandoned;
                self.workspaces.insert(spec.epic_id, workspace);
                Err(Error::Workspace {
                    epic: spec.epic_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn transition(&mut self, epic_id: &EpicId, to: WorkspaceStatus) -> Result<&mut Workspace> {
        let workspace = self
            .workspaces
            .get_mut(epic_id)
            .ok_or_else(|| Error::Workspace {
                epic: epic_id.to_string(),
                reason: "no workspace for epic".to_string(),
            })?;
        if !workspace.status.can_transition(to) {
            return Err(Error::InvalidWorkspaceTransition {
                from: workspace.status.to_string(),
                to: to.to_string(),
            });
        }
        mlog_debug!(
            "Workspace {} transition {} -> {}",
            epic_id.short(),
            workspace.status,
            to
        );
        workspace.status = to;
        Ok(workspace)
    }

    /// Record a successful merge and its integration point.
    pub fn mark_merged(&mut self, epic_id: &EpicId, commit: &str) -> Result<()> {
        let workspace = self.transition(epic_id, WorkspaceStatus::Merged)?;
        workspace.merge_commit = Some(commit.to_string());
        Ok(())
    }

    /// Record a merge conflict.
    pub fn mark_conflict(&mut self, epic_id: &EpicId) -> Result<()> {
        self.transition(epic_id, WorkspaceStatus::Conflict)?;
        Ok(())
    }

    /// Return a conflicted workspace to active after resolution.
    pub fn resolve(&mut self, epic_id: &EpicId) -> Result<()> {
        self.transition(epic_id, WorkspaceStatus::Active)?;
        Ok(())
    }

    /// Abandon a workspace after an infrastructure failure.
    pub fn abandon(&mut self, epic_id: &EpicId) -> Result<()> {
        self.transition(epic_id, WorkspaceStatus::Abandoned)?;
        Ok(())
    }

    /// Remove the workspace's directory and branch.
    ///
    /// Only legal once the workspace is `Merged` or `Abandoned`.
    /// Terminal and idempotent: calling it again is a no-op.
    pub fn teardown(&mut self, epic_id: &EpicId) -> Result<()> {
        let (branch, path) = {
            let workspace = self.transition(epic_id, WorkspaceStatus::Cleanup)?;
            (workspace.branch.clone(), workspace.path.clone())
        };
        if path.exists() {
            self.git.remove_workspace(&path)?;
        }
        self.git.delete_branch(&branch)?;
        Ok(())
    }

    /// All tracked workspaces, for reporting.
    pub fn workspaces(&self) -> impl Iterator<Item = &Workspace> {
        self.workspaces.values()
    }
}
