//! Batch integration: merging epic workspaces back into the trunk.
//!
//! After a batch's epics finish, each workspace branch is merged into the
//! trunk in ascending epic-id order so merges are reproducible across
//! runs. A conflict halts further integration for the batch; validation
//! runs once after all clean merges and gates advancement to the next
//! batch.

use crate::core::epic::EpicId;
use crate::git::MergeOutcome;
use crate::mlog_debug;
use crate::mlog_warn;
use crate::plan::batch::{Batch, BatchNumber};
use crate::workspace::{WorkspaceManager, WorkspaceStatus};
use crate::Result;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;

/// How a batch integration ended.
#[derive(Debug, Clone)]
pub enum IntegrationOutcome {
    /// Every workspace merged and validation passed.
    Clean,
    /// A workspace hit a merge conflict. Later siblings in the batch are
    /// left active, not merged.
    Conflicted {
        epic_id: EpicId,
        branch: String,
        paths: Vec<String>,
    },
    /// Merges were clean but a validation command failed. The merges are
    /// not rolled back; the batch is not advanceable until addressed.
    ValidationFailed { command: String, stderr: String },
}

/// Result of integrating one batch.
#[derive(Debug, Clone)]
pub struct BatchIntegration {
    pub batch: BatchNumber,
    /// Workspaces merged before the outcome was decided, with their
    /// integration commits.
    pub merged: Vec<(EpicId, String)>,
    pub outcome: IntegrationOutcome,
}

impl BatchIntegration {
    pub fn is_clean(&self) -> bool {
        matches!(self.outcome, IntegrationOutcome::Clean)
    }
}

/// Integrates finished batches into the trunk.
pub struct MergeCoordinator {
    workspaces: Arc<RwLock<WorkspaceManager>>,
    trunk_branch: String,
    validation_commands: Vec<String>,
}

impl MergeCoordinator {
    pub fn new(
        workspaces: Arc<RwLock<WorkspaceManager>>,
        trunk_branch: &str,
        validation_commands: Vec<String>,
    ) -> Self {
        Self {
            workspaces,
            trunk_branch: trunk_branch.to_string(),
            validation_commands,
        }
    }

    /// Integrate every active workspace of a batch into the trunk.
    pub async fn integrate(&self, batch: &Batch) -> Result<BatchIntegration> {
        let mut merged: Vec<(EpicId, String)> = Vec::new();

        // Ascending epic id keeps merge order deterministic.
        let mut epic_ids = batch.epic_ids.clone();
        epic_ids.sort();

        {
            let mut manager = self.workspaces.write().await;
            manager.git().checkout_branch(&self.trunk_branch)?;

            for epic_id in &epic_ids {
                let Some(workspace) = manager.get(epic_id) else {
                    // Epic never got a workspace (e.g. empty epic); nothing to merge.
                    continue;
                };
                if workspace.status != WorkspaceStatus::Active {
                    mlog_debug!(
                        "Skipping workspace {} in status {}",
                        epic_id.short(),
                        workspace.status
                    );
                    continue;
                }
                let branch = workspace.branch.clone();

                match manager.git().merge_branch(&branch)? {
                    MergeOutcome::Merged { commit } | MergeOutcome::UpToDate { commit } => {
                        manager.mark_merged(epic_id, &commit)?;
                        merged.push((*epic_id, commit));
                    }
                    MergeOutcome::Conflicted { paths } => {
                        manager.mark_conflict(epic_id)?;
                        mlog_warn!(
                            "Merge conflict on {} ({} files); halting batch {}",
                            branch,
                            paths.len(),
                            batch.number
                        );
                        return Ok(BatchIntegration {
                            batch: batch.number,
                            merged,
                            outcome: IntegrationOutcome::Conflicted {
                                epic_id: *epic_id,
                                branch,
                                paths,
                            },
                        });
                    }
                }
            }
        }

        if let Some((command, stderr)) = self.run_validation().await? {
            return Ok(BatchIntegration {
                batch: batch.number,
                merged,
                outcome: IntegrationOutcome::ValidationFailed { command, stderr },
            });
        }

        // Merged-and-validated workspaces are done; reclaim them.
        {
            let mut manager = self.workspaces.write().await;
            for (epic_id, _) in &merged {
                if let Err(e) = manager.teardown(epic_id) {
                    mlog_warn!("Teardown failed for epic {}: {}", epic_id.short(), e);
                }
            }
        }

        Ok(BatchIntegration {
            batch: batch.number,
            merged,
            outcome: IntegrationOutcome::Clean,
        })
    }

    /// Run the configured validation commands in the trunk working
    /// directory. Returns the first failure, if any.
    async fn run_validation(&self) -> Result<Option<(String, String)>> {
        let repo_path = {
            let manager = self.workspaces.read().await;
            manager.git().repo_path().to_path_buf()
        };

        for command in &self.validation_commands {
            mlog_debug!("Running validation command: {}", command);
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&repo_path)
                .output()
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                mlog_warn!("Validation failed: {}: {}", command, stderr.trim());
                return Ok(Some((command.clone(), stderr)));
            }
        }
        Ok(None)
    }
}
