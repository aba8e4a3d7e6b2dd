use std::path::{Path, PathBuf};

use git2::{ErrorCode, IndexAddOption, MergeOptions, Repository, Signature};

use crate::{mlog_debug, mlog_warn, Result};

/// Outcome of merging a workspace branch into the trunk.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Merge completed; `commit` is the integration point.
    Merged { commit: String },
    /// The trunk already contained the branch's work.
    UpToDate { commit: String },
    /// Merge hit conflicts; the trunk was left untouched.
    Conflicted { paths: Vec<String> },
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Merged { .. } | Self::UpToDate { .. })
    }
}

pub struct GitOps {
    repo_path: PathBuf,
}

impl GitOps {
    pub fn new(repo_path: &Path) -> Result<Self> {
        mlog_debug!("GitOps::new path={}", repo_path.display());
        let _ = Repository::discover(repo_path)?;
        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    fn repo(&self) -> Result<Repository> {
        Ok(Repository::discover(&self.repo_path)?)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Create a branch from HEAD and materialize it as a worktree.
    pub fn create_workspace(&self, branch: &str, workspace_path: &Path) -> Result<()> {
        mlog_debug!(
            "GitOps::create_workspace branch={} path={}",
            branch,
            workspace_path.display()
        );
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        let branch_obj = repo.branch(branch, &commit, false)?;
        let branch_ref = branch_obj.into_reference();
        let mut opts = git2::WorktreeAddOptions::new();
        opts.reference(Some(&branch_ref));
        // Use the path's folder name as the worktree name (branch contains slashes)
        let worktree_name = workspace_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(branch);
        repo.worktree(worktree_name, workspace_path, Some(&opts))?;
        mlog_debug!("Workspace created: {}", worktree_name);
        Ok(())
    }

    /// Remove a workspace worktree and clean up all associated resources.
    /// This function attempts cleanup even if some operations fail.
    /// It's critical that we fully disassociate the branch from the worktree,
    /// otherwise branch deletion will fail with "branch is already checked out".
    pub fn remove_workspace(&self, workspace_path: &Path) -> Result<()> {
        mlog_debug!(
            "GitOps::remove_workspace path={}",
            workspace_path.display()
        );
        let repo = self.repo()?;
        let worktrees = repo.worktrees()?;

        // Try to find the worktree by path (may fail due to path canonicalization)
        let worktree_name: Option<String> = worktrees
            .iter()
            .flatten()
            .find(|name| {
                repo.find_worktree(name)
                    .map(|wt| wt.path() == workspace_path)
                    .unwrap_or(false)
            })
            .map(|s| s.to_string());

        // Also try to find by folder name as fallback
        let folder_name = workspace_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string());

        let worktree_name = worktree_name.or_else(|| {
            folder_name.as_ref().and_then(|fname| {
                worktrees
                    .iter()
                    .flatten()
                    .find(|name| *name == fname.as_str())
                    .map(|s| s.to_string())
            })
        });

        if let Some(ref name) = worktree_name {
            if let Ok(worktree) = repo.find_worktree(name) {
                let _ = worktree.unlock();
                let prune_result = worktree.prune(Some(
                    git2::WorktreePruneOptions::new()
                        .valid(true)
                        .working_tree(true)
                        .locked(true),
                ));
                if let Err(e) = prune_result {
                    mlog_warn!("Worktree prune failed for '{}': {}", name, e);
                }
            }
        }

        if workspace_path.exists() {
            std::fs::remove_dir_all(workspace_path)?;
        }

        // Clean up the git worktree admin directory (e.g., .git/worktrees/<name>).
        // If the admin dir still exists, git thinks the branch is checked out.
        if let Some(ref name) = worktree_name {
            self.cleanup_worktree_admin_dir(name);
        }
        if let Some(ref fname) = folder_name {
            self.cleanup_worktree_admin_dir(fname);
        }

        mlog_debug!("Workspace removed");
        Ok(())
    }

    /// Clean up the git worktree admin directory (.git/worktrees/<name>)
    fn cleanup_worktree_admin_dir(&self, worktree_name: &str) {
        if let Ok(repo) = self.repo() {
            let git_dir = repo.path();
            let admin_dir = git_dir.join("worktrees").join(worktree_name);
            if admin_dir.exists() {
                let _ = std::fs::remove_dir_all(&admin_dir);
            }
        }
    }

    /// Stage everything in a workspace and commit it.
    pub fn commit_all(&self, workspace_path: &Path, message: &str) -> Result<String> {
        mlog_debug!(
            "GitOps::commit_all path={} message={}",
            workspace_path.display(),
            message
        );
        let repo = Repository::open(workspace_path)?;
        let mut index = repo.index()?;
        index.add_all(["."].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Maestro", "maestro@localhost"))?;

        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };

        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        Ok(commit_id.to_string())
    }

    pub fn head_commit(&self) -> Result<String> {
        let repo = self.repo()?;
        let head = repo.head()?;
        let commit = head.peel_to_commit()?;
        Ok(commit.id().to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let repo = self.repo()?;
        let exists = match repo.find_branch(branch, git2::BranchType::Local) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        };
        exists
    }

    /// Check out a branch in the primary working directory.
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        let repo = self.repo()?;
        let branch_ref = repo.find_branch(branch, git2::BranchType::Local)?;
        let reference = branch_ref.into_reference();
        let commit = reference.peel_to_commit()?;
        repo.checkout_tree(commit.as_object(), None)?;
        repo.set_head(
            reference
                .name()
                .unwrap_or(&format!("refs/heads/{}", branch)),
        )?;
        Ok(())
    }

    /// Merge a workspace branch into the currently checked-out trunk.
    ///
    /// Non-destructive: a conflicted merge is unwound and the trunk left
    /// as it was; history is never rewritten.
    pub fn merge_branch(&self, branch: &str) -> Result<MergeOutcome> {
        mlog_debug!("GitOps::merge_branch branch={}", branch);
        let repo = self.repo()?;

        let branch_ref = repo.find_branch(branch, git2::BranchType::Local)?;
        let their_commit = branch_ref.into_reference().peel_to_commit()?;
        let their_annotated = repo.find_annotated_commit(their_commit.id())?;

        let head_commit = repo.head()?.peel_to_commit()?;

        let (analysis, _preference) = repo.merge_analysis(&[&their_annotated])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome::UpToDate {
                commit: head_commit.id().to_string(),
            });
        }

        if analysis.is_fast_forward() {
            let head_ref = repo.head()?;
            let refname = head_ref
                .name()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "HEAD".to_string());
            repo.reference(
                &refname,
                their_commit.id(),
                true,
                &format!("Fast-forward merge of {}", branch),
            )?;
            repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            return Ok(MergeOutcome::Merged {
                commit: their_commit.id().to_string(),
            });
        }

        // Normal merge required
        let mut merge_opts = MergeOptions::new();
        repo.merge(&[&their_annotated], Some(&mut merge_opts), None)?;

        let index = repo.index()?;
        if index.has_conflicts() {
            let paths = Self::conflict_paths(&index);
            let _ = repo.cleanup_state();
            // Drop the half-applied merge from the working tree
            repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
            return Ok(MergeOutcome::Conflicted { paths });
        }

        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Maestro", "maestro@localhost"))?;

        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let message = format!("Merge workspace branch {}", branch);
        let commit_id = repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&head_commit, &their_commit],
        )?;

        repo.cleanup_state()?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;

        Ok(MergeOutcome::Merged {
            commit: commit_id.to_string(),
        })
    }

    /// Paths of every conflicted entry in a merge index.
    fn conflict_paths(index: &git2::Index) -> Vec<String> {
        let mut paths = Vec::new();
        if let Ok(conflicts) = index.conflicts() {
            for conflict in conflicts.flatten() {
                let path = conflict
                    .our
                    .as_ref()
                    .or(conflict.their.as_ref())
                    .or(conflict.ancestor.as_ref())
                    .map(|e| String::from_utf8_lossy(&e.path).to_string())
                    .unwrap_or_default();
                if !path.is_empty() && !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths.sort();
        paths
    }

    /// Delete a local branch. Returns Ok even if branch doesn't exist.
    /// Logs a warning if deletion fails for other reasons but doesn't error.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        mlog_debug!("GitOps::delete_branch branch={}", branch);
        let repo = self.repo()?;
        match repo.find_branch(branch, git2::BranchType::Local) {
            Ok(mut branch_ref) => {
                if let Err(e) = branch_ref.delete() {
                    // The branch might still be checked out elsewhere; the
                    // important thing is the worktree is gone.
                    mlog_warn!("Failed to delete branch '{}': {}", branch, e);
                }
            }
            Err(e) if e.code() == ErrorCode::NotFound => {
                mlog_debug!("Branch '{}' not found (already deleted?)", branch);
            }
            Err(e) => {
                mlog_warn!("Error looking up branch '{}': {}", branch, e);
            }
        }
        Ok(())
    }
}
