//! Plan persistence.
//!
//! Plans are written once as pretty JSON under the engine's plans
//! directory. A plan file is never rewritten in place; re-planning goes
//! through [`ExecutionPlan::next_version`] and produces a new file.

use crate::error::{Error, Result};
use crate::mlog_debug;
use crate::plan::batch::{ExecutionPlan, PlanId};
use std::fs;
use std::path::PathBuf;

/// Filesystem store for execution plans.
#[derive(Debug, Clone)]
pub struct PlanStore {
    root: PathBuf,
}

impl PlanStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn plan_path(&self, id: &PlanId) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    /// Persist a plan. Saving the same plan id twice is an error: plans
    /// are immutable once written.
    pub fn save(&self, plan: &ExecutionPlan) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.plan_path(&plan.id);
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("plan {} already persisted", plan.id),
            )));
        }
        mlog_debug!("PlanStore::save {} -> {}", plan.id, path.display());
        fs::write(&path, serde_json::to_string_pretty(plan)?)?;
        Ok(())
    }

    /// Load a plan by id.
    pub fn load(&self, id: &PlanId) -> Result<ExecutionPlan> {
        let path = self.plan_path(id);
        if !path.exists() {
            return Err(Error::PlanNotFound(id.to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// List persisted plan ids, sorted for stable output.
    pub fn list(&self) -> Result<Vec<PlanId>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(uuid) = stem.parse() {
                ids.push(PlanId(uuid));
            }
        }
        ids.sort_by_key(|id| id.to_string());
        Ok(ids)
    }
}
