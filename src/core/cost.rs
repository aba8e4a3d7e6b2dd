//! Cost recording for task-runner sessions.
//!
//! Every unit of work produces at most one `CostEntry`, appended to a
//! JSON-lines ledger. Entries are never rewritten after insert.

use crate::core::task::TaskId;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for one task-runner session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One append-only cost record, linked to a task and session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
}

impl CostEntry {
    pub fn new(
        task_id: TaskId,
        session_id: SessionId,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: f64,
    ) -> Self {
        Self {
            task_id,
            session_id,
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only ledger of cost entries, one JSON object per line.
#[derive(Debug, Clone)]
pub struct CostLedger {
    path: PathBuf,
}

impl CostLedger {
    /// Open a ledger at the given path. The file is created lazily on
    /// first record.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append an entry. Existing lines are never touched.
    pub fn record(&self, entry: &CostEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    /// Read every entry recorded so far.
    pub fn read_all(&self) -> Result<Vec<CostEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Sum of recorded cost across all entries.
    pub fn total_cost(&self) -> Result<f64> {
        Ok(self.read_all()?.iter().map(|e| e.cost).sum())
    }
}
