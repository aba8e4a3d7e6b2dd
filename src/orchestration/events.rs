//! Progress events pushed to an external observer.
//!
//! Events are advisory: the scheduler's correctness never depends on an
//! observer being reachable, so emission failures are logged and
//! swallowed rather than propagated.

use crate::core::epic::EpicId;
use crate::core::task::TaskId;
use crate::mlog_warn;
use crate::plan::batch::BatchNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    BatchStarted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    BatchMerged,
    BatchConflict,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub batch: BatchNumber,
    pub epic_id: Option<EpicId>,
    pub task_id: Option<TaskId>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn batch(kind: ProgressKind, batch: BatchNumber, detail: &str) -> Self {
        Self {
            kind,
            batch,
            epic_id: None,
            task_id: None,
            detail: detail.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn task(
        kind: ProgressKind,
        batch: BatchNumber,
        epic_id: EpicId,
        task_id: TaskId,
        detail: &str,
    ) -> Self {
        Self {
            kind,
            batch,
            epic_id: Some(epic_id),
            task_id: Some(task_id),
            detail: detail.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Push-style event sink.
///
/// `EventSink::disabled()` drops everything, letting the engine run
/// headless.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit an event. A full or closed channel is logged, never fatal.
    pub fn emit(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            mlog_warn!("Progress event dropped: {}", e);
        }
    }
}
