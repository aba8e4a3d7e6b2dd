//! The scheduler: batch-by-batch execution of a plan.
//!
//! Within a batch the executor runs one concurrent stream per epic,
//! bounded by `max_concurrent_epics`. Within an epic, tasks run strictly
//! sequentially against the shared workspace, in task-dependency order.
//! Batch N+1 never starts before batch N is fully merged and validated.

use crate::config::Config;
use crate::core::cost::{CostEntry, CostLedger};
use crate::core::epic::{Epic, EpicId, EpicStatus};
use crate::core::graph::DependencyGraph;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, ProgressEvent, ProgressKind};
use crate::orchestration::merge::{BatchIntegration, IntegrationOutcome, MergeCoordinator};
use crate::orchestration::runner::{TaskRunner, TaskSpec};
use crate::plan::batch::{BatchNumber, ExecutionPlan};
use crate::workspace::WorkspaceManager;
use crate::{mlog, mlog_debug, mlog_warn};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How the run ended, distinguishing every user-visible end state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    Completed,
    CompletedWithFailures,
    HaltedOnConflict,
    HaltedOnValidation,
    Cancelled,
}

/// Final report of one execution run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub verdict: RunVerdict,
    pub task_statuses: BTreeMap<TaskId, TaskStatus>,
    pub epic_statuses: BTreeMap<EpicId, EpicStatus>,
    pub merged_batches: Vec<BatchNumber>,
    /// The batch that halted progression, if any.
    pub halted_batch: Option<BatchNumber>,
}

impl RunReport {
    pub fn failed_tasks(&self) -> Vec<TaskId> {
        self.task_statuses
            .iter()
            .filter(|(_, status)| matches!(status, TaskStatus::Failed { .. }))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Everything one run needs, passed explicitly so concurrent runs never
/// share process state.
pub struct RunContext {
    pub config: Config,
    pub workspaces: Arc<RwLock<WorkspaceManager>>,
    pub runner: Arc<dyn TaskRunner>,
    pub events: EventSink,
    pub costs: CostLedger,
    pub cancel: CancellationToken,
}

/// Executes an [`ExecutionPlan`] batch by batch.
pub struct ParallelExecutor {
    ctx: RunContext,
    status: Arc<RwLock<RunStatus>>,
    paused_tx: watch::Sender<bool>,
    paused_rx: watch::Receiver<bool>,
}

impl ParallelExecutor {
    pub fn new(ctx: RunContext) -> Self {
        let (paused_tx, paused_rx) = watch::channel(false);
        Self {
            ctx,
            status: Arc::new(RwLock::new(RunStatus::Idle)),
            paused_tx,
            paused_rx,
        }
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.read().await
    }

    /// Pause the run: no further tasks are dispatched until resume.
    /// In-flight tasks finish.
    pub async fn pause(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if *status != RunStatus::Running {
            return Err(Error::InvalidRunTransition {
                from: status.to_string(),
                to: RunStatus::Paused.to_string(),
            });
        }
        *status = RunStatus::Paused;
        let _ = self.paused_tx.send(true);
        mlog!("Run paused");
        Ok(())
    }

    /// Resume a paused run.
    pub async fn resume(&self) -> Result<()> {
        let mut status = self.status.write().await;
        if *status != RunStatus::Paused {
            return Err(Error::InvalidRunTransition {
                from: status.to_string(),
                to: RunStatus::Running.to_string(),
            });
        }
        *status = RunStatus::Running;
        let _ = self.paused_tx.send(false);
        mlog!("Run resumed");
        Ok(())
    }

    /// Signal cancellation. Checked before every epic stream and every
    /// task dispatch; already-dispatched tasks finish so no workspace is
    /// left mid-operation.
    pub fn cancel(&self) {
        self.ctx.cancel.cancel();
    }

    /// Execute a plan to completion, halt, or cancellation.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        epics: &[Epic],
        tasks: &[Task],
    ) -> Result<RunReport> {
        {
            let mut status = self.status.write().await;
            if *status != RunStatus::Idle {
                return Err(Error::InvalidRunTransition {
                    from: status.to_string(),
                    to: RunStatus::Running.to_string(),
                });
            }
            *status = RunStatus::Running;
        }
        mlog!(
            "Run started: plan {} v{} ({} batches)",
            plan.id,
            plan.version,
            plan.batches.len()
        );

        let epic_index: HashMap<EpicId, &Epic> = epics.iter().map(|e| (e.id, e)).collect();
        let task_index: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        let statuses: Arc<RwLock<BTreeMap<TaskId, TaskStatus>>> = Arc::new(RwLock::new(
            tasks.iter().map(|t| (t.id, TaskStatus::Pending)).collect(),
        ));
        let epic_statuses: Arc<RwLock<BTreeMap<EpicId, EpicStatus>>> = Arc::new(RwLock::new(
            epics.iter().map(|e| (e.id, EpicStatus::Planned)).collect(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.ctx.config.max_concurrent_epics.max(1)));

        let coordinator = MergeCoordinator::new(
            Arc::clone(&self.ctx.workspaces),
            &self.ctx.config.trunk_branch,
            self.ctx.config.validation_commands.clone(),
        );

        let mut merged_batches = Vec::new();
        let mut halted: Option<(BatchNumber, RunVerdict)> = None;
        let mut cancelled = false;

        for batch in &plan.batches {
            if self.ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            self.ctx.events.emit(ProgressEvent::batch(
                ProgressKind::BatchStarted,
                batch.number,
                &format!("{} epics, {} tasks", batch.epic_ids.len(), batch.task_ids.len()),
            ));

            let mut epic_ids = batch.epic_ids.clone();
            epic_ids.sort();
            let streams = epic_ids
                .into_iter()
                .filter_map(|id| epic_index.get(&id).copied())
                .map(|epic| {
                    self.run_epic(
                        plan,
                        batch.number,
                        epic,
                        &task_index,
                        &statuses,
                        &epic_statuses,
                        &semaphore,
                    )
                });
            join_all(streams).await;

            if self.ctx.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let integration = coordinator.integrate(batch).await?;
            match self.report_integration(&integration) {
                None => merged_batches.push(batch.number),
                Some(verdict) => {
                    halted = Some((batch.number, verdict));
                    break;
                }
            }
        }

        let report = RunReport {
            verdict: self
                .final_verdict(cancelled, &halted, &statuses)
                .await,
            task_statuses: statuses.read().await.clone(),
            epic_statuses: epic_statuses.read().await.clone(),
            merged_batches,
            halted_batch: halted.map(|(number, _)| number),
        };

        {
            let mut status = self.status.write().await;
            *status = match report.verdict {
                RunVerdict::Completed | RunVerdict::CompletedWithFailures => RunStatus::Completed,
                RunVerdict::Cancelled => RunStatus::Cancelled,
                RunVerdict::HaltedOnConflict | RunVerdict::HaltedOnValidation => RunStatus::Failed,
            };
            mlog!("Run finished: {:?} (status {})", report.verdict, *status);
        }

        Ok(report)
    }

    /// Emit events for an integration result and decide whether it halts
    /// the run.
    fn report_integration(&self, integration: &BatchIntegration) -> Option<RunVerdict> {
        match &integration.outcome {
            IntegrationOutcome::Clean => {
                self.ctx.events.emit(ProgressEvent::batch(
                    ProgressKind::BatchMerged,
                    integration.batch,
                    &format!("{} workspaces merged", integration.merged.len()),
                ));
                None
            }
            IntegrationOutcome::Conflicted {
                epic_id,
                branch,
                paths,
            } => {
                let mut event = ProgressEvent::batch(
                    ProgressKind::BatchConflict,
                    integration.batch,
                    &format!("conflict on {}: {}", branch, paths.join(", ")),
                );
                event.epic_id = Some(*epic_id);
                self.ctx.events.emit(event);
                Some(RunVerdict::HaltedOnConflict)
            }
            IntegrationOutcome::ValidationFailed { command, stderr } => {
                mlog_warn!(
                    "Batch {} validation failed: {}: {}",
                    integration.batch,
                    command,
                    stderr.trim()
                );
                Some(RunVerdict::HaltedOnValidation)
            }
        }
    }

    async fn final_verdict(
        &self,
        cancelled: bool,
        halted: &Option<(BatchNumber, RunVerdict)>,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
    ) -> RunVerdict {
        if cancelled {
            return RunVerdict::Cancelled;
        }
        if let Some((_, verdict)) = halted {
            return verdict.clone();
        }
        let any_failed = statuses
            .read()
            .await
            .values()
            .any(|s| matches!(s, TaskStatus::Failed { .. }));
        if any_failed {
            RunVerdict::CompletedWithFailures
        } else {
            RunVerdict::Completed
        }
    }

    /// Run one epic's tasks sequentially against its workspace.
    #[allow(clippy::too_many_arguments)]
    async fn run_epic(
        &self,
        plan: &ExecutionPlan,
        batch: BatchNumber,
        epic: &Epic,
        task_index: &HashMap<TaskId, &Task>,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
        epic_statuses: &Arc<RwLock<BTreeMap<EpicId, EpicStatus>>>,
        semaphore: &Semaphore,
    ) {
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };

        if self.ctx.cancel.is_cancelled() {
            return;
        }

        let workspace_path = match self.activate_workspace(plan, batch, epic, statuses).await {
            Some(path) => path,
            None => {
                let mut epics = epic_statuses.write().await;
                epics.insert(
                    epic.id,
                    EpicStatus::Failed {
                        error: "workspace unavailable".to_string(),
                    },
                );
                return;
            }
        };

        {
            let mut epics = epic_statuses.write().await;
            epics.insert(epic.id, EpicStatus::Running);
        }

        let order = match epic_task_order(epic, task_index) {
            Ok(order) => order,
            Err(e) => {
                // The builder validated acyclicity, so this is unreachable
                // for plans it produced; fail the epic rather than panic.
                self.fail_epic_tasks(batch, epic, statuses, &e.to_string()).await;
                let mut epics = epic_statuses.write().await;
                epics.insert(epic.id, EpicStatus::Failed { error: e.to_string() });
                return;
            }
        };

        for task_id in order {
            if self.ctx.cancel.is_cancelled() {
                mlog_debug!(
                    "Cancellation observed; epic {} stops dispatching",
                    epic.id.short()
                );
                break;
            }
            self.pause_gate().await;

            let Some(task) = task_index.get(&task_id).copied() else {
                continue;
            };

            if let Some(unmet) = self.unmet_hard_dependency(task, statuses).await {
                let error = Error::BlockedDependency {
                    task: task.id.to_string(),
                    unmet: unmet.to_string(),
                };
                self.set_task_failed(batch, epic.id, task.id, statuses, &error.to_string())
                    .await;
                continue;
            }

            self.dispatch_task(batch, epic.id, task, &workspace_path, statuses)
                .await;
        }

        let epic_failed = {
            let map = statuses.read().await;
            epic.tasks
                .iter()
                .any(|id| matches!(map.get(id), Some(TaskStatus::Failed { .. })))
        };
        let mut epics = epic_statuses.write().await;
        epics.insert(
            epic.id,
            if epic_failed {
                EpicStatus::Failed {
                    error: "one or more tasks failed".to_string(),
                }
            } else {
                EpicStatus::Completed
            },
        );
    }

    /// Ensure the epic's workspace is active. On failure the workspace is
    /// abandoned and every task of the epic fails with the workspace
    /// cause; sibling epics in the batch are unaffected.
    async fn activate_workspace(
        &self,
        plan: &ExecutionPlan,
        batch: BatchNumber,
        epic: &Epic,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
    ) -> Option<PathBuf> {
        let Some(spec) = plan.workspace_assignments.get(&epic.id) else {
            self.fail_epic_tasks(batch, epic, statuses, "no workspace assignment")
                .await;
            return None;
        };

        let result = {
            let mut manager = self.ctx.workspaces.write().await;
            manager.create(spec).map(|ws| ws.path.clone())
        };

        match result {
            Ok(path) => Some(path),
            Err(e) => {
                mlog_warn!(
                    "Workspace activation failed for epic {}: {}",
                    epic.id.short(),
                    e
                );
                self.fail_epic_tasks(batch, epic, statuses, &format!("workspace error: {}", e))
                    .await;
                None
            }
        }
    }

    async fn fail_epic_tasks(
        &self,
        batch: BatchNumber,
        epic: &Epic,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
        reason: &str,
    ) {
        for task_id in &epic.tasks {
            self.set_task_failed(batch, epic.id, *task_id, statuses, reason)
                .await;
        }
    }

    async fn set_task_failed(
        &self,
        batch: BatchNumber,
        epic_id: EpicId,
        task_id: TaskId,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
        error: &str,
    ) {
        {
            let mut map = statuses.write().await;
            map.insert(
                task_id,
                TaskStatus::Failed {
                    error: error.to_string(),
                },
            );
        }
        self.ctx.events.emit(ProgressEvent::task(
            ProgressKind::TaskFailed,
            batch,
            epic_id,
            task_id,
            error,
        ));
    }

    /// First hard dependency that is not completed, if any.
    async fn unmet_hard_dependency(
        &self,
        task: &Task,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
    ) -> Option<TaskId> {
        let map = statuses.read().await;
        task.hard_dependencies()
            .find(|dep| !matches!(map.get(dep), Some(TaskStatus::Completed)))
    }

    /// Dispatch one task to the runner and record its terminal state.
    /// This await is the engine's one suspension point per task.
    async fn dispatch_task(
        &self,
        batch: BatchNumber,
        epic_id: EpicId,
        task: &Task,
        workspace_path: &PathBuf,
        statuses: &Arc<RwLock<BTreeMap<TaskId, TaskStatus>>>,
    ) {
        {
            let mut map = statuses.write().await;
            map.insert(task.id, TaskStatus::Running);
        }
        self.ctx.events.emit(ProgressEvent::task(
            ProgressKind::TaskStarted,
            batch,
            epic_id,
            task.id,
            &task.name,
        ));
        mlog_debug!("Dispatching task {} ({})", task.id.short(), task.name);

        let spec = TaskSpec::from_task(task);
        match self.ctx.runner.run(&spec, workspace_path).await {
            Ok(outcome) => {
                if let Some(usage) = &outcome.usage {
                    let entry = CostEntry::new(
                        task.id,
                        usage.session_id,
                        &usage.model,
                        usage.input_tokens,
                        usage.output_tokens,
                        usage.cost,
                    );
                    if let Err(e) = self.ctx.costs.record(&entry) {
                        mlog_warn!("Cost record failed for task {}: {}", task.id.short(), e);
                    }
                }
                if outcome.is_completed() {
                    {
                        let mut map = statuses.write().await;
                        map.insert(task.id, TaskStatus::Completed);
                    }
                    self.ctx.events.emit(ProgressEvent::task(
                        ProgressKind::TaskCompleted,
                        batch,
                        epic_id,
                        task.id,
                        &task.name,
                    ));
                } else {
                    let error = outcome
                        .error
                        .unwrap_or_else(|| "task runner reported failure".to_string());
                    self.set_task_failed(batch, epic_id, task.id, statuses, &error)
                        .await;
                }
            }
            Err(e) => {
                let error = Error::TaskExecution {
                    task: task.id.to_string(),
                    reason: e.to_string(),
                };
                self.set_task_failed(batch, epic_id, task.id, statuses, &error.to_string())
                    .await;
            }
        }
    }

    /// Block while the run is paused. In-flight tasks are unaffected;
    /// only new dispatches wait here.
    async fn pause_gate(&self) {
        let mut rx = self.paused_rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Topological order of one epic's tasks, ties broken by ascending
/// priority then ascending identifier. Only same-epic edges participate;
/// cross-epic dependencies are handled by batching and the hard-dep gate.
fn epic_task_order(epic: &Epic, task_index: &HashMap<TaskId, &Task>) -> Result<Vec<TaskId>> {
    let mut graph: DependencyGraph<TaskId> = DependencyGraph::new();
    for task_id in &epic.tasks {
        graph.add_node(*task_id);
        let Some(task) = task_index.get(task_id) else {
            continue;
        };
        for dep in &task.depends_on {
            if epic.tasks.contains(&dep.task_id) {
                graph.add_edge(dep.task_id, *task_id);
            }
        }
    }
    graph.topological_order_by_key(|id| {
        let priority = task_index.get(id).map(|t| t.priority).unwrap_or(0);
        (priority, *id)
    })
}
