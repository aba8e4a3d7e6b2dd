//! Execution plan construction.
//!
//! The builder partitions epics into a parallel group and dependency-
//! levelled sequential groups, validates both dependency graphs, predicts
//! file-path conflicts between tasks sharing a batch, and assigns one
//! isolated workspace per epic.

use crate::core::epic::{Epic, EpicId, EpicType};
use crate::core::graph::DependencyGraph;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};
use crate::mlog_debug;
use crate::plan::batch::{Batch, ExecutionPlan, PredictedConflict, WorkspaceSpec};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_][A-Za-z0-9_\-./]*").expect("valid regex"))
}

fn extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\.(rs|py|ts|tsx|js|jsx|go|java|rb|c|h|cpp|toml|json|yaml|yml|md|sql|html|css|sh)$")
            .expect("valid regex")
    })
}

/// Extract path-like tokens from free-text task descriptions.
///
/// A token counts as path-like when it contains a directory separator or
/// ends in a recognized source-file extension. This is a best-effort
/// textual heuristic, not a static-analysis guarantee.
pub fn extract_path_tokens(description: &str) -> BTreeSet<String> {
    token_re()
        .find_iter(description)
        .filter_map(|m| {
            let token = m.as_str().trim_end_matches(['.', '/']);
            let is_path = token.contains('/') || extension_re().is_match(token);
            if is_path && !token.is_empty() {
                Some(token.trim_start_matches("./").to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Builds execution plans for a project.
pub struct PlanBuilder {
    project: String,
    workspace_root: PathBuf,
}

impl PlanBuilder {
    pub fn new(project: &str, workspace_root: PathBuf) -> Self {
        Self {
            project: project.to_string(),
            workspace_root,
        }
    }

    /// Build an execution plan from the project's epics and tasks.
    ///
    /// Fails on any dependency cycle (epic-level or task-level) or on a
    /// dependency reference to an unknown id. Zero epics produce an
    /// empty plan, not an error.
    pub fn build(&self, epics: &[Epic], tasks: &[Task]) -> Result<ExecutionPlan> {
        mlog_debug!(
            "PlanBuilder::build project={} epics={} tasks={}",
            self.project,
            epics.len(),
            tasks.len()
        );

        let epic_index: HashMap<EpicId, &Epic> = epics.iter().map(|e| (e.id, e)).collect();
        let task_index: HashMap<TaskId, &Task> = tasks.iter().map(|t| (t.id, t)).collect();

        self.validate_references(epics, tasks, &epic_index, &task_index)?;
        self.validate_task_graph(tasks)?;

        let mut plan = ExecutionPlan::new(&self.project);

        let mut parallel: Vec<EpicId> = epics
            .iter()
            .filter(|e| e.epic_type == EpicType::Parallel)
            .map(|e| e.id)
            .collect();
        parallel.sort();

        let sequential: Vec<&Epic> = epics
            .iter()
            .filter(|e| e.epic_type == EpicType::Sequential)
            .collect();

        // Epic-level graph over sequential epics. Edges to parallel epics
        // are satisfied by batch ordering (the parallel batch always comes
        // first) and must not drag parallel epics into the level grouping.
        let sequential_ids: HashSet<EpicId> = sequential.iter().map(|e| e.id).collect();
        let mut epic_graph: DependencyGraph<EpicId> = DependencyGraph::new();
        for epic in &sequential {
            epic_graph.add_node(epic.id);
            for dep in &epic.depends_on_epics {
                if sequential_ids.contains(dep) {
                    epic_graph.add_edge(*dep, epic.id);
                }
            }
        }
        let levels = epic_graph.dependency_levels()?;

        let mut next_number = 1;
        if !parallel.is_empty() {
            let task_ids = self.collect_batch_tasks(&parallel, &epic_index);
            plan.batches.push(Batch {
                number: next_number,
                epic_ids: parallel,
                task_ids,
                can_parallel: true,
                depends_on: Vec::new(),
            });
            next_number += 1;
        }

        // One batch per distinct dependency level, ascending. Epics on the
        // same level have no edge between them and may run together.
        let mut by_level: BTreeMap<usize, Vec<EpicId>> = BTreeMap::new();
        for (id, level) in &levels {
            by_level.entry(*level).or_default().push(*id);
        }
        for (_, mut epic_ids) in by_level {
            epic_ids.sort();
            let task_ids = self.collect_batch_tasks(&epic_ids, &epic_index);
            let depends_on = if next_number > 1 {
                vec![next_number - 1]
            } else {
                Vec::new()
            };
            plan.batches.push(Batch {
                number: next_number,
                can_parallel: epic_ids.len() > 1,
                epic_ids,
                task_ids,
                depends_on,
            });
            next_number += 1;
        }

        plan.predicted_conflicts = self.predict_conflicts(&plan.batches, &task_index);

        for epic in epics {
            plan.workspace_assignments.insert(
                epic.id,
                WorkspaceSpec::derive(&self.project, epic.id, &self.workspace_root),
            );
        }

        mlog_debug!(
            "Plan built: {} batches, {} predicted conflicts",
            plan.batches.len(),
            plan.predicted_conflicts.len()
        );
        Ok(plan)
    }

    /// Every dependency reference must resolve to a known epic/task.
    /// An unresolvable reference would otherwise turn into a silent
    /// permanent block at execution time.
    fn validate_references(
        &self,
        epics: &[Epic],
        tasks: &[Task],
        epic_index: &HashMap<EpicId, &Epic>,
        task_index: &HashMap<TaskId, &Task>,
    ) -> Result<()> {
        for epic in epics {
            for dep in &epic.depends_on_epics {
                if !epic_index.contains_key(dep) {
                    return Err(Error::UnknownDependency {
                        id: dep.to_string(),
                        referenced_by: format!("epic {}", epic.id),
                    });
                }
            }
        }
        for task in tasks {
            if !epic_index.contains_key(&task.epic_id) {
                return Err(Error::UnknownDependency {
                    id: task.epic_id.to_string(),
                    referenced_by: format!("task {}", task.id),
                });
            }
            for dep in &task.depends_on {
                if !task_index.contains_key(&dep.task_id) {
                    return Err(Error::UnknownDependency {
                        id: dep.task_id.to_string(),
                        referenced_by: format!("task {}", task.id),
                    });
                }
            }
        }
        Ok(())
    }

    /// Cycle-check the full task graph. Soft edges participate: a soft
    /// cycle still has no valid ordering.
    fn validate_task_graph(&self, tasks: &[Task]) -> Result<()> {
        let mut graph: DependencyGraph<TaskId> = DependencyGraph::new();
        for task in tasks {
            graph.add_node(task.id);
            for dep in &task.depends_on {
                graph.add_edge(dep.task_id, task.id);
            }
        }
        graph.topological_order()?;
        Ok(())
    }

    /// Union of the batch epics' tasks, in epic order then task order.
    fn collect_batch_tasks(
        &self,
        epic_ids: &[EpicId],
        epic_index: &HashMap<EpicId, &Epic>,
    ) -> Vec<TaskId> {
        epic_ids
            .iter()
            .filter_map(|id| epic_index.get(id))
            .flat_map(|epic| epic.tasks.iter().copied())
            .collect()
    }

    /// Predict file-path overlap between tasks scheduled into the same
    /// batch. Conflicts are attached to the plan for visibility; they do
    /// not block scheduling.
    fn predict_conflicts(
        &self,
        batches: &[Batch],
        task_index: &HashMap<TaskId, &Task>,
    ) -> Vec<PredictedConflict> {
        let mut conflicts = Vec::new();
        for batch in batches {
            let mut by_path: BTreeMap<String, Vec<TaskId>> = BTreeMap::new();
            for task_id in &batch.task_ids {
                let Some(task) = task_index.get(task_id) else {
                    continue;
                };
                for path in extract_path_tokens(&task.description) {
                    by_path.entry(path).or_default().push(*task_id);
                }
            }
            for (path, mut task_ids) in by_path {
                if task_ids.len() > 1 {
                    task_ids.sort();
                    conflicts.push(PredictedConflict { path, task_ids });
                }
            }
        }
        conflicts
    }
}
