//! Merge coordination tests: conflicts, validation gating, teardown.

use crate::fixtures::{epic_with_tasks, ExecutorHarness, ScriptedBehavior};
use maestro::core::epic::{Epic, EpicId};
use maestro::core::task::{Task, TaskStatus};
use maestro::orchestration::{ProgressKind, RunStatus, RunVerdict};
use maestro::workspace::WorkspaceStatus;

#[tokio::test]
async fn test_merge_conflict_halts_batch_and_leaves_siblings_active() {
    let mut harness = ExecutorHarness::new(4);

    // Three epics all rewriting the same file with different content.
    let (epic_a, tasks_a) = epic_with_tasks("auth", &[("a", "Rewrite README")]);
    let (epic_b, tasks_b) = epic_with_tasks("billing", &[("b", "Rewrite README")]);
    let (epic_c, tasks_c) = epic_with_tasks("catalog", &[("c", "Rewrite README")]);

    for (tasks, content) in [
        (&tasks_a, "auth version\n"),
        (&tasks_b, "billing version\n"),
        (&tasks_c, "catalog version\n"),
    ] {
        harness.runner.script(
            tasks[0].id,
            ScriptedBehavior::WriteFile {
                path: "README.md".to_string(),
                content: content.to_string(),
            },
        );
    }

    // A second batch that must never start after the conflict.
    let mut later = Epic::sequential("later", "misc", vec![]);
    let later_task = Task::new(later.id, "later-task", "Follow-up work");
    later.add_task(later_task.id);

    let epics = vec![epic_a.clone(), epic_b.clone(), epic_c.clone(), later.clone()];
    let tasks: Vec<Task> = tasks_a
        .into_iter()
        .chain(tasks_b)
        .chain(tasks_c)
        .chain([later_task.clone()])
        .collect();
    let plan = harness.plan_builder().build(&epics, &tasks).unwrap();
    assert_eq!(plan.batches.len(), 2);

    let report = harness.executor.execute(&plan, &epics, &tasks).await.unwrap();

    assert_eq!(report.verdict, RunVerdict::HaltedOnConflict);
    assert_eq!(report.halted_batch, Some(1));
    assert!(report.merged_batches.is_empty());
    assert_eq!(harness.executor.status().await, RunStatus::Failed);

    // Merges run in ascending epic-id order: the first merges cleanly
    // (fast-forward), the second conflicts, the third is never attempted.
    let mut batch_one: Vec<EpicId> = vec![epic_a.id, epic_b.id, epic_c.id];
    batch_one.sort();

    let workspaces = harness.workspaces.read().await;
    assert_eq!(
        workspaces.get(&batch_one[0]).unwrap().status,
        WorkspaceStatus::Merged
    );
    assert_eq!(
        workspaces.get(&batch_one[1]).unwrap().status,
        WorkspaceStatus::Conflict
    );
    assert_eq!(
        workspaces.get(&batch_one[2]).unwrap().status,
        WorkspaceStatus::Active
    );
    drop(workspaces);

    // The conflict event names the epic and the conflicting path.
    let events = harness.drain_events();
    let conflict = events
        .iter()
        .find(|e| e.kind == ProgressKind::BatchConflict)
        .expect("conflict event emitted");
    assert_eq!(conflict.epic_id, Some(batch_one[1]));
    assert!(conflict.detail.contains("README.md"));

    // Batch 2 never started.
    assert!(!harness.runner.was_dispatched(&later_task.id));
    assert_eq!(report.task_statuses[&later_task.id], TaskStatus::Pending);
}

#[tokio::test]
async fn test_conflicted_workspace_can_be_resolved_back_to_active() {
    let harness = ExecutorHarness::new(4);

    let (epic_a, tasks_a) = epic_with_tasks("auth", &[("a", "Rewrite README")]);
    let (epic_b, tasks_b) = epic_with_tasks("billing", &[("b", "Rewrite README")]);
    for (tasks, content) in [(&tasks_a, "one\n"), (&tasks_b, "two\n")] {
        harness.runner.script(
            tasks[0].id,
            ScriptedBehavior::WriteFile {
                path: "README.md".to_string(),
                content: content.to_string(),
            },
        );
    }

    let epics = vec![epic_a.clone(), epic_b.clone()];
    let tasks: Vec<Task> = tasks_a.into_iter().chain(tasks_b).collect();
    let plan = harness.plan_builder().build(&epics, &tasks).unwrap();

    let report = harness.executor.execute(&plan, &epics, &tasks).await.unwrap();
    assert_eq!(report.verdict, RunVerdict::HaltedOnConflict);

    let mut sorted = vec![epic_a.id, epic_b.id];
    sorted.sort();
    let conflicted = sorted[1];

    // Manual resolution flow: conflict -> active.
    let mut workspaces = harness.workspaces.write().await;
    workspaces.resolve(&conflicted).unwrap();
    assert_eq!(
        workspaces.get(&conflicted).unwrap().status,
        WorkspaceStatus::Active
    );
}

#[tokio::test]
async fn test_validation_failure_halts_without_rollback() {
    let harness =
        ExecutorHarness::with_validation(2, vec!["exit 1".to_string()]);

    let (epic, tasks) = epic_with_tasks("auth", &[("login", "Add login")]);
    harness.runner.script(
        tasks[0].id,
        ScriptedBehavior::WriteFile {
            path: "auth.rs".to_string(),
            content: "pub fn login() {}\n".to_string(),
        },
    );

    let epics = vec![epic.clone()];
    let plan = harness.plan_builder().build(&epics, &tasks).unwrap();

    let report = harness.executor.execute(&plan, &epics, &tasks).await.unwrap();

    assert_eq!(report.verdict, RunVerdict::HaltedOnValidation);
    assert_eq!(report.halted_batch, Some(1));
    assert_eq!(harness.executor.status().await, RunStatus::Failed);

    // The merge is not rolled back: the work is on the trunk and the
    // workspace stays merged rather than torn down.
    assert!(harness.repo.read_file("auth.rs").is_ok());
    let workspaces = harness.workspaces.read().await;
    assert_eq!(
        workspaces.get(&epic.id).unwrap().status,
        WorkspaceStatus::Merged
    );
}

#[tokio::test]
async fn test_passing_validation_lets_the_batch_advance() {
    let harness = ExecutorHarness::with_validation(2, vec!["true".to_string()]);

    let (epic, tasks) = epic_with_tasks("auth", &[("login", "Add login")]);
    let epics = vec![epic];
    let plan = harness.plan_builder().build(&epics, &tasks).unwrap();

    let report = harness.executor.execute(&plan, &epics, &tasks).await.unwrap();
    assert_eq!(report.verdict, RunVerdict::Completed);
    assert_eq!(report.merged_batches, vec![1]);
}

#[tokio::test]
async fn test_sequential_batches_merge_in_order() {
    let harness = ExecutorHarness::new(2);

    let mut schema = Epic::sequential("schema", "db", vec![]);
    let schema_task = Task::new(schema.id, "migrate", "Add schema");
    schema.add_task(schema_task.id);

    let mut api = Epic::sequential("api", "backend", vec![schema.id]);
    let api_task = Task::new(api.id, "routes", "Add routes");
    api.add_task(api_task.id);

    harness.runner.script(
        schema_task.id,
        ScriptedBehavior::WriteFile {
            path: "schema.sql".to_string(),
            content: "create table users;\n".to_string(),
        },
    );
    harness.runner.script(
        api_task.id,
        ScriptedBehavior::WriteFile {
            path: "routes.rs".to_string(),
            content: "pub fn routes() {}\n".to_string(),
        },
    );

    let epics = vec![schema.clone(), api.clone()];
    let tasks = vec![schema_task.clone(), api_task.clone()];
    let plan = harness.plan_builder().build(&epics, &tasks).unwrap();
    assert_eq!(plan.batches.len(), 2);

    let report = harness.executor.execute(&plan, &epics, &tasks).await.unwrap();

    assert_eq!(report.verdict, RunVerdict::Completed);
    assert_eq!(report.merged_batches, vec![1, 2]);
    // Batch 2's workspace branched after batch 1 merged, so both files
    // are on the trunk.
    assert!(harness.repo.read_file("schema.sql").is_ok());
    assert!(harness.repo.read_file("routes.rs").is_ok());

    // Strict barrier: schema's task ran before api's task was dispatched.
    let calls = harness.runner.calls();
    assert_eq!(calls, vec![schema_task.id, api_task.id]);
}
