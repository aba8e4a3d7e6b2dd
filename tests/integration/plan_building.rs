//! Plan building against the persisted-plan store.

use crate::fixtures::epic_with_tasks;
use maestro::core::epic::Epic;
use maestro::core::task::Task;
use maestro::plan::{PlanBuilder, PlanStore};
use std::path::PathBuf;
use tempfile::TempDir;

fn builder() -> PlanBuilder {
    PlanBuilder::new("proj", PathBuf::from("/tmp/workspaces"))
}

#[test]
fn test_built_plan_roundtrips_through_store() {
    let (epic_a, tasks_a) = epic_with_tasks("auth", &[("login", "Add src/auth/login.rs")]);
    let (epic_b, tasks_b) = epic_with_tasks("billing", &[("invoice", "Add src/billing/invoice.rs")]);
    let tasks: Vec<Task> = tasks_a.into_iter().chain(tasks_b).collect();

    let plan = builder().build(&[epic_a, epic_b], &tasks).unwrap();

    let dir = TempDir::new().unwrap();
    let store = PlanStore::new(dir.path().join("plans"));
    store.save(&plan).unwrap();

    let loaded = store.load(&plan.id).unwrap();
    assert_eq!(loaded.batches.len(), plan.batches.len());
    assert_eq!(loaded.workspace_assignments.len(), 2);
    assert_eq!(loaded.batches[0].epic_ids, plan.batches[0].epic_ids);
}

#[test]
fn test_replanning_is_a_new_version_not_a_rewrite() {
    let (epic, tasks) = epic_with_tasks("auth", &[("login", "Add login")]);

    let plan = builder().build(&[epic.clone()], &tasks).unwrap();

    let dir = TempDir::new().unwrap();
    let store = PlanStore::new(dir.path().join("plans"));
    store.save(&plan).unwrap();

    // Re-plan: derive a new version, persist alongside the old one.
    let replanned = plan.next_version();
    store.save(&replanned).unwrap();

    let ids = store.list().unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(store.load(&plan.id).unwrap().version, 1);
    assert_eq!(store.load(&replanned.id).unwrap().version, 2);
}

#[test]
fn test_mixed_plan_shape_end_to_end() {
    // Two parallel epics, then a sequential chain a -> b.
    let (par1, t1) = epic_with_tasks("infra", &[("ci", "Set up .github/workflows/ci.yml")]);
    let (par2, t2) = epic_with_tasks("docs", &[("readme", "Rewrite README.md")]);

    let mut seq_a = Epic::sequential("schema", "db", vec![]);
    let ta = Task::new(seq_a.id, "migrate", "Add migrations/001.sql");
    seq_a.add_task(ta.id);

    let mut seq_b = Epic::sequential("api", "backend", vec![seq_a.id]);
    let tb = Task::new(seq_b.id, "endpoints", "Add src/api/routes.rs");
    seq_b.add_task(tb.id);

    let epics = [par1.clone(), par2.clone(), seq_a.clone(), seq_b.clone()];
    let tasks: Vec<Task> = t1.into_iter().chain(t2).chain([ta, tb]).collect();

    let plan = builder().build(&epics, &tasks).unwrap();

    assert_eq!(plan.batches.len(), 3);
    // First batch: both parallel epics.
    assert!(plan.batches[0].can_parallel);
    assert!(plan.batches[0].epic_ids.contains(&par1.id));
    assert!(plan.batches[0].epic_ids.contains(&par2.id));
    // Then the chain, one level per batch.
    assert_eq!(plan.batches[1].epic_ids, vec![seq_a.id]);
    assert_eq!(plan.batches[2].epic_ids, vec![seq_b.id]);
    // Each batch depends on the previous one.
    assert_eq!(plan.batches[1].depends_on, vec![plan.batches[0].number]);
    assert_eq!(plan.batches[2].depends_on, vec![plan.batches[1].number]);
    // Every epic has a workspace.
    assert_eq!(plan.workspace_assignments.len(), 4);
}

#[test]
fn test_predicted_conflicts_surface_in_persisted_plan() {
    let (epic_a, ta) = epic_with_tasks("auth", &[("sessions", "Rework src/models/user.rs")]);
    let (epic_b, tb) = epic_with_tasks("profile", &[("avatar", "Extend src/models/user.rs")]);
    let tasks: Vec<Task> = ta.into_iter().chain(tb).collect();

    let plan = builder().build(&[epic_a, epic_b], &tasks).unwrap();
    assert_eq!(plan.predicted_conflicts.len(), 1);

    let dir = TempDir::new().unwrap();
    let store = PlanStore::new(dir.path().join("plans"));
    store.save(&plan).unwrap();

    let loaded = store.load(&plan.id).unwrap();
    assert_eq!(loaded.predicted_conflicts.len(), 1);
    assert_eq!(loaded.predicted_conflicts[0].path, "src/models/user.rs");
}
