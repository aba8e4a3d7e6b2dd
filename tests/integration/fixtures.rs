//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - A scripted mock task runner (no real agent calls)
//! - An executor harness wiring all engine components together

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{mpsc, RwLock};

use async_trait::async_trait;
use maestro::config::Config;
use maestro::core::cost::CostLedger;
use maestro::core::epic::Epic;
use maestro::core::task::{Task, TaskId};
use maestro::git::GitOps;
use maestro::orchestration::{
    EventSink, ParallelExecutor, ProgressEvent, RunContext, TaskOutcome, TaskRunner, TaskSpec,
    TaskUsage,
};
use maestro::plan::PlanBuilder;
use maestro::workspace::WorkspaceManager;
use tokio_util::sync::CancellationToken;

/// A test repository with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit on `main`.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();

        Command::new("git")
            .args(["init"])
            .current_dir(&path)
            .output()
            .expect("Failed to init git");

        // Normalize the default branch name across git versions
        Command::new("git")
            .args(["checkout", "-b", "main"])
            .current_dir(&path)
            .output()
            .expect("Failed to create main branch");

        Command::new("git")
            .args(["config", "user.email", "test@test.com"])
            .current_dir(&path)
            .output()
            .expect("Failed to set user.email");

        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(&path)
            .output()
            .expect("Failed to set user.name");

        std::fs::write(path.join("README.md"), "# Test Repository\n")
            .expect("Failed to write README");

        Command::new("git")
            .args(["add", "."])
            .current_dir(&path)
            .output()
            .expect("Failed to git add");

        Command::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(&path)
            .output()
            .expect("Failed to git commit");

        Self { temp_dir, path }
    }

    /// Create a new branch in the repository.
    pub fn create_branch(&self, name: &str) -> std::io::Result<()> {
        let output = Command::new("git")
            .args(["branch", name])
            .current_dir(&self.path)
            .output()?;

        if !output.status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(())
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        let output = Command::new("git")
            .args(["branch", "--list", name])
            .current_dir(&self.path)
            .output()
            .expect("Failed to list branches");

        !String::from_utf8_lossy(&output.stdout).trim().is_empty()
    }

    /// Read a file from the trunk working directory.
    pub fn read_file(&self, name: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.path.join(name))
    }

    /// Get GitOps for this repository.
    pub fn git_ops(&self) -> maestro::Result<GitOps> {
        GitOps::new(&self.path)
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// What the scripted runner should do for a given task.
#[derive(Debug, Clone)]
pub enum ScriptedBehavior {
    /// Report success without touching the workspace.
    Succeed,
    /// Report success with a usage record attached.
    SucceedWithUsage { model: String, cost: f64 },
    /// Write a file into the workspace, commit it, report success.
    WriteFile { path: String, content: String },
    /// Report failure with the given error.
    Fail(String),
}

/// Mock task runner driven by per-task scripted behaviors.
///
/// Tasks with no scripted behavior succeed. Every dispatch is recorded
/// so tests can assert on what actually ran, in order.
pub struct ScriptedRunner {
    behaviors: Mutex<HashMap<TaskId, ScriptedBehavior>>,
    calls: Mutex<Vec<TaskId>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, task_id: TaskId, behavior: ScriptedBehavior) {
        self.behaviors.lock().unwrap().insert(task_id, behavior);
    }

    /// Task ids in dispatch order.
    pub fn calls(&self) -> Vec<TaskId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_dispatched(&self, task_id: &TaskId) -> bool {
        self.calls.lock().unwrap().contains(task_id)
    }

    fn commit_workspace(workspace: &Path, message: &str) {
        Command::new("git")
            .args(["add", "-A"])
            .current_dir(workspace)
            .output()
            .expect("Failed to git add in workspace");
        Command::new("git")
            .args(["commit", "-m", message])
            .current_dir(workspace)
            .output()
            .expect("Failed to git commit in workspace");
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, spec: &TaskSpec, workspace_path: &Path) -> maestro::Result<TaskOutcome> {
        self.calls.lock().unwrap().push(spec.task_id);

        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&spec.task_id)
            .cloned()
            .unwrap_or(ScriptedBehavior::Succeed);

        match behavior {
            ScriptedBehavior::Succeed => Ok(TaskOutcome::completed()),
            ScriptedBehavior::SucceedWithUsage { model, cost } => {
                Ok(TaskOutcome::completed().with_usage(TaskUsage {
                    session_id: maestro::core::cost::SessionId::new(),
                    model,
                    input_tokens: 1000,
                    output_tokens: 250,
                    cost,
                }))
            }
            ScriptedBehavior::WriteFile { path, content } => {
                let file_path = workspace_path.join(&path);
                if let Some(parent) = file_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&file_path, content)?;
                Self::commit_workspace(workspace_path, &format!("Task {}: {}", spec.name, path));
                Ok(TaskOutcome::completed())
            }
            ScriptedBehavior::Fail(error) => Ok(TaskOutcome::failed(&error)),
        }
    }
}

/// Harness wiring a test repository, workspace manager, scripted runner,
/// and executor together.
pub struct ExecutorHarness {
    pub repo: TestRepo,
    pub runner: Arc<ScriptedRunner>,
    pub executor: ParallelExecutor,
    pub workspaces: Arc<RwLock<WorkspaceManager>>,
    pub event_rx: mpsc::Receiver<ProgressEvent>,
    pub ledger: CostLedger,
    pub workspaces_root: PathBuf,
    /// Keeps the workspace/ledger directory alive for the harness's lifetime.
    pub state_dir: TempDir,
}

impl ExecutorHarness {
    pub fn new(max_concurrent_epics: usize) -> Self {
        Self::with_validation(max_concurrent_epics, Vec::new())
    }

    pub fn with_validation(max_concurrent_epics: usize, validation_commands: Vec<String>) -> Self {
        let repo = TestRepo::new();
        let state_dir = TempDir::new().expect("Failed to create state directory");
        let workspaces_root = state_dir.path().join("workspaces");
        std::fs::create_dir_all(&workspaces_root).expect("Failed to create workspaces dir");

        let git = repo.git_ops().expect("Failed to open repo");
        let workspaces = Arc::new(RwLock::new(WorkspaceManager::new(git, "proj")));

        let runner = Arc::new(ScriptedRunner::new());
        let (event_tx, event_rx) = mpsc::channel(256);
        let ledger = CostLedger::new(state_dir.path().join("costs.jsonl"));

        let config = Config {
            max_concurrent_epics,
            workspace_dir: None,
            trunk_branch: "main".to_string(),
            validation_commands,
        };

        let ctx = RunContext {
            config,
            workspaces: Arc::clone(&workspaces),
            runner: Arc::clone(&runner) as Arc<dyn TaskRunner>,
            events: EventSink::new(event_tx),
            costs: ledger.clone(),
            cancel: CancellationToken::new(),
        };

        Self {
            repo,
            runner,
            executor: ParallelExecutor::new(ctx),
            workspaces,
            event_rx,
            ledger,
            workspaces_root,
            state_dir,
        }
    }

    /// Plan builder rooted at this harness's workspace directory.
    pub fn plan_builder(&self) -> PlanBuilder {
        PlanBuilder::new("proj", self.workspaces_root.clone())
    }

    /// Drain every progress event received so far.
    pub fn drain_events(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create an epic with one task per (name, description) pair.
pub fn epic_with_tasks(name: &str, specs: &[(&str, &str)]) -> (Epic, Vec<Task>) {
    let mut epic = Epic::new(name, "test");
    let tasks: Vec<Task> = specs
        .iter()
        .map(|(task_name, description)| {
            let task = Task::new(epic.id, task_name, description);
            epic.add_task(task.id);
            task
        })
        .collect();
    (epic, tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_repo_creation() {
        let repo = TestRepo::new();
        assert!(repo.path.exists());
        assert!(repo.path.join(".git").exists());
        assert!(repo.path.join("README.md").exists());
        assert!(repo.branch_exists("main"));
    }

    #[test]
    fn test_test_repo_create_branch() {
        let repo = TestRepo::new();
        repo.create_branch("feature").unwrap();
        assert!(repo.branch_exists("feature"));
    }

    #[tokio::test]
    async fn test_scripted_runner_defaults_to_success() {
        let repo = TestRepo::new();
        let runner = ScriptedRunner::new();
        let task = Task::new(maestro::core::epic::EpicId::new(), "t", "work");
        let spec = TaskSpec::from_task(&task);

        let outcome = runner.run(&spec, &repo.path).await.unwrap();
        assert!(outcome.is_completed());
        assert!(runner.was_dispatched(&task.id));
    }

    #[tokio::test]
    async fn test_scripted_runner_failure() {
        let repo = TestRepo::new();
        let runner = ScriptedRunner::new();
        let task = Task::new(maestro::core::epic::EpicId::new(), "t", "work");
        runner.script(task.id, ScriptedBehavior::Fail("scripted failure".to_string()));

        let outcome = runner
            .run(&TaskSpec::from_task(&task), &repo.path)
            .await
            .unwrap();
        assert!(!outcome.is_completed());
        assert_eq!(outcome.error.as_deref(), Some("scripted failure"));
    }

    #[test]
    fn test_epic_with_tasks_links_membership() {
        let (epic, tasks) = epic_with_tasks("auth", &[("a", "one"), ("b", "two")]);
        assert_eq!(tasks.len(), 2);
        assert_eq!(epic.tasks, vec![tasks[0].id, tasks[1].id]);
        assert!(tasks.iter().all(|t| t.epic_id == epic.id));
    }
}
