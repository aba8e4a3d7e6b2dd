use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Dependency cycle among: {}", nodes.join(", "))]
    PlanningCycle { nodes: Vec<String> },

    #[error("Unknown dependency {id} referenced by {referenced_by}")]
    UnknownDependency { id: String, referenced_by: String },

    #[error("Workspace error for epic {epic}: {reason}")]
    Workspace { epic: String, reason: String },

    #[error("Invalid workspace transition from {from} to {to}")]
    InvalidWorkspaceTransition { from: String, to: String },

    #[error("Task {task} blocked: hard dependency {unmet} not completed")]
    BlockedDependency { task: String, unmet: String },

    #[error("Task {task} execution failed: {reason}")]
    TaskExecution { task: String, reason: String },

    #[error("Merge conflict on branch {branch}: {}", paths.join(", "))]
    MergeConflict { branch: String, paths: Vec<String> },

    #[error("Validation command failed: {command}: {stderr}")]
    ValidationFailed { command: String, stderr: String },

    #[error("Invalid run transition from {from} to {to}")]
    InvalidRunTransition { from: String, to: String },

    #[error("Plan not found: {0}")]
    PlanNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
