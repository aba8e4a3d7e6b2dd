use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::{mlog_debug, Error, Result};

fn default_max_concurrent_epics() -> usize {
    4
}

fn default_trunk_branch() -> String {
    "main".to_string()
}

/// Engine configuration, loaded from ~/.maestro/maestro.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on epics running concurrently within one batch.
    #[serde(default = "default_max_concurrent_epics")]
    pub max_concurrent_epics: usize,
    /// Override for where epic workspaces are materialized.
    pub workspace_dir: Option<String>,
    /// Branch that completed workspaces merge back into.
    #[serde(default = "default_trunk_branch")]
    pub trunk_branch: String,
    /// Commands run in the trunk after a batch's merges, gating advancement.
    #[serde(default)]
    pub validation_commands: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_epics: default_max_concurrent_epics(),
            workspace_dir: None,
            trunk_branch: default_trunk_branch(),
            validation_commands: Vec::new(),
        }
    }
}

impl Config {
    pub fn engine_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::engine_dir()?.join("maestro.toml"))
    }

    pub fn plans_dir() -> Result<PathBuf> {
        Ok(Self::engine_dir()?.join("plans"))
    }

    pub fn cost_ledger_path() -> Result<PathBuf> {
        Ok(Self::engine_dir()?.join("costs.jsonl"))
    }

    pub fn workspaces_dir(&self) -> Result<PathBuf> {
        match &self.workspace_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::engine_dir()?.join("workspaces")),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        mlog_debug!(
            "Config loaded: max_concurrent_epics={}, workspace_dir={:?}, trunk={}",
            config.max_concurrent_epics,
            config.workspace_dir,
            config.trunk_branch
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let engine_dir = Self::engine_dir()?;
        mlog_debug!("Config::save engine_dir={}", engine_dir.display());
        if !engine_dir.exists() {
            fs::create_dir_all(&engine_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        let engine_dir = Self::engine_dir()?;
        let workspaces_dir = self.workspaces_dir()?;
        let plans_dir = Self::plans_dir()?;
        mlog_debug!(
            "Config::ensure_dirs engine={} workspaces={}",
            engine_dir.display(),
            workspaces_dir.display()
        );
        for dir in [&engine_dir, &workspaces_dir, &plans_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
