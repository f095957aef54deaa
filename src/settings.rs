//! Project settings read from `.planning/config.toml`.
//!
//! Every field has a default, so an empty or missing file is valid. Values
//! are layered file → environment → CLI flags; this module handles the first
//! two, [`crate::config::Config`] applies the flags.
//!
//! ```toml
//! [project]
//! name = "my-project"
//!
//! [runner]
//! command = "claude"
//! args = ["--print"]
//!
//! [execution]
//! dependency_mode = "all"   # all | any
//! max_attempts = 3
//! backoff_ms = 1000
//! auto_commit = true
//!
//! [git]
//! author_name = "phasekit"
//! author_email = "phasekit@localhost"
//! ```

use crate::dag::DependencyMode;
use crate::orchestrator::{EngineSettings, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "config.toml";

pub const ENV_RUNNER_CMD: &str = "PHASEKIT_RUNNER_CMD";
pub const ENV_MAX_ATTEMPTS: &str = "PHASEKIT_MAX_ATTEMPTS";
pub const ENV_BACKOFF_MS: &str = "PHASEKIT_BACKOFF_MS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Defaults to the project directory name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The external agent CLI that executes auto tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSection {
    #[serde(default = "default_runner_command")]
    pub command: String,
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
}

fn default_runner_command() -> String {
    "claude".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["--print".to_string()]
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
            args: default_runner_args(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub dependency_mode: DependencyMode,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_auto_commit() -> bool {
    true
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            dependency_mode: DependencyMode::default(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            auto_commit: default_auto_commit(),
        }
    }
}

/// Identity used for commits when the repository has none configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_author_name() -> String {
    "phasekit".to_string()
}

fn default_author_email() -> String {
    "phasekit@localhost".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

/// Contents of `.planning/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub git: GitSection,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config.toml")
    }

    /// Load `config.toml` from the planning directory, or defaults if it is missing.
    pub fn load_or_default(planning_dir: &Path) -> Result<Self> {
        let config_path = planning_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config.toml")
    }

    /// Apply `PHASEKIT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Vec<String> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup; returns warnings for values
    /// that could not be parsed (those are ignored).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(cmd) = lookup(ENV_RUNNER_CMD)
            && !cmd.trim().is_empty()
        {
            self.runner.command = cmd.trim().to_string();
        }

        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            match raw.trim().parse() {
                Ok(value) => self.execution.max_attempts = value,
                Err(_) => warnings.push(format!("Ignoring {}='{}': not a number", ENV_MAX_ATTEMPTS, raw)),
            }
        }

        if let Some(raw) = lookup(ENV_BACKOFF_MS) {
            match raw.trim().parse() {
                Ok(value) => self.execution.backoff_ms = value,
                Err(_) => warnings.push(format!("Ignoring {}='{}': not a number", ENV_BACKOFF_MS, raw)),
            }
        }

        warnings
    }

    /// Non-fatal problems with the current values.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.runner.command.trim().is_empty() {
            warnings.push("runner.command is empty; auto tasks cannot run".to_string());
        }
        if self.execution.max_attempts == 0 {
            warnings.push("execution.max_attempts = 0: failed tasks will never be retried".to_string());
        }
        if self.execution.backoff_ms > 60_000 {
            warnings.push(format!(
                "execution.backoff_ms = {} exceeds one minute; retries will be slow",
                self.execution.backoff_ms
            ));
        }
        if !self.execution.auto_commit {
            warnings.push("execution.auto_commit = false: completed tasks will not be committed".to_string());
        }
        if !self.git.author_email.contains('@') {
            warnings.push(format!(
                "git.author_email '{}' does not look like an email address",
                self.git.author_email
            ));
        }

        warnings
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            dependency_mode: self.execution.dependency_mode,
            retry: RetryPolicy {
                max_attempts: self.execution.max_attempts,
                backoff_ms: self.execution.backoff_ms,
            },
            auto_commit: self.execution.auto_commit,
        }
    }
}
