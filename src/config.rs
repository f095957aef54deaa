use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::dag::DependencyMode;
use crate::orchestrator::EngineSettings;
use crate::phase::PlanningDir;
use crate::phase::manager::PLANNING_DIR;
use crate::settings::{CONFIG_FILE, Settings};

/// Runtime configuration for phasekit.
///
/// Resolves the project layout and layers CLI flags over the file and
/// environment values held in [`Settings`].
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub planning_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub settings: Settings,
    /// Problems found while layering, e.g. unparsable environment values
    pub warnings: Vec<String>,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let planning_dir = project_dir.join(PLANNING_DIR);

        let mut settings = Settings::load_or_default(&planning_dir)?;
        let warnings = settings.apply_env();

        Ok(Self {
            config_file: planning_dir.join(CONFIG_FILE),
            log_dir: planning_dir.join("logs"),
            project_dir,
            planning_dir,
            verbose,
            settings,
            warnings,
        })
    }

    /// `--dependency-mode`
    pub fn with_dependency_mode(mut self, mode: Option<DependencyMode>) -> Self {
        if let Some(mode) = mode {
            self.settings.execution.dependency_mode = mode;
        }
        self
    }

    /// `--max-attempts`
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        if let Some(attempts) = attempts {
            self.settings.execution.max_attempts = attempts;
        }
        self
    }

    pub fn project_name(&self) -> String {
        self.settings.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        })
    }

    pub fn planning(&self) -> PlanningDir {
        PlanningDir::new(self.planning_dir.clone())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        self.settings.engine_settings()
    }

    pub fn is_initialized(&self) -> bool {
        self.planning_dir.is_dir()
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.planning_dir.join("phases"))
            .context("Failed to create phases directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_paths() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(config.planning_dir, root.join(".planning"));
        assert_eq!(config.config_file, root.join(".planning/config.toml"));
        assert_eq!(config.log_dir, root.join(".planning/logs"));
        assert!(!config.is_initialized());
    }

    #[test]
    fn test_cli_flags_override_file() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".planning")).unwrap();
        std::fs::write(
            dir.path().join(".planning/config.toml"),
            "[execution]\ndependency_mode = \"all\"\nmax_attempts = 2\n",
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), false)
            .unwrap()
            .with_dependency_mode(Some(DependencyMode::Any))
            .with_max_attempts(None);

        let engine = config.engine_settings();
        assert_eq!(engine.dependency_mode, DependencyMode::Any);
        assert_eq!(engine.retry.max_attempts, 2);
    }

    #[test]
    fn test_project_name_defaults_to_directory() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("my-app");
        std::fs::create_dir(&project).unwrap();

        let config = Config::new(project, false).unwrap();
        assert_eq!(config.project_name(), "my-app");
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.planning_dir.join("phases").is_dir());
        assert!(config.log_dir.is_dir());
        assert!(config.is_initialized());
    }
}
