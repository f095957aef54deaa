//! `phasekit init`: create the `.planning/` tree in a project.
//!
//! ```text
//! .planning/
//! ├── config.toml      # Settings, all fields defaulted
//! ├── phases/          # One directory per phase
//! └── logs/            # Runner prompts/output and --log-file output
//! ```
//!
//! `STATE.log` and `ISSUES.md` are created on first write.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::phase::manager::PLANNING_DIR;
use crate::settings::{CONFIG_FILE, Settings};

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    pub planning_dir: PathBuf,
    /// False when `.planning/` already existed
    pub created: bool,
    /// False when an existing `config.toml` was kept
    pub wrote_config: bool,
}

/// Initialize a project; an existing tree is completed, never overwritten.
pub fn init_project(project_dir: &Path, project_name: Option<&str>) -> Result<InitResult> {
    let planning_dir = project_dir.join(PLANNING_DIR);
    let created = !planning_dir.exists();

    for dir in [planning_dir.join("phases"), planning_dir.join("logs")] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = planning_dir.join(CONFIG_FILE);
    let wrote_config = !config_path.exists();
    if wrote_config {
        let mut settings = Settings::default();
        settings.project.name = project_name.map(str::to_string).or_else(|| {
            project_dir
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        });
        settings.save(&config_path)?;
    }

    tracing::debug!(dir = %planning_dir.display(), created, "Initialized planning directory");
    Ok(InitResult {
        planning_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(PLANNING_DIR).is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_project_creates_planning_tree() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path(), Some("shop")).unwrap();

        assert!(result.created);
        assert!(result.wrote_config);
        assert_eq!(result.planning_dir, dir.path().join(".planning"));
        assert!(dir.path().join(".planning/phases").is_dir());
        assert!(dir.path().join(".planning/logs").is_dir());

        let settings = Settings::load(&dir.path().join(".planning/config.toml")).unwrap();
        assert_eq!(settings.project.name.as_deref(), Some("shop"));
        assert_eq!(settings.runner.command, "claude");
    }

    #[test]
    fn test_init_project_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let planning = dir.path().join(".planning");
        std::fs::create_dir_all(&planning).unwrap();
        std::fs::write(planning.join("config.toml"), "[runner]\ncommand = \"agent\"\n").unwrap();

        let result = init_project(dir.path(), None).unwrap();
        assert!(!result.created);
        assert!(!result.wrote_config);
        assert!(planning.join("phases").is_dir());

        let content = std::fs::read_to_string(planning.join("config.toml")).unwrap();
        assert_eq!(content, "[runner]\ncommand = \"agent\"\n");
    }

    #[test]
    fn test_is_initialized() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
        init_project(dir.path(), None).unwrap();
        assert!(is_initialized(dir.path()));
    }
}
