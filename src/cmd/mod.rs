//! CLI command implementations.
//!
//! | Module     | Commands handled                  |
//! |------------|-----------------------------------|
//! | `project`  | `Init`, `Reset`                   |
//! | `phase`    | `Phase new/list/status`           |
//! | `plan`     | `Plan new/validate`               |
//! | `run`      | `Execute`, `Resume`               |
//! | `classify` | `Classify`                        |
//! | `config`   | `Config`                          |

pub mod classify;
pub mod config;
pub mod phase;
pub mod plan;
pub mod project;
pub mod run;

pub use classify::cmd_classify;
pub use config::cmd_config;
pub use phase::cmd_phase;
pub use plan::cmd_plan;
pub use project::{cmd_init, cmd_reset};
pub use run::{ExecuteArgs, ResumeArgs, cmd_execute, cmd_resume};

use anyhow::{Context, Result};
use phasekit::config::Config;
use phasekit::plan::PlanId;
use std::path::{Path, PathBuf};

/// A plan argument is either a path to a plan file or an `NN-MM` id.
pub(crate) fn resolve_plan_arg(project_dir: &Path, config: &Config, plan: &str) -> Result<PathBuf> {
    let as_path = Path::new(plan);
    let candidate = if as_path.is_absolute() {
        as_path.to_path_buf()
    } else {
        project_dir.join(as_path)
    };
    if candidate.is_file() {
        return Ok(candidate);
    }

    if let Ok(id) = plan.parse::<PlanId>() {
        return config
            .planning()
            .resolve_plan(id)?
            .with_context(|| format!("No plan {} under {}", id, config.planning_dir.display()));
    }

    // Let the engine report the missing file with its own error code
    Ok(candidate)
}

pub(crate) fn require_initialized(config: &Config) -> Result<()> {
    if !config.is_initialized() {
        anyhow::bail!(
            "No .planning directory in {}. Run 'phasekit init' first.",
            config.project_dir.display()
        );
    }
    Ok(())
}
