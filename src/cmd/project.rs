//! Project initialization and reset commands.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;

pub fn cmd_init(project_dir: &Path, name: Option<&str>) -> Result<()> {
    use phasekit::init::init_project;

    let result = init_project(project_dir, name)?;

    if result.created {
        println!(
            "Initialized phasekit project at {}",
            result.planning_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .planning/");
        println!("  ├── config.toml   # Runner, execution and git settings");
        println!("  ├── phases/       # One directory per phase (use `phasekit phase new`)");
        println!("  └── logs/         # Runner prompts and output");
        println!();
        println!("Next steps:");
        println!("  1. Run `phasekit phase new <name>` to create a phase");
        println!("  2. Run `phasekit plan new <phase> --objective ...` to write a plan");
        println!("  3. Run `phasekit execute <NN-MM>` to execute it");
    } else {
        println!(
            "phasekit project already initialized at {}",
            result.planning_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing config.toml.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, plan: Option<&str>, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use phasekit::config::Config;
    use phasekit::phase::manager::summary_path_for;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
    super::require_initialized(&config)?;

    let prompt = match plan {
        Some(plan) => format!("This will mark plan {} as not complete. Are you sure?", plan),
        None => "This will clear all execution history. Are you sure?".to_string(),
    };
    if !force {
        let confirm = Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    match plan {
        Some(plan) => {
            let path = super::resolve_plan_arg(project_dir, &config, plan)?;
            let summary = summary_path_for(&path);
            if summary.exists() {
                std::fs::remove_file(&summary)?;
                println!("Removed {}", summary.display());
            } else {
                println!("Plan {} has no summary; nothing to reset", plan);
            }
        }
        None => {
            config.planning().state_log().reset()?;
            println!("Reset complete");
        }
    }
    Ok(())
}
