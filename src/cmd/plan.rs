//! Plan creation and validation commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::{Cli, PlanCommands};
use phasekit::config::Config;
use phasekit::orchestrator::{ExecuteOptions, PlanStatus, validate_plan};
use phasekit::plan::{AutoTask, CheckpointGate, CheckpointKind, CheckpointTask, Task};

pub fn cmd_plan(project_dir: &Path, cli: &Cli, command: PlanCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;

    match command {
        PlanCommands::New {
            phase,
            objective,
            tasks,
            checkpoint,
        } => {
            super::require_initialized(&config)?;
            let tasks = build_tasks(&tasks, checkpoint);
            let empty = tasks.is_empty();
            let info = config.planning().create_plan(phase, &objective, tasks)?;

            println!(
                "{} plan {} at {}",
                style("Created").green().bold(),
                info.id,
                info.path.display()
            );
            if empty {
                println!("  The plan has no tasks yet; add <task> blocks before executing it.");
            } else {
                println!("  Fill in <action>, <verify> and <done> for each task, then run:");
                println!("  phasekit execute {}", info.id);
            }
        }
        PlanCommands::Validate { plan, json } => {
            let path = super::resolve_plan_arg(project_dir, &config, &plan)?;
            let record = validate_plan(&path, &ExecuteOptions::default())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!();
                println!("Plan {} ({})", style(&record.plan_id).cyan(), path.display());
                if let Some(ref error) = record.error {
                    println!("  {} {}: {}", style("✗").red(), error.code, error.message);
                } else {
                    println!("  strategy: {}", record.strategy);
                    println!("  tasks:    {}", record.task_count);
                    for result in &record.task_results {
                        println!("    {:<10} {:<22} {}", result.task_id, result.kind, result.name);
                    }
                    if record.task_count == 0 {
                        println!("  {} plan has no tasks", style("warning:").yellow());
                    }
                    for warning in &record.warnings {
                        println!("  {} {}", style("warning:").yellow(), warning);
                    }
                    println!("  {} valid", style("✓").green());
                }
                println!();
            }

            if record.status == PlanStatus::Failed {
                anyhow::bail!("Plan {} is malformed", record.plan_id);
            }
        }
    }

    Ok(())
}

/// Auto tasks numbered `task-1..`, then an optional human-verify checkpoint.
fn build_tasks(names: &[String], checkpoint: bool) -> Vec<Task> {
    let mut tasks: Vec<Task> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            Task::Auto(
                AutoTask::new(&format!("task-{}", i + 1), name)
                    .with_action("Describe the change")
                    .with_verify("Command or check proving the task works")
                    .with_done("Acceptance criteria"),
            )
        })
        .collect();

    if checkpoint {
        let id = format!("task-{}", tasks.len() + 1);
        tasks.push(Task::Checkpoint(
            CheckpointTask::new(&id, CheckpointKind::HumanVerify)
                .with_gate(CheckpointGate::Blocking)
                .with_what_built("The changes made by the tasks above")
                .with_how_to_verify("Describe how to check the result")
                .with_resume_signal("Type \"approved\" or describe issues"),
        ));
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tasks_numbers_and_checkpoint() {
        let tasks = build_tasks(&["Add model".into(), "Wire routes".into()], true);
        let ids: Vec<&str> = tasks.iter().map(Task::id).collect();
        assert_eq!(ids, vec!["task-1", "task-2", "task-3"]);
        assert!(!tasks[1].is_checkpoint());
        assert!(tasks[2].is_checkpoint());
    }

    #[test]
    fn test_build_tasks_without_checkpoint() {
        let tasks = build_tasks(&["Only".into()], false);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "Only");
    }
}
