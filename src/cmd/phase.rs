//! Phase creation, listing and status commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::{Cli, PhaseCommands};
use phasekit::config::Config;
use phasekit::phase::{PhaseInfo, PhaseProgress, PhaseStatus, PlanState};

pub fn cmd_phase(project_dir: &Path, cli: &Cli, command: PhaseCommands) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
    super::require_initialized(&config)?;
    let planning = config.planning();

    match command {
        PhaseCommands::New {
            name,
            goal,
            depends_on,
        } => {
            let phase = planning.create_phase(&name, &goal, &depends_on)?;
            println!(
                "{} phase {:02}: {}",
                style("Created").green().bold(),
                phase.number,
                phase.name
            );
            println!("  {}", phase.dir.display());
        }
        PhaseCommands::List { json } => {
            let phases = planning.list_phases()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&phases)?);
                return Ok(());
            }
            if phases.is_empty() {
                println!();
                println!("No phases found. Run 'phasekit phase new <name>' to create one.");
                println!();
                return Ok(());
            }
            print_phase_table(&phases);
        }
        PhaseCommands::Status { phase, json } => {
            let progress: Vec<PhaseProgress> = match phase {
                Some(number) => vec![planning.phase_status(number)?],
                None => planning
                    .list_phases()?
                    .iter()
                    .map(|p| planning.phase_status(p.number))
                    .collect::<Result<_>>()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
                return Ok(());
            }
            println!();
            for p in &progress {
                print_progress(p);
            }
            println!();
        }
    }

    Ok(())
}

fn status_style(status: PhaseStatus) -> console::StyledObject<&'static str> {
    match status {
        PhaseStatus::Complete => style(status.as_str()).green(),
        PhaseStatus::InProgress => style(status.as_str()).yellow(),
        PhaseStatus::Pending => style(status.as_str()).dim(),
    }
}

fn print_phase_table(phases: &[PhaseInfo]) {
    println!();
    println!("{:<8} {:<28} {:<12} Plans", "Phase", "Name", "Status");
    println!(
        "{:<8} {:<28} {:<12} -----",
        "--------", "----------------------------", "------------"
    );
    for phase in phases {
        println!(
            "{:<8} {:<28} {:<12} {}/{}",
            format!("{:02}", phase.number),
            phase.name,
            status_style(phase.status),
            phase.completed_plans(),
            phase.plans.len()
        );
        for plan in &phase.plans {
            let state = match plan.state {
                PlanState::Complete => style(plan.state.as_str()).green(),
                PlanState::InProgress => style(plan.state.as_str()).yellow(),
                PlanState::Pending => style(plan.state.as_str()).dim(),
            };
            println!("  {:<6} {}", plan.id.scope(), state);
        }
    }
    println!();
}

fn print_progress(progress: &PhaseProgress) {
    println!(
        "Phase {:02} {} [{}] {}% ({}/{} plans)",
        progress.phase,
        style(&progress.name).bold(),
        status_style(progress.status),
        progress.progress,
        progress.completed,
        progress.total
    );
    if progress.in_progress > 0 {
        println!("  in progress: {}", progress.in_progress);
    }
    println!("  next: {}", progress.next_action);
}
