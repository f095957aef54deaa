//! `execute` and `resume`: drive a plan through the engine and answer its halts.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::sync::Arc;

use super::super::Cli;
use phasekit::EngineError;
use phasekit::config::Config;
use phasekit::dag::DependencyMode;
use phasekit::gates::{ApprovalGate, CheckpointAnswer};
use phasekit::orchestrator::{
    CheckpointHalt, CommandTaskRunner, ExecuteOptions, ExecutionRecord, PlanExecutor, PlanStatus,
    ResumeRequest, Strategy, validate_plan,
};
use phasekit::plan::{TaskStatus, parse_plan};
use phasekit::tracker::GitTracker;

pub struct ExecuteArgs {
    pub plan: String,
    pub dry_run: bool,
    pub strategy: Option<Strategy>,
    pub dependency_mode: Option<DependencyMode>,
    pub retries: u32,
    pub max_attempts: Option<u32>,
    pub json: bool,
    pub session_id: Option<String>,
}

pub struct ResumeArgs {
    pub plan: String,
    pub checkpoint: String,
    pub approve: bool,
    pub reject: bool,
    pub result: Option<String>,
    pub strategy: Option<Strategy>,
    pub dependency_mode: Option<DependencyMode>,
    pub json: bool,
    pub session_id: Option<String>,
}

pub async fn cmd_execute(project_dir: &Path, cli: &Cli, args: ExecuteArgs) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?
        .with_dependency_mode(args.dependency_mode)
        .with_max_attempts(args.max_attempts);
    for warning in &config.warnings {
        tracing::warn!("{}", warning);
    }
    let plan_path = super::resolve_plan_arg(project_dir, &config, &args.plan)?;

    let options = ExecuteOptions {
        dry_run: args.dry_run,
        strategy: args.strategy,
        dependency_mode: args.dependency_mode,
        session_id: args.session_id.clone(),
    };

    if args.dry_run {
        let record = validate_plan(&plan_path, &options)?;
        return report(&record, args.json);
    }

    super::require_initialized(&config)?;
    let executor = build_executor(&config)?;
    let gate = gate_for(args.json);

    let record = executor.execute_plan(&plan_path, options).await?;
    let record = drive_halts(&executor, &gate, &plan_path, record, args.retries).await?;
    report(&record, args.json)
}

pub async fn cmd_resume(project_dir: &Path, cli: &Cli, args: ResumeArgs) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?
        .with_dependency_mode(args.dependency_mode);
    super::require_initialized(&config)?;
    let plan_path = super::resolve_plan_arg(project_dir, &config, &args.plan)?;
    let executor = build_executor(&config)?;
    let gate = gate_for(args.json);

    let approved = if args.approve {
        Some(true)
    } else if args.reject {
        Some(false)
    } else {
        None
    };

    let (approved, result) = match approved {
        Some(approved) => (approved, args.result.clone()),
        None => {
            if !gate.is_interactive() {
                anyhow::bail!(
                    "Pass --approve or --reject to answer checkpoint {} non-interactively",
                    args.checkpoint
                );
            }
            let halt = load_halt(&plan_path, &args.checkpoint)?;
            match gate.check_checkpoint(&halt)? {
                CheckpointAnswer::Approve { result } => (true, result.or(args.result.clone())),
                CheckpointAnswer::Reject => (false, None),
                CheckpointAnswer::Later => {
                    println!("Checkpoint {} left pending", args.checkpoint);
                    return Ok(());
                }
            }
        }
    };

    let mut request = if approved {
        ResumeRequest::approve(&plan_path, &args.checkpoint)
    } else {
        ResumeRequest::reject(&plan_path, &args.checkpoint)
    };
    if let Some(ref result) = result {
        request = request.with_result(result);
    }
    request.strategy = args.strategy;
    request.dependency_mode = args.dependency_mode;
    request.session_id = args.session_id.clone();

    let record = executor.resume_checkpoint(request).await?;
    let record = drive_halts(&executor, &gate, &plan_path, record, 0).await?;
    report(&record, args.json)
}

fn gate_for(json: bool) -> ApprovalGate {
    if json {
        ApprovalGate::new(false)
    } else {
        ApprovalGate::detect()
    }
}

fn build_executor(config: &Config) -> Result<PlanExecutor> {
    config.ensure_directories()?;
    let runner = CommandTaskRunner::new(
        &config.settings.runner.command,
        config.settings.runner.args.clone(),
        config.project_dir.clone(),
    )
    .with_log_dir(config.log_dir.clone())
    .with_verbose(config.verbose);

    let git = GitTracker::new(&config.project_dir)
        .with_context(|| {
            format!(
                "{} is not inside a git repository",
                config.project_dir.display()
            )
        })?
        .with_author(
            &config.settings.git.author_name,
            &config.settings.git.author_email,
        );

    Ok(PlanExecutor::new(
        Arc::new(runner),
        Arc::new(git),
        Arc::new(config.planning()),
    )
    .with_settings(config.engine_settings()))
}

/// The checkpoint as declared in the plan, for prompting before a resume.
fn load_halt(plan_path: &Path, checkpoint_id: &str) -> Result<CheckpointHalt> {
    let text = std::fs::read_to_string(plan_path)
        .with_context(|| format!("Failed to read {}", plan_path.display()))?;
    let plan = parse_plan(&text)?;
    let checkpoint = plan
        .checkpoint(checkpoint_id)
        .ok_or_else(|| EngineError::CheckpointNotFound {
            plan_id: plan.identity().map(|id| id.scope()).unwrap_or_default(),
            checkpoint_id: checkpoint_id.to_string(),
        })?;
    Ok(CheckpointHalt::from(checkpoint))
}

/// Answer checkpoints and decisions, and run retry rounds, until the record
/// settles or the user defers.
async fn drive_halts(
    executor: &PlanExecutor,
    gate: &ApprovalGate,
    plan_path: &Path,
    mut record: ExecutionRecord,
    retries: u32,
) -> Result<ExecutionRecord> {
    let mut rounds = 0;
    loop {
        if record.status == PlanStatus::AwaitingCheckpoint {
            let Some(halt) = record.checkpoint.clone() else {
                break;
            };
            if !gate.is_interactive() {
                break;
            }
            let request = match gate.check_checkpoint(&halt)? {
                CheckpointAnswer::Approve { result } => {
                    let request = ResumeRequest::approve(plan_path, &halt.id);
                    match result {
                        Some(result) => request.with_result(&result),
                        None => request,
                    }
                }
                CheckpointAnswer::Reject => ResumeRequest::reject(plan_path, &halt.id),
                CheckpointAnswer::Later => break,
            };
            let request = ResumeRequest {
                strategy: Some(record.strategy),
                session_id: record.session_id.clone(),
                ..request
            };
            record = executor.resume_checkpoint(request).await?;
            continue;
        }

        if let Some(prompt) = record.pending_decision.clone() {
            if !gate.is_interactive() {
                break;
            }
            let Some(answer) = gate.check_decision(&prompt)? else {
                break;
            };
            record = executor
                .resolve_decision(&record.plan_id, answer.option, answer.note)
                .await?;
            continue;
        }

        if matches!(record.status, PlanStatus::Failed | PlanStatus::Partial) && rounds < retries {
            rounds += 1;
            tracing::info!(plan = %record.plan_id, round = rounds, "Retrying failed tasks");
            match executor.retry(&record.plan_id).await {
                Ok(next) => record = next,
                Err(EngineError::NoRetryableTasks { .. }) => break,
                Err(e) => return Err(e.into()),
            }
            continue;
        }

        break;
    }
    Ok(record)
}

fn report(record: &ExecutionRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
    } else {
        print_record(record);
    }

    match record.status {
        PlanStatus::Failed | PlanStatus::Cancelled => {
            let reason = record
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.code, e.message))
                .unwrap_or_else(|| record.status.to_string());
            anyhow::bail!("Plan {} {}", record.plan_id, reason)
        }
        _ => Ok(()),
    }
}

fn status_label(status: TaskStatus) -> console::StyledObject<&'static str> {
    let label = status.as_str();
    match status {
        TaskStatus::Completed => style(label).green(),
        TaskStatus::Failed => style(label).red(),
        TaskStatus::Blocked => style(label).red().dim(),
        TaskStatus::Skipped => style(label).dim(),
        TaskStatus::Running => style(label).yellow(),
        TaskStatus::Pending => style(label).dim(),
    }
}

fn print_record(record: &ExecutionRecord) {
    println!();
    let header = if record.dry_run { "Dry run" } else { "Plan" };
    let status = match record.status {
        PlanStatus::Completed => style(record.status.as_str()).green().bold(),
        PlanStatus::Failed | PlanStatus::Cancelled => style(record.status.as_str()).red().bold(),
        _ => style(record.status.as_str()).yellow().bold(),
    };
    println!(
        "{} {} [{}] strategy={} tasks={}",
        style(header).bold(),
        style(&record.plan_id).cyan(),
        status,
        record.strategy,
        record.task_count
    );

    for result in &record.task_results {
        let commit = result
            .commit_hash
            .as_deref()
            .map(|h| format!(" {}", style(&h[..h.len().min(7)]).dim()))
            .unwrap_or_default();
        println!(
            "  {:<10} {:<10} {}{}",
            result.task_id,
            status_label(result.status),
            result.name,
            commit
        );
        if let Some(ref error) = result.error {
            println!("  {:<10} {}", "", style(error.to_string()).red());
        }
    }

    if !record.deviations.is_empty() {
        println!();
        println!("Deviations:");
        for deviation in &record.deviations {
            println!(
                "  [{}] {} ({})",
                deviation.task_id,
                deviation.description,
                deviation.rule
            );
        }
    }
    if !record.deferred_issues.is_empty() {
        println!("Deferred to ISSUES.md: {}", record.deferred_issues.len());
    }
    for warning in &record.warnings {
        println!("{} {}", style("warning:").yellow(), warning);
    }

    if let Some(ref path) = record.summary_path {
        println!();
        println!("Summary written to {}", path.display());
    }
    if let Some(ref halt) = record.checkpoint {
        println!();
        println!(
            "Resume with: phasekit resume {} {} --approve [--result <text>]",
            record.plan_id, halt.id
        );
    }
    if let Some(ref prompt) = record.pending_decision {
        println!();
        println!(
            "Task {} is waiting on an architectural decision: {}",
            prompt.task_id, prompt.description
        );
    }
    println!();
}
