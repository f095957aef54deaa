use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phasekit::dag::DependencyMode;
use phasekit::logging::{self, LogFormat, LoggingOptions};
use phasekit::orchestrator::Strategy;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "phasekit")]
#[command(version, about = "Run phased plan documents task by task with checkpoints and atomic commits")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Also write logs to .planning/logs/phasekit.log
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .planning/ directory
    Init {
        /// Project name stored in config.toml (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Create, list and inspect phases
    Phase {
        #[command(subcommand)]
        command: PhaseCommands,
    },
    /// Create and validate plan documents
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Execute a plan (path or NN-MM id)
    Execute {
        plan: String,

        /// Validate and report without running anything
        #[arg(long)]
        dry_run: bool,

        /// Override the strategy detected from the plan
        #[arg(long)]
        strategy: Option<Strategy>,

        /// all: every dependency must complete; any: at least one
        #[arg(long)]
        dependency_mode: Option<DependencyMode>,

        /// Retry rounds for failed tasks after the first pass
        #[arg(long, default_value = "0")]
        retries: u32,

        /// Maximum attempts per task (overrides config)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Print the execution record as JSON and never prompt
        #[arg(long)]
        json: bool,

        #[arg(long)]
        session_id: Option<String>,
    },
    /// Answer a checkpoint and continue the plan after it
    Resume {
        plan: String,
        checkpoint: String,

        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        #[arg(long)]
        reject: bool,

        /// Response passed to the next task
        #[arg(long)]
        result: Option<String>,

        #[arg(long)]
        strategy: Option<Strategy>,

        /// Dependency mode for the tasks after the checkpoint
        #[arg(long)]
        dependency_mode: Option<DependencyMode>,

        #[arg(long)]
        json: bool,

        #[arg(long)]
        session_id: Option<String>,
    },
    /// Show which deviation rule applies to a description
    Classify {
        description: String,

        #[arg(long = "type", default_value = "")]
        kind: String,

        /// The deviation blocks progress
        #[arg(long)]
        blocking: bool,

        #[arg(long)]
        json: bool,
    },
    /// Clear execution history, or un-complete one plan
    Reset {
        /// Remove this plan's summary so it can run again
        #[arg(long)]
        plan: Option<String>,

        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PhaseCommands {
    /// Create the next phase
    New {
        name: String,

        #[arg(long, default_value = "")]
        goal: String,

        /// Phases this one builds on (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<String>,
    },
    /// List phases and their plans
    List {
        #[arg(long)]
        json: bool,
    },
    /// Progress of one phase, or all phases
    Status {
        phase: Option<u32>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum PlanCommands {
    /// Write a new plan into a phase
    New {
        phase: u32,

        #[arg(long)]
        objective: String,

        /// Auto task name; repeat for several tasks
        #[arg(long = "task")]
        tasks: Vec<String>,

        /// Append a human-verify checkpoint after the tasks
        #[arg(long)]
        checkpoint: bool,
    },
    /// Parse a plan and report problems
    Validate {
        plan: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default config.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _log_guard = logging::init(&LoggingOptions {
        verbose: cli.verbose,
        format: cli.log_format,
        file_dir: cli
            .log_file
            .then(|| project_dir.join(".planning").join("logs")),
    })?;

    match &cli.command {
        Commands::Init { name } => cmd::cmd_init(&project_dir, name.as_deref())?,
        Commands::Phase { command } => cmd::cmd_phase(&project_dir, &cli, command.clone())?,
        Commands::Plan { command } => cmd::cmd_plan(&project_dir, &cli, command.clone())?,
        Commands::Execute {
            plan,
            dry_run,
            strategy,
            dependency_mode,
            retries,
            max_attempts,
            json,
            session_id,
        } => {
            cmd::cmd_execute(
                &project_dir,
                &cli,
                cmd::ExecuteArgs {
                    plan: plan.clone(),
                    dry_run: *dry_run,
                    strategy: *strategy,
                    dependency_mode: *dependency_mode,
                    retries: *retries,
                    max_attempts: *max_attempts,
                    json: *json,
                    session_id: session_id.clone(),
                },
            )
            .await?
        }
        Commands::Resume {
            plan,
            checkpoint,
            approve,
            reject,
            result,
            strategy,
            dependency_mode,
            json,
            session_id,
        } => {
            cmd::cmd_resume(
                &project_dir,
                &cli,
                cmd::ResumeArgs {
                    plan: plan.clone(),
                    checkpoint: checkpoint.clone(),
                    approve: *approve,
                    reject: *reject,
                    result: result.clone(),
                    strategy: *strategy,
                    dependency_mode: *dependency_mode,
                    json: *json,
                    session_id: session_id.clone(),
                },
            )
            .await?
        }
        Commands::Classify {
            description,
            kind,
            blocking,
            json,
        } => cmd::cmd_classify(description, kind, *blocking, *json)?,
        Commands::Reset { plan, force } => {
            cmd::cmd_reset(&project_dir, &cli, plan.as_deref(), *force)?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
