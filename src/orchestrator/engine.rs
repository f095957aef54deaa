//! Plan execution state machine.
//!
//! [`PlanExecutor`] walks a parsed plan task by task: auto tasks go to the
//! [`TaskRunner`] and are committed one by one through [`GitOps`], checkpoints
//! halt the run until [`PlanExecutor::resume_checkpoint`] is called. Runs are
//! kept in memory, keyed by plan scope, so `retry`, `cancel` and decision
//! handling can pick them up later in the same process.
//!
//! Resuming is positional: the plan is re-parsed and every task scheduled
//! before the checkpoint is taken as done. Nothing on disk is consulted.

use crate::dag::{DependencyMode, Readiness, TaskSchedule, readiness, schedule};
use crate::deviation::{
    DecisionOption, DeviationContext, DeviationOutcome, IssueEntry, handle_deviation,
};
use crate::errors::{EngineError, ErrorCode, TaskExecutionError};
use crate::orchestrator::record::{
    CheckpointHalt, Commit, CommitType, ExecutionRecord, PlanStatus, RecordError, Strategy,
    TaskResult,
};
use crate::orchestrator::runner::{TaskContext, TaskRunner};
use crate::phase::{PlanSummary, parse_plan_file_name};
use crate::plan::{AutoTask, CheckpointGate, ParsedPlan, Task, TaskStatus, parse_plan};
use crate::tracker::GitOps;
use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Side effects of a run other than commits: history, deferred issues, summaries.
///
/// Implemented by [`crate::phase::PlanningDir`].
pub trait ExecutionJournal: Send + Sync {
    /// Append one task transition to the execution history.
    fn record_task(&self, plan: &str, task_id: &str, status: TaskStatus) -> Result<()>;

    /// Park a rule 5 enhancement for later.
    fn log_issue(&self, issue: &IssueEntry) -> Result<()>;

    /// Write the summary next to the plan and return its path.
    fn write_summary(&self, plan_path: &Path, summary: &PlanSummary) -> Result<PathBuf>;
}

/// Retry budget for failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows `previous_attempts` failed ones.
    pub fn delay_for(&self, previous_attempts: u32) -> Duration {
        if previous_attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(previous_attempts - 1);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub dependency_mode: DependencyMode,
    pub retry: RetryPolicy,
    /// Commit after each completed auto task
    pub auto_commit: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dependency_mode: DependencyMode::All,
            retry: RetryPolicy::default(),
            auto_commit: true,
        }
    }
}

/// Options for [`PlanExecutor::execute_plan`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Validate only; never touches the runner, git or the journal
    pub dry_run: bool,
    /// Overrides the strategy detected from the plan
    pub strategy: Option<Strategy>,
    /// Overrides the configured dependency mode
    pub dependency_mode: Option<DependencyMode>,
    pub session_id: Option<String>,
}

/// Arguments of [`PlanExecutor::resume_checkpoint`].
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub plan_path: PathBuf,
    pub checkpoint_id: String,
    pub approved: bool,
    /// Free-text response passed to the next task
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub strategy: Option<Strategy>,
    /// Overrides the configured dependency mode for the remaining tasks
    pub dependency_mode: Option<DependencyMode>,
}

impl ResumeRequest {
    pub fn approve(plan_path: impl Into<PathBuf>, checkpoint_id: &str) -> Self {
        Self {
            plan_path: plan_path.into(),
            checkpoint_id: checkpoint_id.to_string(),
            approved: true,
            result: None,
            session_id: None,
            strategy: None,
            dependency_mode: None,
        }
    }

    pub fn reject(plan_path: impl Into<PathBuf>, checkpoint_id: &str) -> Self {
        Self {
            approved: false,
            ..Self::approve(plan_path, checkpoint_id)
        }
    }

    pub fn with_result(mut self, result: &str) -> Self {
        self.result = Some(result.to_string());
        self
    }

    pub fn with_dependency_mode(mut self, mode: DependencyMode) -> Self {
        self.dependency_mode = Some(mode);
        self
    }
}

/// Everything needed to continue a run.
#[derive(Debug, Clone)]
struct RunState {
    scope: String,
    plan_path: PathBuf,
    plan: ParsedPlan,
    schedule: TaskSchedule,
    strategy: Strategy,
    mode: DependencyMode,
    record: ExecutionRecord,
    /// Tasks before a resumed checkpoint; never re-run, never in the record
    assumed_completed: HashSet<String>,
    cancel: Arc<AtomicBool>,
    /// Earlier invocations may have committed for this plan
    resumed: bool,
    /// Handed to the next auto task only
    human_input: Option<String>,
    session_id: Option<String>,
}

impl RunState {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        if self.assumed_completed.contains(task_id) {
            Some(TaskStatus::Completed)
        } else {
            self.record.status_of(task_id)
        }
    }

    fn set_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(result) = self.record.result_mut(task_id) {
            result.status = status;
        }
    }
}

enum TaskFlow {
    Continue,
    /// Stop the run; the record already carries the halting status
    Halt,
}

struct LoadedPlan {
    path: PathBuf,
    scope: String,
    hash: String,
    plan: ParsedPlan,
}

/// Short SHA-256 of the plan text, stored in records and summaries.
pub fn plan_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)[..12].to_string()
}

fn read_plan(path: &Path) -> Result<String, EngineError> {
    if !path.is_file() {
        return Err(EngineError::PlanFileNotFound {
            path: path.to_path_buf(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| EngineError::PlanRead {
        path: path.to_path_buf(),
        source,
    })
}

/// `01-02` from the frontmatter, else from an `NN-MM-PLAN.md` file name, else the file stem.
fn plan_scope(plan: Option<&ParsedPlan>, path: &Path) -> String {
    if let Some(id) = plan.and_then(ParsedPlan::identity) {
        return id.scope();
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(id) = parse_plan_file_name(&file_name) {
        return id.scope();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name)
}

fn load_plan(path: &Path) -> Result<LoadedPlan, EngineError> {
    let text = read_plan(path)?;
    let plan = parse_plan(&text).map_err(|source| EngineError::MalformedPlan {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LoadedPlan {
        path: path.to_path_buf(),
        scope: plan_scope(Some(&plan), path),
        hash: plan_hash(&text),
        plan,
    })
}

/// Runs plans against a task runner, a git repository and a journal.
pub struct PlanExecutor {
    runner: Arc<dyn TaskRunner>,
    git: Arc<dyn GitOps>,
    journal: Arc<dyn ExecutionJournal>,
    settings: EngineSettings,
    runs: Mutex<HashMap<String, RunState>>,
}

impl PlanExecutor {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        git: Arc<dyn GitOps>,
        journal: Arc<dyn ExecutionJournal>,
    ) -> Self {
        Self {
            runner,
            git,
            journal,
            settings: EngineSettings::default(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunState>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest record of the run for a plan scope.
    pub fn run_status(&self, plan_id: &str) -> Option<ExecutionRecord> {
        self.runs().get(plan_id).map(|run| run.record.clone())
    }

    /// Execute a plan from its first task.
    ///
    /// Only a missing or unreadable file and (outside dry run) a malformed plan
    /// are returned as errors; everything that happens to tasks is in the record.
    /// With `dry_run` this is [`validate_plan`].
    pub async fn execute_plan(
        &self,
        plan_path: &Path,
        options: ExecuteOptions,
    ) -> Result<ExecutionRecord, EngineError> {
        if options.dry_run {
            return validate_plan(plan_path, &options);
        }

        let loaded = load_plan(plan_path)?;
        let strategy = options
            .strategy
            .unwrap_or_else(|| Strategy::detect(&loaded.plan.tasks));
        let schedule = schedule(&loaded.plan.tasks);
        for warning in &schedule.warnings {
            tracing::warn!(plan = %loaded.scope, "{}", warning);
        }

        let mut record = new_record(&loaded, strategy, &schedule, options.session_id.clone());
        record.task_results = loaded.plan.tasks.iter().map(TaskResult::pending).collect();

        tracing::info!(
            plan = %loaded.scope,
            tasks = record.task_count,
            strategy = %strategy,
            "Executing plan"
        );

        let run = RunState {
            scope: loaded.scope,
            plan_path: loaded.path,
            plan: loaded.plan,
            schedule,
            strategy,
            mode: options
                .dependency_mode
                .unwrap_or(self.settings.dependency_mode),
            record,
            assumed_completed: HashSet::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            resumed: false,
            human_input: None,
            session_id: options.session_id,
        };
        self.drive(run, 0).await
    }

    /// Continue a plan from a checkpoint, or stop it there when not approved.
    pub async fn resume_checkpoint(
        &self,
        request: ResumeRequest,
    ) -> Result<ExecutionRecord, EngineError> {
        let loaded = load_plan(&request.plan_path)?;

        if loaded.plan.checkpoint(&request.checkpoint_id).is_none() {
            return Err(EngineError::CheckpointNotFound {
                plan_id: loaded.scope,
                checkpoint_id: request.checkpoint_id,
            });
        }
        if self
            .run_status(&loaded.scope)
            .is_some_and(|r| r.status == PlanStatus::Cancelled)
        {
            return Err(EngineError::PlanCancelled {
                plan_id: loaded.scope,
            });
        }

        let strategy = request
            .strategy
            .unwrap_or_else(|| Strategy::detect(&loaded.plan.tasks));
        let schedule = schedule(&loaded.plan.tasks);
        let Some(position) = schedule.position(&request.checkpoint_id) else {
            return Err(EngineError::CheckpointNotFound {
                plan_id: loaded.scope,
                checkpoint_id: request.checkpoint_id,
            });
        };

        let assumed_completed: HashSet<String> = schedule.order[..position]
            .iter()
            .map(|s| s.id.clone())
            .collect();
        let mut remaining: Vec<usize> = schedule.order[position..].iter().map(|s| s.index).collect();
        remaining.sort_unstable();

        let mut record = new_record(&loaded, strategy, &schedule, request.session_id.clone());
        record.task_results = remaining
            .into_iter()
            .map(|i| TaskResult::pending(&loaded.plan.tasks[i]))
            .collect();

        let mut run = RunState {
            scope: loaded.scope,
            plan_path: loaded.path,
            plan: loaded.plan,
            schedule,
            strategy,
            mode: request
                .dependency_mode
                .unwrap_or(self.settings.dependency_mode),
            record,
            assumed_completed,
            cancel: Arc::new(AtomicBool::new(false)),
            resumed: true,
            human_input: None,
            session_id: request.session_id,
        };

        if !request.approved {
            tracing::warn!(
                plan = %run.scope,
                checkpoint = %request.checkpoint_id,
                "Checkpoint not approved; stopping plan"
            );
            run.set_status(&request.checkpoint_id, TaskStatus::Failed);
            self.journal_task(&run.scope, &request.checkpoint_id, TaskStatus::Failed);
            run.record.error = Some(RecordError::new(
                ErrorCode::CheckpointNotApproved,
                "Checkpoint not approved",
            ));
            run.record.finish(PlanStatus::Failed);
            let record = run.record.clone();
            self.runs().insert(run.scope.clone(), run);
            return Ok(record);
        }

        tracing::info!(
            plan = %run.scope,
            checkpoint = %request.checkpoint_id,
            "Checkpoint approved; resuming"
        );
        run.set_status(&request.checkpoint_id, TaskStatus::Completed);
        self.journal_task(&run.scope, &request.checkpoint_id, TaskStatus::Completed);
        run.human_input = request.result;
        self.drive(run, position + 1).await
    }

    /// Re-run failed tasks that still have attempts left.
    pub async fn retry(&self, plan_id: &str) -> Result<ExecutionRecord, EngineError> {
        let mut run = self
            .runs()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound {
                plan_id: plan_id.to_string(),
            })?;

        if run.record.status == PlanStatus::Cancelled {
            return Err(EngineError::PlanCancelled {
                plan_id: plan_id.to_string(),
            });
        }
        let no_retry = || EngineError::NoRetryableTasks {
            plan_id: plan_id.to_string(),
        };
        if run.record.pending_decision.is_some() {
            return Err(no_retry());
        }

        let max_attempts = self.settings.retry.max_attempts;
        let retryable: Vec<String> = run
            .record
            .task_results
            .iter()
            .filter(|r| {
                !r.is_checkpoint()
                    && r.status == TaskStatus::Failed
                    && r.attempts < max_attempts
                    && !matches!(r.error, Some(TaskExecutionError::DecisionRequired(_)))
            })
            .map(|r| r.task_id.clone())
            .collect();
        if retryable.is_empty() {
            return Err(no_retry());
        }

        tracing::info!(plan = %plan_id, tasks = ?retryable, "Retrying failed tasks");
        for result in run.record.task_results.iter_mut() {
            if retryable.contains(&result.task_id) {
                // The error stays until the next attempt reads it
                result.status = TaskStatus::Pending;
            } else if result.status == TaskStatus::Blocked {
                result.status = TaskStatus::Pending;
                result.error = None;
            }
        }

        restart_record(&mut run.record);
        run.cancel = Arc::new(AtomicBool::new(false));
        self.drive(run, 0).await
    }

    /// Answer a pending rule 4 decision.
    ///
    /// `Abort` stops the plan. `Proceed` and `Modify` re-run the task that raised
    /// it with the answer (and `note`, if any) in its context.
    pub async fn resolve_decision(
        &self,
        plan_id: &str,
        option: DecisionOption,
        note: Option<String>,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut run = self
            .runs()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| EngineError::RunNotFound {
                plan_id: plan_id.to_string(),
            })?;
        if run.record.status == PlanStatus::Cancelled {
            return Err(EngineError::PlanCancelled {
                plan_id: plan_id.to_string(),
            });
        }
        let Some(prompt) = run.record.pending_decision.take() else {
            return Err(EngineError::NoPendingDecision {
                plan_id: plan_id.to_string(),
            });
        };

        tracing::info!(plan = %plan_id, task = %prompt.task_id, decision = ?option, "Decision received");

        if option == DecisionOption::Abort {
            run.record.error = Some(RecordError::new(
                ErrorCode::Aborted,
                format!("Aborted at decision for task {}", prompt.task_id),
            ));
            run.record.finish(PlanStatus::Failed);
            let record = run.record.clone();
            self.runs().insert(run.scope.clone(), run);
            return Ok(record);
        }

        for deviation in run.record.deviations.iter_mut() {
            if deviation.task_id == prompt.task_id {
                deviation.handled = true;
            }
        }
        for result in run.record.task_results.iter_mut() {
            if result.task_id == prompt.task_id || result.status == TaskStatus::Blocked {
                result.status = TaskStatus::Pending;
                result.error = None;
            }
        }

        let mut input = format!("Decision on \"{}\": {}", prompt.description, option.label());
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            input.push_str(&format!("\n{}", note.trim()));
        }
        run.human_input = Some(input);

        restart_record(&mut run.record);
        run.cancel = Arc::new(AtomicBool::new(false));
        self.drive(run, 0).await
    }

    /// Cancel a running or checkpoint-halted plan. Commits already made stay.
    pub fn cancel(&self, plan_id: &str) -> Result<ExecutionRecord, EngineError> {
        let mut runs = self.runs();
        let run = runs.get_mut(plan_id).ok_or_else(|| EngineError::RunNotFound {
            plan_id: plan_id.to_string(),
        })?;
        if !run.record.status.is_cancellable() {
            return Err(EngineError::NotCancellable {
                plan_id: plan_id.to_string(),
                status: run.record.status.to_string(),
            });
        }
        run.cancel.store(true, Ordering::SeqCst);
        run.record.finish(PlanStatus::Cancelled);
        tracing::info!(plan = %plan_id, "Plan cancelled");
        Ok(run.record.clone())
    }

    /// Run scheduled tasks from `start` until the plan ends or halts, then store the run.
    async fn drive(&self, mut run: RunState, start: usize) -> Result<ExecutionRecord, EngineError> {
        run.record.status = PlanStatus::Running;
        self.runs().insert(run.scope.clone(), run.clone());

        let halted = self.run_tasks(&mut run, start).await;

        let outcome = if run.cancelled() {
            run.record.finish(PlanStatus::Cancelled);
            Ok(())
        } else if halted {
            Ok(())
        } else {
            self.conclude(&mut run)
        };

        let record = self.store(run);
        outcome.map(|_| record)
    }

    /// Returns true when the run halted before the end of the schedule.
    async fn run_tasks(&self, run: &mut RunState, start: usize) -> bool {
        let order = run.schedule.order.clone();
        for slot in order.iter().skip(start) {
            if run.cancelled() {
                tracing::info!(plan = %run.scope, "Cancellation observed; stopping");
                return true;
            }
            if run.record.status_of(&slot.id) != Some(TaskStatus::Pending) {
                continue;
            }

            if let Readiness::Blocked(unmet) =
                readiness(slot, run.mode, |id| run.status_of(id))
            {
                tracing::warn!(plan = %run.scope, task = %slot.id, unmet = ?unmet, "Dependencies not met; blocking task");
                if let Some(result) = run.record.result_mut(&slot.id) {
                    result.status = TaskStatus::Blocked;
                    result.error = Some(TaskExecutionError::DependenciesUnmet(unmet));
                }
                self.journal_task(&run.scope, &slot.id, TaskStatus::Blocked);
                continue;
            }

            match run.plan.tasks[slot.index].clone() {
                Task::Checkpoint(checkpoint) => {
                    if run.strategy == Strategy::Autonomous
                        && checkpoint.gate == CheckpointGate::Optional
                    {
                        tracing::info!(plan = %run.scope, task = %checkpoint.id, "Skipping optional checkpoint");
                        run.set_status(&checkpoint.id, TaskStatus::Skipped);
                        self.journal_task(&run.scope, &checkpoint.id, TaskStatus::Skipped);
                        continue;
                    }
                    tracing::info!(
                        plan = %run.scope,
                        task = %checkpoint.id,
                        kind = %checkpoint.kind.as_str(),
                        "Halting at checkpoint"
                    );
                    run.record.checkpoint = Some(CheckpointHalt::from(&checkpoint));
                    run.record.finish(PlanStatus::AwaitingCheckpoint);
                    return true;
                }
                Task::Auto(task) => {
                    if let TaskFlow::Halt = self.run_auto_task(run, &task).await {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn run_auto_task(&self, run: &mut RunState, task: &AutoTask) -> TaskFlow {
        let started = Instant::now();
        let Some(result) = run.record.result_mut(&task.id) else {
            return TaskFlow::Continue;
        };
        result.status = TaskStatus::Running;
        result.attempts += 1;
        let attempt = result.attempts;
        let previous_error = result.error.take().map(|e| e.to_string());
        self.journal_task(&run.scope, &task.id, TaskStatus::Running);

        let delay = self.settings.retry.delay_for(attempt - 1);
        if !delay.is_zero() {
            tracing::info!(task = %task.id, attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }

        tracing::info!(plan = %run.scope, task = %task.id, attempt, "Running task: {}", task.name);

        let ctx = TaskContext {
            plan_id: run.scope.clone(),
            objective: run.plan.objective.clone(),
            plan_context: run.plan.context.clone(),
            context_files: run.plan.context_files(),
            attempt,
            previous_error,
            human_input: run.human_input.take(),
            session_id: run.session_id.clone(),
        };

        let outcome = match self.runner.run(task, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail_task(run, &task.id, TaskExecutionError::Runner(format!("{:#}", e)), started);
                return TaskFlow::Continue;
            }
        };

        let mut decision = None;
        for deviation in &outcome.deviations {
            let handled = handle_deviation(
                deviation,
                DeviationContext {
                    plan_id: &run.scope,
                    task_id: &task.id,
                    task_name: &task.name,
                },
            );
            tracing::info!(
                plan = %run.scope,
                task = %task.id,
                rule = handled.classification.rule.number(),
                action = handled.classification.action.as_str(),
                instructions = handled.record.instructions.as_deref().unwrap_or(""),
                "Deviation: {}",
                deviation.description
            );
            run.record.deviations.push(handled.record);
            match handled.outcome {
                DeviationOutcome::FoldIntoCommit { .. } => {}
                DeviationOutcome::AskUser { prompt } => {
                    if decision.is_none() {
                        decision = Some(prompt);
                    }
                }
                DeviationOutcome::Defer { issue, .. } => {
                    if let Err(e) = self.journal.log_issue(&issue) {
                        tracing::warn!(error = %e, "Failed to log deferred issue");
                    }
                    run.record.deferred_issues.push(issue);
                }
            }
        }

        if let Some(prompt) = decision {
            let status = if outcome.is_success() {
                TaskStatus::Blocked
            } else {
                TaskStatus::Failed
            };
            if let Some(result) = run.record.result_mut(&task.id) {
                result.status = status;
                result.error = Some(TaskExecutionError::DecisionRequired(prompt.description.clone()));
                result.files_modified = outcome.files_modified.clone();
                result.verification_passed = outcome.verification_passed;
                result.duration_ms = started.elapsed().as_millis() as u64;
            }
            self.journal_task(&run.scope, &task.id, status);
            tracing::warn!(plan = %run.scope, task = %task.id, "Architectural decision required; halting plan");
            run.record.error = Some(RecordError::new(ErrorCode::DecisionRequired, prompt.question.clone()));
            run.record.pending_decision = Some(prompt);
            run.record.finish(PlanStatus::Partial);
            return TaskFlow::Halt;
        }

        if !outcome.is_success() || outcome.verification_passed == Some(false) {
            let error = if outcome.verification_passed == Some(false) {
                TaskExecutionError::VerificationFailed
            } else {
                TaskExecutionError::Runner(
                    outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "task runner reported failure".to_string()),
                )
            };
            if let Some(result) = run.record.result_mut(&task.id) {
                result.files_modified = outcome.files_modified.clone();
                result.verification_passed = outcome.verification_passed;
            }
            self.fail_task(run, &task.id, error, started);
            return TaskFlow::Continue;
        }

        let files = if task.files.is_empty() {
            outcome.files_modified.clone()
        } else {
            task.files.clone()
        };

        let mut commit_hash = None;
        if self.settings.auto_commit {
            match self.commit_task(&run.scope, task, &files) {
                Ok(commit) => {
                    commit_hash = Some(commit.hash.clone());
                    run.record.commits.push(commit);
                }
                Err(error) => {
                    self.fail_task(run, &task.id, error, started);
                    return TaskFlow::Continue;
                }
            }
        }

        if let Some(result) = run.record.result_mut(&task.id) {
            result.status = TaskStatus::Completed;
            result.files_modified = if outcome.files_modified.is_empty() {
                files
            } else {
                outcome.files_modified
            };
            result.verification_passed = outcome.verification_passed;
            result.commit_hash = commit_hash;
            result.duration_ms = started.elapsed().as_millis() as u64;
        }
        self.journal_task(&run.scope, &task.id, TaskStatus::Completed);
        tracing::info!(
            plan = %run.scope,
            task = %task.id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task completed"
        );
        TaskFlow::Continue
    }

    fn commit_task(
        &self,
        scope: &str,
        task: &AutoTask,
        files: &[String],
    ) -> Result<Commit, TaskExecutionError> {
        self.git
            .stage(files)
            .map_err(|e| TaskExecutionError::Stage(format!("{:#}", e)))?;

        let commit_type = CommitType::infer(&task.name);
        let message = Commit::message_for(commit_type, scope, &task.name);
        let hash = self
            .git
            .commit(&message)
            .map_err(|e| TaskExecutionError::Commit(format!("{:#}", e)))?;

        let short = &hash[..hash.len().min(7)];
        tracing::info!(task = %task.id, commit = %short, "{}", message);
        Ok(Commit {
            task_id: task.id.clone(),
            commit_type,
            scope: scope.to_string(),
            message,
            hash,
        })
    }

    fn fail_task(
        &self,
        run: &mut RunState,
        task_id: &str,
        error: TaskExecutionError,
        started: Instant,
    ) {
        tracing::warn!(plan = %run.scope, task = %task_id, error = %error, "Task failed");
        if let Some(result) = run.record.result_mut(task_id) {
            result.status = TaskStatus::Failed;
            result.error = Some(error);
            result.duration_ms = started.elapsed().as_millis() as u64;
        }
        self.journal_task(&run.scope, task_id, TaskStatus::Failed);
    }

    /// Final status once every scheduled task has been visited.
    fn conclude(&self, run: &mut RunState) -> Result<(), EngineError> {
        let all_done = run
            .record
            .task_results
            .iter()
            .all(|r| matches!(r.status, TaskStatus::Completed | TaskStatus::Skipped));

        if !all_done {
            let any_completed = !run.assumed_completed.is_empty()
                || run.record.count_with_status(TaskStatus::Completed) > 0;
            let status = if any_completed {
                PlanStatus::Partial
            } else {
                PlanStatus::Failed
            };
            let failed = run.record.count_with_status(TaskStatus::Failed);
            let incomplete = run
                .record
                .task_results
                .iter()
                .filter(|r| !matches!(r.status, TaskStatus::Completed | TaskStatus::Skipped))
                .count();
            run.record.error = Some(RecordError::new(
                ErrorCode::TaskExecution,
                format!("{} task(s) did not complete", incomplete),
            ));
            run.record.finish(status);
            tracing::warn!(plan = %run.scope, status = %status, failed, "Plan finished with incomplete tasks");
            return Ok(());
        }

        let earlier = if run.resumed {
            self.recover_commits(run)
        } else {
            Vec::new()
        };
        let completed_at = Utc::now();
        let summary = PlanSummary::from_record(&run.plan, &run.record, earlier, completed_at);

        match self.journal.write_summary(&run.plan_path, &summary) {
            Ok(path) => {
                run.record.summary_path = Some(path);
                run.record.error = None;
                run.record.finish(PlanStatus::Completed);
                tracing::info!(
                    plan = %run.scope,
                    commits = run.record.commits.len(),
                    duration_ms = run.record.duration_ms(),
                    "Plan completed"
                );
                Ok(())
            }
            Err(source) => {
                run.record.error = Some(RecordError::new(
                    ErrorCode::SummaryWrite,
                    format!("{:#}", source),
                ));
                run.record.finish(PlanStatus::Failed);
                Err(EngineError::SummaryWrite {
                    plan_id: run.scope.clone(),
                    source,
                })
            }
        }
    }

    /// Commits made for this plan by earlier invocations, oldest first.
    fn recover_commits(&self, run: &RunState) -> Vec<Commit> {
        let found = match self.git.find_commits(&run.scope) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(plan = %run.scope, error = %e, "Could not read earlier commits");
                return Vec::new();
            }
        };

        found
            .into_iter()
            .filter_map(|info| {
                let (commit_type, scope, name) = Commit::parse_message(&info.message)?;
                if scope != run.scope {
                    return None;
                }
                let task_id = run
                    .plan
                    .tasks
                    .iter()
                    .find(|t| !t.is_checkpoint() && t.name() == name)
                    .map(|t| t.id().to_string())
                    .unwrap_or_default();
                Some(Commit {
                    task_id,
                    commit_type,
                    scope,
                    message: Commit::message_for(commit_type, &run.scope, &name),
                    hash: info.hash,
                })
            })
            .collect()
    }

    fn journal_task(&self, scope: &str, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.journal.record_task(scope, task_id, status) {
            tracing::warn!(plan = %scope, task = %task_id, error = %e, "Failed to record task history");
        }
    }

    /// Keep the run for later calls. A cancel that raced the end of the run wins
    /// unless the plan completed.
    fn store(&self, mut run: RunState) -> ExecutionRecord {
        if run.cancelled()
            && run.record.status != PlanStatus::Completed
            && run.record.status != PlanStatus::Cancelled
        {
            run.record.finish(PlanStatus::Cancelled);
        }
        let record = run.record.clone();
        self.runs().insert(run.scope.clone(), run);
        record
    }
}

/// Dry run: parse and schedule a plan without touching the runner, git or the journal.
///
/// A malformed plan is reported inside a failed record rather than as an error,
/// so linting always gets a structured answer once the file is readable.
pub fn validate_plan(
    plan_path: &Path,
    options: &ExecuteOptions,
) -> Result<ExecutionRecord, EngineError> {
    let text = read_plan(plan_path)?;
    let hash = plan_hash(&text);

    let plan = match parse_plan(&text) {
        Ok(plan) => plan,
        Err(source) => {
            let mut record =
                ExecutionRecord::new(&plan_scope(None, plan_path), plan_path.to_path_buf(), hash);
            record.dry_run = true;
            record.session_id = options.session_id.clone();
            record.error = Some(RecordError::new(ErrorCode::MalformedPlan, source.to_string()));
            record.finish(PlanStatus::Failed);
            return Ok(record);
        }
    };

    let loaded = LoadedPlan {
        path: plan_path.to_path_buf(),
        scope: plan_scope(Some(&plan), plan_path),
        hash,
        plan,
    };
    let strategy = options
        .strategy
        .unwrap_or_else(|| Strategy::detect(&loaded.plan.tasks));
    let schedule = schedule(&loaded.plan.tasks);

    let mut record = new_record(&loaded, strategy, &schedule, options.session_id.clone());
    record.task_results = loaded.plan.tasks.iter().map(TaskResult::pending).collect();
    record.dry_run = true;
    record.finished_at = Some(Utc::now());

    tracing::info!(
        plan = %loaded.scope,
        tasks = record.task_count,
        strategy = %strategy,
        "Dry run: plan is valid"
    );
    Ok(record)
}

fn new_record(
    loaded: &LoadedPlan,
    strategy: Strategy,
    schedule: &TaskSchedule,
    session_id: Option<String>,
) -> ExecutionRecord {
    let mut record = ExecutionRecord::new(&loaded.scope, loaded.path.clone(), loaded.hash.clone());
    record.strategy = strategy;
    record.task_count = loaded.plan.tasks.len();
    record.warnings = schedule.warnings.clone();
    record.session_id = session_id;
    record
}

/// Fresh identity for a retry or decision re-run; commits and results carry over.
fn restart_record(record: &mut ExecutionRecord) {
    record.run_id = Uuid::new_v4();
    record.started_at = Utc::now();
    record.finished_at = None;
    record.success = false;
    record.error = None;
    record.checkpoint = None;
    record.summary_path = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deviation::Deviation;
    use crate::orchestrator::runner::TaskOutcome;
    use crate::tracker::CommitInfo;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    const PLAN: &str = r#"---
phase: 01-foundation
plan: 01
type: execute
---
<objective>Set up the project</objective>
<tasks>
  <task type="auto" id="task-1">
    <name>Create user model</name>
    <files>src/user.rs</files>
    <action>Add the model</action>
    <verify>cargo test</verify>
    <done>Model exists</done>
  </task>
  <task type="auto" id="task-2">
    <name>Add login tests</name>
    <files>tests/login.rs</files>
    <action>Write tests</action>
    <verify>cargo test</verify>
    <done>Tests pass</done>
  </task>
</tasks>
"#;

    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<HashMap<String, VecDeque<TaskOutcome>>>,
        calls: Mutex<Vec<TaskContext>>,
    }

    impl Scripted {
        fn script(self, task: &str, outcome: TaskOutcome) -> Self {
            self.outcomes
                .lock()
                .unwrap()
                .entry(task.to_string())
                .or_default()
                .push_back(outcome);
            self
        }
    }

    #[async_trait]
    impl TaskRunner for Scripted {
        async fn run(&self, task: &AutoTask, ctx: &TaskContext) -> Result<TaskOutcome> {
            self.calls.lock().unwrap().push(ctx.clone());
            let next = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(&task.id)
                .and_then(VecDeque::pop_front);
            Ok(next.unwrap_or_else(TaskOutcome::success))
        }
    }

    #[derive(Default)]
    struct Commits(Mutex<Vec<String>>);

    impl GitOps for Commits {
        fn stage(&self, _files: &[String]) -> Result<()> {
            Ok(())
        }
        fn commit(&self, message: &str) -> Result<String> {
            let mut commits = self.0.lock().unwrap();
            commits.push(message.to_string());
            Ok(format!("{:040}", commits.len()))
        }
        fn head_sha(&self) -> Option<String> {
            None
        }
        fn current_branch(&self) -> Option<String> {
            None
        }
        fn find_commits(&self, _scope: &str) -> Result<Vec<CommitInfo>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Journal {
        history: Mutex<Vec<(String, TaskStatus)>>,
        issues: Mutex<Vec<IssueEntry>>,
    }

    impl ExecutionJournal for Journal {
        fn record_task(&self, _plan: &str, task_id: &str, status: TaskStatus) -> Result<()> {
            self.history.lock().unwrap().push((task_id.to_string(), status));
            Ok(())
        }
        fn log_issue(&self, issue: &IssueEntry) -> Result<()> {
            self.issues.lock().unwrap().push(issue.clone());
            Ok(())
        }
        fn write_summary(&self, plan_path: &Path, _summary: &PlanSummary) -> Result<PathBuf> {
            Ok(plan_path.with_file_name("01-01-SUMMARY.md"))
        }
    }

    fn executor(runner: Scripted) -> (PlanExecutor, Arc<Scripted>, Arc<Commits>, Arc<Journal>) {
        let runner = Arc::new(runner);
        let git = Arc::new(Commits::default());
        let journal = Arc::new(Journal::default());
        let settings = EngineSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                backoff_ms: 0,
            },
            ..EngineSettings::default()
        };
        let executor = PlanExecutor::new(runner.clone(), git.clone(), journal.clone())
            .with_settings(settings);
        (executor, runner, git, journal)
    }

    fn write_plan(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("01-01-PLAN.md");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_plan_hash_is_short_and_stable() {
        let hash = plan_hash("abc");
        assert_eq!(hash.len(), 12);
        assert_eq!(hash, plan_hash("abc"));
        assert_ne!(hash, plan_hash("abd"));
    }

    #[test]
    fn test_plan_scope_falls_back_to_file_name() {
        assert_eq!(plan_scope(None, Path::new("/x/02-03-PLAN.md")), "02-03");
        assert_eq!(plan_scope(None, Path::new("/x/draft.md")), "draft");
    }

    #[tokio::test]
    async fn test_autonomous_plan_commits_each_task() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, runner, git, journal) = executor(Scripted::default());

        let record = executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, PlanStatus::Completed);
        assert!(record.success);
        assert_eq!(record.strategy, Strategy::Autonomous);
        assert_eq!(record.plan_id, "01-01");
        assert_eq!(
            *git.0.lock().unwrap(),
            vec![
                "feat(01-01): Create user model".to_string(),
                "test(01-01): Add login tests".to_string()
            ]
        );
        assert_eq!(record.commits.len(), record.completed_auto_tasks());
        assert_eq!(runner.calls.lock().unwrap().len(), 2);
        assert!(record.summary_path.is_some());

        let history = journal.history.lock().unwrap();
        assert_eq!(history.first(), Some(&("task-1".to_string(), TaskStatus::Running)));
        assert_eq!(history.last(), Some(&("task-2".to_string(), TaskStatus::Completed)));
    }

    #[tokio::test]
    async fn test_failed_task_is_recorded_and_retried() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, runner, git, _) =
            executor(Scripted::default().script("task-1", TaskOutcome::failure("compile error")));

        let record = executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(record.status, PlanStatus::Partial);
        assert_eq!(record.status_of("task-1"), Some(TaskStatus::Failed));
        assert_eq!(record.status_of("task-2"), Some(TaskStatus::Completed));
        assert_eq!(git.0.lock().unwrap().len(), 1);

        let retried = executor.retry("01-01").await.unwrap();
        assert_eq!(retried.status, PlanStatus::Completed);
        assert_ne!(retried.run_id, record.run_id);
        assert_eq!(retried.result("task-1").unwrap().attempts, 2);
        assert_eq!(retried.commits.len(), 2);

        let calls = runner.calls.lock().unwrap();
        let last = calls.last().unwrap();
        assert_eq!(last.attempt, 2);
        assert_eq!(
            last.previous_error.as_deref(),
            Some("task runner failed: compile error")
        );
    }

    #[tokio::test]
    async fn test_retry_without_failures_is_rejected() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, _, _, _) = executor(Scripted::default());

        assert!(matches!(
            executor.retry("01-01").await,
            Err(EngineError::RunNotFound { .. })
        ));
        executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();
        let err = executor.retry("01-01").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoRetryableTasks);
    }

    #[tokio::test]
    async fn test_enhancement_is_deferred_without_stopping() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, _, _, journal) = executor(Scripted::default().script(
            "task-1",
            TaskOutcome::success().with_deviation(Deviation::new("Could cache lookups", "enhancement")),
        ));

        let record = executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(record.status, PlanStatus::Completed);
        assert_eq!(record.deferred_issues.len(), 1);
        assert_eq!(journal.issues.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_decision_proceed_reruns_task_with_answer() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, runner, _, _) = executor(Scripted::default().script(
            "task-1",
            TaskOutcome::success()
                .with_deviation(Deviation::new("Need a new table", "architectural")),
        ));

        let record = executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(record.status, PlanStatus::Partial);
        assert!(record.pending_decision.is_some());
        assert!(!record.deviations[0].handled);

        let resolved = executor
            .resolve_decision("01-01", DecisionOption::Proceed, Some("Use sqlite".into()))
            .await
            .unwrap();
        assert_eq!(resolved.status, PlanStatus::Completed);
        assert!(resolved.deviations[0].handled);

        let calls = runner.calls.lock().unwrap();
        let input = calls[1].human_input.as_deref().unwrap();
        assert!(input.contains("Need a new table"));
        assert!(input.contains("Use sqlite"));
    }

    #[tokio::test]
    async fn test_decision_abort_fails_plan() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, _, _, _) = executor(Scripted::default().script(
            "task-1",
            TaskOutcome::success().with_deviation(Deviation::new("Rewrite storage", "architectural")),
        ));
        executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();

        let record = executor
            .resolve_decision("01-01", DecisionOption::Abort, None)
            .await
            .unwrap();
        assert_eq!(record.status, PlanStatus::Failed);
        assert_eq!(record.error.unwrap().code, ErrorCode::Aborted);

        let err = executor
            .resolve_decision("01-01", DecisionOption::Proceed, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoPendingDecision);
    }

    #[tokio::test]
    async fn test_cancel_requires_cancellable_state() {
        let dir = tempdir().unwrap();
        let path = write_plan(dir.path(), PLAN);
        let (executor, _, _, _) = executor(Scripted::default());

        assert!(matches!(
            executor.cancel("01-01"),
            Err(EngineError::RunNotFound { .. })
        ));
        executor
            .execute_plan(&path, ExecuteOptions::default())
            .await
            .unwrap();
        let err = executor.cancel("01-01").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotCancellable);
        assert!(err.to_string().contains("completed"));
    }
}
