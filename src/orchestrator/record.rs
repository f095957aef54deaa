//! Per-run execution record returned by every engine call.

use crate::deviation::{DecisionPrompt, DeviationRecord, IssueEntry};
use crate::errors::{ErrorCode, TaskExecutionError};
use crate::plan::{CheckpointGate, CheckpointKind, CheckpointTask, Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Plan-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Running,
    #[serde(alias = "success")]
    Completed,
    Partial,
    Failed,
    Cancelled,
    /// Halted at a checkpoint; a resume moves it back to running
    AwaitingCheckpoint,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingCheckpoint)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Partial => "partial",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
            PlanStatus::AwaitingCheckpoint => "awaiting_checkpoint",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How checkpoints interact with the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Run to completion without returning control
    #[default]
    Autonomous,
    /// Stop at each checkpoint and return control
    Segmented,
}

impl Strategy {
    /// Segmented when the plan has any checkpoint task, autonomous otherwise.
    pub fn detect(tasks: &[Task]) -> Self {
        if tasks.iter().any(Task::is_checkpoint) {
            Strategy::Segmented
        } else {
            Strategy::Autonomous
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Autonomous => "autonomous",
            Strategy::Segmented => "segmented",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "autonomous" => Ok(Strategy::Autonomous),
            "segmented" => Ok(Strategy::Segmented),
            other => anyhow::bail!("Unknown strategy '{}': expected autonomous or segmented", other),
        }
    }
}

/// Conventional-commit type inferred from a task name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Feat,
    Fix,
    Test,
    Refactor,
    Perf,
    Chore,
    Docs,
}

impl CommitType {
    /// `test`, then `fix`, then `refactor` by substring; `feat` otherwise.
    pub fn infer(task_name: &str) -> Self {
        let name = task_name.to_lowercase();
        if name.contains("test") {
            CommitType::Test
        } else if name.contains("fix") {
            CommitType::Fix
        } else if name.contains("refactor") {
            CommitType::Refactor
        } else {
            CommitType::Feat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Test => "test",
            CommitType::Refactor => "refactor",
            CommitType::Perf => "perf",
            CommitType::Chore => "chore",
            CommitType::Docs => "docs",
        }
    }
}

impl FromStr for CommitType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "feat" => Ok(CommitType::Feat),
            "fix" => Ok(CommitType::Fix),
            "test" => Ok(CommitType::Test),
            "refactor" => Ok(CommitType::Refactor),
            "perf" => Ok(CommitType::Perf),
            "chore" => Ok(CommitType::Chore),
            "docs" => Ok(CommitType::Docs),
            other => anyhow::bail!("Unknown commit type '{}'", other),
        }
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One commit created for one completed auto task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub task_id: String,
    #[serde(rename = "type")]
    pub commit_type: CommitType,
    pub scope: String,
    pub message: String,
    pub hash: String,
}

impl Commit {
    /// `{type}({scope}): {task name}`
    pub fn message_for(commit_type: CommitType, scope: &str, task_name: &str) -> String {
        format!("{}({}): {}", commit_type, scope, task_name)
    }

    /// Split a `{type}({scope}): {name}` subject into its parts.
    pub fn parse_message(message: &str) -> Option<(CommitType, String, String)> {
        let (head, name) = message.split_once("): ")?;
        let (commit_type, scope) = head.split_once('(')?;
        Some((
            commit_type.parse().ok()?,
            scope.to_string(),
            name.trim().to_string(),
        ))
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(7)]
    }
}

/// Outcome of one task within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub name: String,
    /// `auto` or `checkpoint:<kind>`
    #[serde(rename = "type")]
    pub kind: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskExecutionError>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TaskResult {
    pub fn pending(task: &Task) -> Self {
        Self {
            task_id: task.id().to_string(),
            name: task.name(),
            kind: task.type_attr(),
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            files_modified: Vec::new(),
            verification_passed: None,
            commit_hash: None,
            duration_ms: 0,
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        self.kind.starts_with("checkpoint")
    }
}

/// Details handed back when a run halts at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHalt {
    pub id: String,
    pub kind: CheckpointKind,
    pub gate: CheckpointGate,
    pub what_built: String,
    pub how_to_verify: String,
    pub resume_signal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

impl From<&CheckpointTask> for CheckpointHalt {
    fn from(task: &CheckpointTask) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind,
            gate: task.gate,
            what_built: task.what_built.clone(),
            how_to_verify: task.how_to_verify.clone(),
            resume_signal: task.resume_signal.clone(),
            decision: task.decision.clone(),
            options: task.options.clone(),
        }
    }
}

/// Record-level error carried in a structured result instead of being returned as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub code: ErrorCode,
    pub message: String,
}

impl RecordError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result of one `execute`, `resume` or `retry` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: Uuid,
    pub plan_id: String,
    pub plan_path: PathBuf,
    pub status: PlanStatus,
    /// True only for a completed plan
    pub success: bool,
    pub strategy: Strategy,
    #[serde(default)]
    pub dry_run: bool,
    pub task_count: usize,
    pub task_results: Vec<TaskResult>,
    pub commits: Vec<Commit>,
    pub deviations: Vec<DeviationRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<CheckpointHalt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<DecisionPrompt>,
    #[serde(default)]
    pub deferred_issues: Vec<IssueEntry>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub plan_hash: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(plan_id: &str, plan_path: PathBuf, plan_hash: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_id: plan_id.to_string(),
            plan_path,
            status: PlanStatus::Pending,
            success: false,
            strategy: Strategy::default(),
            dry_run: false,
            task_count: 0,
            task_results: Vec::new(),
            commits: Vec::new(),
            deviations: Vec::new(),
            checkpoint: None,
            pending_decision: None,
            deferred_issues: Vec::new(),
            warnings: Vec::new(),
            error: None,
            summary_path: None,
            session_id: None,
            plan_hash,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.task_results.iter().find(|r| r.task_id == task_id)
    }

    pub fn result_mut(&mut self, task_id: &str) -> Option<&mut TaskResult> {
        self.task_results.iter_mut().find(|r| r.task_id == task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.result(task_id).map(|r| r.status)
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.task_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    /// Completed auto tasks; always equal to the number of commits in a
    /// single run when auto-commit is on.
    pub fn completed_auto_tasks(&self) -> usize {
        self.task_results
            .iter()
            .filter(|r| !r.is_checkpoint() && r.status == TaskStatus::Completed)
            .count()
    }

    /// Seal the record with a terminal or halting status.
    pub fn finish(&mut self, status: PlanStatus) {
        self.status = status;
        self.success = status == PlanStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::AutoTask;

    #[test]
    fn test_commit_type_inference() {
        assert_eq!(CommitType::infer("Add login tests"), CommitType::Test);
        assert_eq!(CommitType::infer("Fix session expiry"), CommitType::Fix);
        assert_eq!(CommitType::infer("Refactor auth module"), CommitType::Refactor);
        assert_eq!(CommitType::infer("Build login form"), CommitType::Feat);
        // test outranks fix
        assert_eq!(CommitType::infer("Fix flaky test"), CommitType::Test);
    }

    #[test]
    fn test_commit_message_format() {
        let msg = Commit::message_for(CommitType::Feat, "01-02", "Create user model");
        assert_eq!(msg, "feat(01-02): Create user model");
    }

    #[test]
    fn test_parse_commit_message() {
        let (commit_type, scope, name) =
            Commit::parse_message("refactor(02-01): Split auth module").unwrap();
        assert_eq!(commit_type, CommitType::Refactor);
        assert_eq!(scope, "02-01");
        assert_eq!(name, "Split auth module");

        assert!(Commit::parse_message("Merge branch 'main'").is_none());
        assert!(Commit::parse_message("wip(01-01): thing").is_none());
    }

    #[test]
    fn test_strategy_detection() {
        let auto_only = vec![Task::Auto(AutoTask::new("task-1", "a"))];
        assert_eq!(Strategy::detect(&auto_only), Strategy::Autonomous);

        let mut with_checkpoint = auto_only.clone();
        with_checkpoint.push(Task::Checkpoint(CheckpointTask::new(
            "task-2",
            CheckpointKind::HumanVerify,
        )));
        assert_eq!(Strategy::detect(&with_checkpoint), Strategy::Segmented);
        assert_eq!(Strategy::detect(&[]), Strategy::Autonomous);
    }

    #[test]
    fn test_plan_status_serde() {
        assert_eq!(
            serde_json::to_string(&PlanStatus::AwaitingCheckpoint).unwrap(),
            "\"awaiting_checkpoint\""
        );
        let status: PlanStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(status, PlanStatus::Completed);
    }

    #[test]
    fn test_cancellable_states() {
        assert!(PlanStatus::Running.is_cancellable());
        assert!(PlanStatus::AwaitingCheckpoint.is_cancellable());
        assert!(!PlanStatus::Completed.is_cancellable());
        assert!(!PlanStatus::Cancelled.is_cancellable());
        assert!(!PlanStatus::AwaitingCheckpoint.is_terminal());
    }

    #[test]
    fn test_finish_sets_success_only_on_completed() {
        let mut record = ExecutionRecord::new("01-01", PathBuf::from("p"), "abc".into());
        record.finish(PlanStatus::Partial);
        assert!(!record.success);
        record.finish(PlanStatus::Completed);
        assert!(record.success);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("Segmented".parse::<Strategy>().unwrap(), Strategy::Segmented);
        assert!("sideways".parse::<Strategy>().is_err());
    }
}
