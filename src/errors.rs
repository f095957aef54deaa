//! Typed error hierarchy for the plan execution engine.
//!
//! Three families cover the three failure surfaces:
//! - `PlanParseError`: the plan document is unusable
//! - `EngineError`: a whole engine call failed
//! - `TaskExecutionError`: one task failed; recorded in its result, never returned

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Reasons a plan document cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanParseError {
    #[error("plan has no <tasks> section")]
    MissingTaskSection,

    #[error("duplicate task id '{id}'")]
    DuplicateTaskId { id: String },

    #[error("frontmatter block opened with '---' is never closed")]
    UnterminatedFrontmatter,
}

/// Errors that abort a whole engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("plan file not found: {}", path.display())]
    PlanFileNotFound { path: PathBuf },

    #[error("failed to read plan file {}: {source}", path.display())]
    PlanRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed plan {}: {source}", path.display())]
    MalformedPlan {
        path: PathBuf,
        #[source]
        source: PlanParseError,
    },

    #[error("checkpoint '{checkpoint_id}' not found in plan {plan_id}")]
    CheckpointNotFound {
        plan_id: String,
        checkpoint_id: String,
    },

    #[error("no execution run recorded for plan {plan_id}")]
    RunNotFound { plan_id: String },

    #[error("No retryable subtasks for plan {plan_id}")]
    NoRetryableTasks { plan_id: String },

    #[error("plan {plan_id} cannot be cancelled while {status}")]
    NotCancellable { plan_id: String, status: String },

    #[error("plan {plan_id} has no pending decision")]
    NoPendingDecision { plan_id: String },

    #[error("plan {plan_id} was cancelled")]
    PlanCancelled { plan_id: String },

    #[error("failed to write summary for plan {plan_id}: {source}")]
    SummaryWrite {
        plan_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    /// Stable machine-readable code for callers that branch on the failure kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::PlanFileNotFound { .. } => ErrorCode::PlanFileNotFound,
            EngineError::PlanRead { .. } => ErrorCode::PlanRead,
            EngineError::MalformedPlan { .. } => ErrorCode::MalformedPlan,
            EngineError::CheckpointNotFound { .. } => ErrorCode::CheckpointNotFound,
            EngineError::RunNotFound { .. } => ErrorCode::RunNotFound,
            EngineError::NoRetryableTasks { .. } => ErrorCode::NoRetryableTasks,
            EngineError::NotCancellable { .. } => ErrorCode::NotCancellable,
            EngineError::NoPendingDecision { .. } => ErrorCode::NoPendingDecision,
            EngineError::PlanCancelled { .. } => ErrorCode::PlanCancelled,
            EngineError::SummaryWrite { .. } => ErrorCode::SummaryWrite,
        }
    }
}

/// Machine-readable error codes, shared by thrown errors and record-level errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PlanFileNotFound,
    PlanRead,
    MalformedPlan,
    CheckpointNotFound,
    CheckpointNotApproved,
    RunNotFound,
    NoRetryableTasks,
    NotCancellable,
    NoPendingDecision,
    PlanCancelled,
    SummaryWrite,
    TaskExecution,
    DecisionRequired,
    Aborted,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::PlanFileNotFound => "PLAN_FILE_NOT_FOUND",
            ErrorCode::PlanRead => "PLAN_READ",
            ErrorCode::MalformedPlan => "MALFORMED_PLAN",
            ErrorCode::CheckpointNotFound => "CHECKPOINT_NOT_FOUND",
            ErrorCode::CheckpointNotApproved => "CHECKPOINT_NOT_APPROVED",
            ErrorCode::RunNotFound => "RUN_NOT_FOUND",
            ErrorCode::NoRetryableTasks => "NO_RETRYABLE_TASKS",
            ErrorCode::NotCancellable => "NOT_CANCELLABLE",
            ErrorCode::NoPendingDecision => "NO_PENDING_DECISION",
            ErrorCode::PlanCancelled => "PLAN_CANCELLED",
            ErrorCode::SummaryWrite => "SUMMARY_WRITE",
            ErrorCode::TaskExecution => "TASK_EXECUTION",
            ErrorCode::DecisionRequired => "DECISION_REQUIRED",
            ErrorCode::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Why a single task did not complete. Stored in the task's result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskExecutionError {
    #[error("task runner failed: {0}")]
    Runner(String),

    #[error("verification did not pass")]
    VerificationFailed,

    #[error("staging files failed: {0}")]
    Stage(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("dependencies not met: {}", .0.join(", "))]
    DependenciesUnmet(Vec<String>),

    #[error("architectural decision required: {0}")]
    DecisionRequired(String),
}
