//! Turning a classified deviation into what the engine does next.

use super::{Classification, Deviation, DeviationAction, DeviationRule, classify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a deviation was observed.
#[derive(Debug, Clone, Copy)]
pub struct DeviationContext<'a> {
    pub plan_id: &'a str,
    pub task_id: &'a str,
    pub task_name: &'a str,
}

/// Structured entry kept in the execution record and the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationRecord {
    pub task_id: String,
    pub rule: DeviationRule,
    pub action: DeviationAction,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// False only for rule 4 until the user decides.
    pub handled: bool,
    /// What the runner was told to do about it; absent while a decision is pending
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Choices offered when a deviation needs a human decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOption {
    Proceed,
    Modify,
    Abort,
}

impl DecisionOption {
    pub const ALL: [DecisionOption; 3] = [
        DecisionOption::Proceed,
        DecisionOption::Modify,
        DecisionOption::Abort,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DecisionOption::Proceed => "Proceed with the proposed change",
            DecisionOption::Modify => "Modify the approach",
            DecisionOption::Abort => "Abort the plan",
        }
    }
}

/// A pending decision surfaced to the caller. Never answered by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPrompt {
    pub plan_id: String,
    pub task_id: String,
    pub description: String,
    pub question: String,
    pub options: Vec<DecisionOption>,
}

/// An enhancement parked for later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueEntry {
    pub plan_id: String,
    pub task_id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub logged_at: DateTime<Utc>,
}

/// What to do about one deviation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviationOutcome {
    /// Rules 1-3: fix inline; the fix ships in the current task's commit.
    FoldIntoCommit { instructions: String },
    /// Rule 4: stop and ask.
    AskUser { prompt: DecisionPrompt },
    /// Rule 5: log an issue and carry on.
    Defer { issue: IssueEntry, instructions: String },
}

/// Result of [`handle_deviation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledDeviation {
    pub classification: Classification,
    pub record: DeviationRecord,
    pub outcome: DeviationOutcome,
}

/// Classify a deviation and build the matching outcome.
pub fn handle_deviation(deviation: &Deviation, ctx: DeviationContext<'_>) -> HandledDeviation {
    let classification = classify(deviation);

    let outcome = match classification.rule {
        DeviationRule::BugFound | DeviationRule::CriticalMissing | DeviationRule::Blocker => {
            let verb = match classification.action {
                DeviationAction::AutoAdd => "Add",
                _ => "Fix",
            };
            DeviationOutcome::FoldIntoCommit {
                instructions: format!(
                    "{} inline as part of task {} ({}): {}. Include the change in this task's commit \
                     and note it under Deviations in the summary.",
                    verb, ctx.task_id, ctx.task_name, deviation.description
                ),
            }
        }
        DeviationRule::Architectural => DeviationOutcome::AskUser {
            prompt: DecisionPrompt {
                plan_id: ctx.plan_id.to_string(),
                task_id: ctx.task_id.to_string(),
                description: deviation.description.clone(),
                question: format!(
                    "Task {} hit an architectural change: {}. How should execution continue?",
                    ctx.task_id, deviation.description
                ),
                options: DecisionOption::ALL.to_vec(),
            },
        },
        DeviationRule::Enhancement => DeviationOutcome::Defer {
            issue: IssueEntry {
                plan_id: ctx.plan_id.to_string(),
                task_id: ctx.task_id.to_string(),
                description: deviation.description.clone(),
                kind: deviation.kind.clone(),
                logged_at: Utc::now(),
            },
            instructions: format!(
                "Logged for later; continue task {} as planned.",
                ctx.task_id
            ),
        },
    };

    let instructions = match &outcome {
        DeviationOutcome::FoldIntoCommit { instructions }
        | DeviationOutcome::Defer { instructions, .. } => Some(instructions.clone()),
        DeviationOutcome::AskUser { .. } => None,
    };

    let record = DeviationRecord {
        task_id: ctx.task_id.to_string(),
        rule: classification.rule,
        action: classification.action,
        description: deviation.description.clone(),
        kind: deviation.kind.clone(),
        handled: !matches!(outcome, DeviationOutcome::AskUser { .. }),
        instructions,
    };

    HandledDeviation {
        classification,
        record,
        outcome,
    }
}
