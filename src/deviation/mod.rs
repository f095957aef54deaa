//! Deviation taxonomy: unplanned observations made while a task runs.
//!
//! Every deviation maps to exactly one of five numbered rules; only rule 4
//! (architectural) needs a human decision.

pub mod classifier;
pub mod handler;

pub use classifier::classify;
pub use handler::{
    DecisionOption, DecisionPrompt, DeviationContext, DeviationOutcome, DeviationRecord,
    HandledDeviation, IssueEntry, handle_deviation,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// An unplanned observation reported by the task runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    pub description: String,
    /// Free-form category such as `bug`, `security` or `architectural`
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub blocks_progress: bool,
}

impl Deviation {
    pub fn new(description: &str, kind: &str) -> Self {
        Self {
            description: description.to_string(),
            kind: kind.to_string(),
            blocks_progress: false,
        }
    }

    /// Mark the deviation as blocking progress.
    pub fn blocking(mut self) -> Self {
        self.blocks_progress = true;
        self
    }
}

/// The five fixed rules, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationRule {
    BugFound,
    CriticalMissing,
    Blocker,
    Architectural,
    Enhancement,
}

impl DeviationRule {
    pub fn number(&self) -> u8 {
        match self {
            DeviationRule::BugFound => 1,
            DeviationRule::CriticalMissing => 2,
            DeviationRule::Blocker => 3,
            DeviationRule::Architectural => 4,
            DeviationRule::Enhancement => 5,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DeviationRule::BugFound => "Bug Found",
            DeviationRule::CriticalMissing => "Critical Missing",
            DeviationRule::Blocker => "Blocker",
            DeviationRule::Architectural => "Architectural",
            DeviationRule::Enhancement => "Enhancement",
        }
    }
}

impl fmt::Display for DeviationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule {} ({})", self.number(), self.title())
    }
}

/// What the engine does about a deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationAction {
    AutoFix,
    AutoAdd,
    StopAskUser,
    Defer,
}

impl DeviationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationAction::AutoFix => "auto_fix",
            DeviationAction::AutoAdd => "auto_add",
            DeviationAction::StopAskUser => "stop_ask_user",
            DeviationAction::Defer => "defer",
        }
    }
}

impl fmt::Display for DeviationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub rule: DeviationRule,
    pub action: DeviationAction,
    pub requires_user_input: bool,
    /// What triggered the match, for logs and summaries
    pub trigger: String,
}

impl Classification {
    pub fn new(rule: DeviationRule, action: DeviationAction, trigger: String) -> Self {
        Self {
            rule,
            action,
            requires_user_input: action == DeviationAction::StopAskUser,
            trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_numbers_are_ordered() {
        let rules = [
            DeviationRule::BugFound,
            DeviationRule::CriticalMissing,
            DeviationRule::Blocker,
            DeviationRule::Architectural,
            DeviationRule::Enhancement,
        ];
        let numbers: Vec<u8> = rules.iter().map(DeviationRule::number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_deviation_deserializes_type_field() {
        let json = r#"{"description":"SQL injection found","type":"security"}"#;
        let d: Deviation = serde_json::from_str(json).unwrap();
        assert_eq!(d.kind, "security");
        assert!(!d.blocks_progress);
    }

    #[test]
    fn test_rule_display() {
        assert_eq!(DeviationRule::Architectural.to_string(), "Rule 4 (Architectural)");
        assert_eq!(DeviationAction::StopAskUser.to_string(), "stop_ask_user");
    }
}
