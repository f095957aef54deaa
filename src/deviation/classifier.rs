//! Ordered, first-match-wins deviation classification.
//!
//! | Rule | Trigger | Action |
//! |------|---------|--------|
//! | 1 Bug found | type `bug`, or "bug"/"broken" in text | `auto_fix` |
//! | 2 Critical missing | type `security`/`critical`, or security wording | `auto_add` |
//! | 3 Blocker | `blocks_progress`, or "blocker"/"cannot proceed" | `auto_fix` |
//! | 4 Architectural | type `architectural`/`design`, or redesign wording | `stop_ask_user` |
//! | 5 Enhancement | anything else | `defer` |

use super::{Classification, Deviation, DeviationAction, DeviationRule};

struct RuleMatcher {
    rule: DeviationRule,
    action: DeviationAction,
    types: &'static [&'static str],
    keywords: &'static [&'static str],
    on_blocking: bool,
}

/// Evaluated top to bottom; rule 5 is the fallback and has no matcher.
const RULES: &[RuleMatcher] = &[
    RuleMatcher {
        rule: DeviationRule::BugFound,
        action: DeviationAction::AutoFix,
        types: &["bug"],
        keywords: &["bug", "broken"],
        on_blocking: false,
    },
    RuleMatcher {
        rule: DeviationRule::CriticalMissing,
        action: DeviationAction::AutoAdd,
        types: &["security", "critical"],
        keywords: &[
            "security",
            "vulnerability",
            "injection",
            "sanitization",
            "validation",
            "missing critical",
        ],
        on_blocking: false,
    },
    RuleMatcher {
        rule: DeviationRule::Blocker,
        action: DeviationAction::AutoFix,
        types: &[],
        keywords: &["blocker", "cannot proceed"],
        on_blocking: true,
    },
    RuleMatcher {
        rule: DeviationRule::Architectural,
        action: DeviationAction::StopAskUser,
        types: &["architectural", "design"],
        keywords: &["architecture", "redesign", "restructure", "major change"],
        on_blocking: false,
    },
];

impl RuleMatcher {
    fn matches(&self, kind: &str, description: &str, blocks_progress: bool) -> Option<String> {
        if let Some(t) = self.types.iter().find(|t| **t == kind) {
            return Some(format!("type '{}'", t));
        }
        if self.on_blocking && blocks_progress {
            return Some("blocks progress".to_string());
        }
        self.keywords
            .iter()
            .find(|k| description.contains(*k))
            .map(|k| format!("keyword '{}'", k))
    }
}

/// Classify a deviation. Total and deterministic: every input maps to exactly one rule.
pub fn classify(deviation: &Deviation) -> Classification {
    let kind = deviation.kind.trim().to_lowercase();
    let description = deviation.description.to_lowercase();

    for matcher in RULES {
        if let Some(trigger) = matcher.matches(&kind, &description, deviation.blocks_progress) {
            return Classification::new(matcher.rule, matcher.action, trigger);
        }
    }

    Classification::new(
        DeviationRule::Enhancement,
        DeviationAction::Defer,
        "no other rule matched".to_string(),
    )
}
