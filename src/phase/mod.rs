//! Phases and plans as laid out on disk.
//!
//! ```text
//! .planning/
//! └── phases/
//!     ├── 01-foundation/
//!     │   ├── 01-CONTEXT.md
//!     │   ├── 01-01-PLAN.md
//!     │   └── 01-01-SUMMARY.md     # presence == plan complete
//!     └── 02-auth-flow/
//!         └── 02-01-PLAN.md
//! ```
//!
//! Status is always derived from the directory contents at query time.

pub mod manager;
pub mod summary;

pub use manager::{PhaseProgress, PlanningDir};
pub use summary::PlanSummary;

use crate::plan::PlanId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

static PHASE_DIR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2,})-([A-Za-z0-9][A-Za-z0-9._-]*)$").expect("valid phase dir regex")
});

static PLAN_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2,})-(\d{2,})-PLAN\.[A-Za-z0-9]+$").expect("valid plan file regex")
});

static SUMMARY_FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2,})-(\d{2,})-SUMMARY\.[A-Za-z0-9]+$").expect("valid summary file regex")
});

/// Derived status of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// No plans yet
    Pending,
    InProgress,
    /// Every plan has a summary
    Complete,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status of a single plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Pending,
    /// No summary yet, but execution history exists
    InProgress,
    /// A sibling summary exists
    Complete,
}

impl PlanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Pending => "pending",
            PlanState::InProgress => "in_progress",
            PlanState::Complete => "complete",
        }
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan file found while scanning a phase directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInfo {
    pub id: PlanId,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<PathBuf>,
    pub state: PlanState,
}

/// A phase directory and the plans it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInfo {
    pub number: u32,
    pub name: String,
    pub dir: PathBuf,
    pub plans: Vec<PlanInfo>,
    pub status: PhaseStatus,
}

impl PhaseInfo {
    pub fn dir_name(&self) -> String {
        phase_dir_name(self.number, &self.name)
    }

    pub fn completed_plans(&self) -> usize {
        self.plans
            .iter()
            .filter(|p| p.state == PlanState::Complete)
            .count()
    }

    /// First plan (by number) without a summary.
    pub fn next_incomplete_plan(&self) -> Option<&PlanInfo> {
        self.plans.iter().find(|p| p.state != PlanState::Complete)
    }
}

/// Derive a phase status from its plans.
pub fn derive_phase_status(plans: &[PlanInfo]) -> PhaseStatus {
    if plans.is_empty() {
        PhaseStatus::Pending
    } else if plans.iter().all(|p| p.state == PlanState::Complete) {
        PhaseStatus::Complete
    } else {
        PhaseStatus::InProgress
    }
}

/// Lowercase kebab-case: runs of non-alphanumerics collapse into one hyphen.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

pub fn phase_dir_name(number: u32, name: &str) -> String {
    format!("{:02}-{}", number, slugify(name))
}

pub fn plan_file_name(id: PlanId) -> String {
    format!("{}-PLAN.md", id.scope())
}

pub fn summary_file_name(id: PlanId) -> String {
    format!("{}-SUMMARY.md", id.scope())
}

pub fn context_file_name(phase: u32) -> String {
    format!("{:02}-CONTEXT.md", phase)
}

/// `01-foundation` -> `(1, "foundation")`.
pub fn parse_phase_dir_name(name: &str) -> Option<(u32, String)> {
    let caps = PHASE_DIR_REGEX.captures(name)?;
    let number = caps[1].parse().ok()?;
    Some((number, caps[2].to_string()))
}

/// `01-02-PLAN.md` -> `01-02`.
pub fn parse_plan_file_name(name: &str) -> Option<PlanId> {
    let caps = PLAN_FILE_REGEX.captures(name)?;
    Some(PlanId::new(caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// `01-02-SUMMARY.md` -> `01-02`.
pub fn parse_summary_file_name(name: &str) -> Option<PlanId> {
    let caps = SUMMARY_FILE_REGEX.captures(name)?;
    Some(PlanId::new(caps[1].parse().ok()?, caps[2].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(state: PlanState) -> PlanInfo {
        PlanInfo {
            id: PlanId::new(1, 1),
            path: PathBuf::from("01-01-PLAN.md"),
            summary_path: None,
            state,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Auth Flow"), "auth-flow");
        assert_eq!(slugify("  API & DB -- setup!  "), "api-db-setup");
        assert_eq!(slugify("already-kebab"), "already-kebab");
    }

    #[test]
    fn test_file_names_are_zero_padded() {
        let id = PlanId::new(3, 7);
        assert_eq!(phase_dir_name(3, "Polish UI"), "03-polish-ui");
        assert_eq!(plan_file_name(id), "03-07-PLAN.md");
        assert_eq!(summary_file_name(id), "03-07-SUMMARY.md");
        assert_eq!(context_file_name(3), "03-CONTEXT.md");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            parse_phase_dir_name("01-foundation"),
            Some((1, "foundation".to_string()))
        );
        assert_eq!(parse_phase_dir_name("notes"), None);
        assert_eq!(parse_phase_dir_name("1-short"), None);

        assert_eq!(parse_plan_file_name("01-02-PLAN.md"), Some(PlanId::new(1, 2)));
        assert_eq!(parse_plan_file_name("01-02-PLAN.txt"), Some(PlanId::new(1, 2)));
        assert_eq!(parse_plan_file_name("01-02-SUMMARY.md"), None);
        assert_eq!(parse_plan_file_name("01-CONTEXT.md"), None);

        assert_eq!(
            parse_summary_file_name("04-01-SUMMARY.md"),
            Some(PlanId::new(4, 1))
        );
    }

    #[test]
    fn test_derive_phase_status() {
        assert_eq!(derive_phase_status(&[]), PhaseStatus::Pending);
        assert_eq!(
            derive_phase_status(&[plan(PlanState::Complete), plan(PlanState::Complete)]),
            PhaseStatus::Complete
        );
        assert_eq!(
            derive_phase_status(&[plan(PlanState::Complete), plan(PlanState::Pending)]),
            PhaseStatus::InProgress
        );
        assert_eq!(
            derive_phase_status(&[plan(PlanState::Pending)]),
            PhaseStatus::InProgress
        );
    }
}
