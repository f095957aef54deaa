//! Summary document written when a plan completes.
//!
//! Its existence beside the plan is what marks the plan complete.

use crate::deviation::{DeviationRecord, IssueEntry};
use crate::orchestrator::record::{Commit, ExecutionRecord};
use crate::plan::{ParsedPlan, TaskStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Frontmatter block of a summary document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryFrontmatter {
    pub phase: String,
    pub plan: String,
    pub duration: String,
    /// `YYYY-MM-DD`
    pub completed: String,
    pub plan_hash: String,
    pub tasks_completed: usize,
    pub commits: usize,
    pub deviations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub frontmatter: SummaryFrontmatter,
    pub objective: String,
    /// Names of completed tasks, in plan order
    pub accomplishments: Vec<String>,
    pub commits: Vec<Commit>,
    pub deviations: Vec<DeviationRecord>,
    pub deferred_issues: Vec<IssueEntry>,
}

impl PlanSummary {
    /// Build a summary from the run that completed the plan.
    ///
    /// `earlier_commits` are commits made for this plan by previous invocations
    /// (before a resume); they are listed ahead of this run's commits.
    pub fn from_record(
        plan: &ParsedPlan,
        record: &ExecutionRecord,
        earlier_commits: Vec<Commit>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let phase = plan
            .phase_label()
            .map(str::to_string)
            .unwrap_or_else(|| record.plan_id.split('-').next().unwrap_or("").to_string());
        let plan_number = plan
            .metadata
            .get("plan")
            .cloned()
            .unwrap_or_else(|| record.plan_id.rsplit('-').next().unwrap_or("").to_string());

        let mut commits: Vec<Commit> = earlier_commits
            .into_iter()
            .filter(|c| !record.commits.iter().any(|r| r.hash == c.hash))
            .collect();
        commits.extend(record.commits.iter().cloned());

        let accomplishments: Vec<String> = plan
            .tasks
            .iter()
            .filter(|t| !t.is_checkpoint())
            .filter(|t| {
                // Tasks before a resume point are not in this run's results
                record
                    .status_of(t.id())
                    .is_none_or(|s| s == TaskStatus::Completed)
            })
            .map(|t| t.name())
            .collect();

        let elapsed = completed_at
            .signed_duration_since(record.started_at)
            .num_milliseconds()
            .max(0) as u64;

        Self {
            frontmatter: SummaryFrontmatter {
                phase,
                plan: plan_number,
                duration: format_duration(elapsed),
                completed: completed_at.format("%Y-%m-%d").to_string(),
                plan_hash: record.plan_hash.clone(),
                tasks_completed: accomplishments.len(),
                commits: commits.len(),
                deviations: record.deviations.len(),
            },
            objective: plan.objective.clone(),
            accomplishments,
            commits,
            deviations: record.deviations.clone(),
            deferred_issues: record.deferred_issues.clone(),
        }
    }

    pub fn render(&self) -> Result<String> {
        let yaml =
            serde_yaml::to_string(&self.frontmatter).context("Failed to serialize summary frontmatter")?;

        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&yaml);
        if !yaml.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("---\n\n");

        let _ = writeln!(
            out,
            "# Phase {} Plan {} Summary\n",
            self.frontmatter.phase, self.frontmatter.plan
        );
        if !self.objective.is_empty() {
            let _ = writeln!(out, "**Objective:** {}\n", self.objective);
        }

        out.push_str("## Accomplishments\n\n");
        push_list(&mut out, self.accomplishments.iter().cloned());

        out.push_str("## Task Commits\n\n");
        push_list(
            &mut out,
            self.commits
                .iter()
                .map(|c| format!("`{}` {} ({})", c.short_hash(), c.message, c.task_id)),
        );

        out.push_str("## Deviations\n\n");
        push_list(
            &mut out,
            self.deviations.iter().map(|d| {
                format!(
                    "{}: {} [{}, task {}]",
                    d.rule,
                    d.description,
                    d.action,
                    d.task_id
                )
            }),
        );

        out.push_str("## Deferred Issues\n\n");
        push_list(
            &mut out,
            self.deferred_issues
                .iter()
                .map(|i| format!("{} (task {})", i.description, i.task_id)),
        );

        Ok(out)
    }
}

fn push_list(out: &mut String, items: impl Iterator<Item = String>) {
    let mut any = false;
    for item in items {
        let _ = writeln!(out, "- {}", item);
        any = true;
    }
    if !any {
        out.push_str("None.\n");
    }
    out.push('\n');
}

/// `950` -> `950ms`, `75_000` -> `1m 15s`, `3_723_000` -> `1h 2m`.
pub fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    if secs == 0 {
        format!("{}ms", ms)
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
