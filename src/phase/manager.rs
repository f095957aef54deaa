//! `.planning/` directory manager: numbering, naming and derived status.

use super::{
    PhaseInfo, PhaseStatus, PlanInfo, PlanState, PlanSummary, context_file_name,
    derive_phase_status, parse_phase_dir_name, parse_plan_file_name, parse_summary_file_name,
    phase_dir_name, plan_file_name, slugify,
};
use crate::deviation::IssueEntry;
use crate::orchestrator::engine::ExecutionJournal;
use crate::orchestrator::state::StateLog;
use crate::plan::{ParsedPlan, PlanId, Task, TaskStatus, format_inline_list, render_plan};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name of the planning directory inside a project.
pub const PLANNING_DIR: &str = ".planning";

const ISSUES_HEADER: &str = "# Deferred Issues\n\nEnhancements noticed during execution and parked for later.\n\n";

/// Aggregated progress of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub phase: u32,
    pub name: String,
    pub status: PhaseStatus,
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
    /// `round(100 * completed / total)`, 0 without plans
    pub progress: u32,
    pub next_action: String,
}

/// Frontmatter of the `NN-CONTEXT.md` document written for each phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PhaseContext {
    phase: String,
    name: String,
    goal: String,
    depends_on: Vec<String>,
    created: String,
}

/// The `.planning/` tree of one project.
#[derive(Debug, Clone)]
pub struct PlanningDir {
    root: PathBuf,
}

impl PlanningDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn for_project(project_dir: &Path) -> Self {
        Self::new(project_dir.join(PLANNING_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn phases_dir(&self) -> PathBuf {
        self.root.join("phases")
    }

    pub fn state_log_path(&self) -> PathBuf {
        self.root.join("STATE.log")
    }

    pub fn issues_path(&self) -> PathBuf {
        self.root.join("ISSUES.md")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn state_log(&self) -> StateLog {
        StateLog::new(self.state_log_path())
    }

    /// Create the next phase directory and its context document.
    ///
    /// The number is one past the highest existing phase; gaps left by
    /// deleted phases are not reused.
    pub fn create_phase(&self, name: &str, goal: &str, depends_on: &[String]) -> Result<PhaseInfo> {
        let slug = slugify(name);
        if slug.is_empty() {
            anyhow::bail!("Phase name '{}' has no usable characters", name);
        }

        let number = self
            .list_phases()?
            .iter()
            .map(|p| p.number)
            .max()
            .unwrap_or(0)
            + 1;

        let dir = self.phases_dir().join(phase_dir_name(number, &slug));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create phase directory: {}", dir.display()))?;

        let context = PhaseContext {
            phase: format!("{:02}", number),
            name: slug.clone(),
            goal: goal.to_string(),
            depends_on: depends_on.to_vec(),
            created: Utc::now().to_rfc3339(),
        };
        let yaml = serde_yaml::to_string(&context).context("Failed to serialize phase context")?;
        let doc = format!(
            "---\n{}---\n\n# Phase {:02}: {}\n\n## Goal\n\n{}\n",
            yaml,
            number,
            name.trim(),
            goal.trim()
        );
        let context_path = dir.join(context_file_name(number));
        fs::write(&context_path, doc).with_context(|| {
            format!(
                "Failed to write phase context: {}",
                context_path.display()
            )
        })?;

        tracing::info!(phase = number, name = %slug, "Created phase");

        Ok(PhaseInfo {
            number,
            name: slug,
            dir,
            plans: Vec::new(),
            status: PhaseStatus::Pending,
        })
    }

    /// All phases, sorted by number, with plan status derived from the files present.
    pub fn list_phases(&self) -> Result<Vec<PhaseInfo>> {
        let phases_dir = self.phases_dir();
        if !phases_dir.exists() {
            return Ok(Vec::new());
        }

        let history = self.plans_with_history();
        let mut phases = Vec::new();

        for entry in WalkDir::new(&phases_dir).min_depth(1).max_depth(1) {
            let entry = entry
                .with_context(|| format!("Failed to read {}", phases_dir.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy();
            let Some((number, name)) = parse_phase_dir_name(&dir_name) else {
                continue;
            };

            let plans = scan_plans(entry.path(), &history)?;
            let status = derive_phase_status(&plans);
            phases.push(PhaseInfo {
                number,
                name,
                dir: entry.path().to_path_buf(),
                plans,
                status,
            });
        }

        phases.sort_by_key(|p| p.number);
        Ok(phases)
    }

    pub fn find_phase(&self, number: u32) -> Result<Option<PhaseInfo>> {
        Ok(self.list_phases()?.into_iter().find(|p| p.number == number))
    }

    fn require_phase(&self, number: u32) -> Result<PhaseInfo> {
        self.find_phase(number)?
            .ok_or_else(|| anyhow::anyhow!("Phase {:02} not found in {}", number, self.phases_dir().display()))
    }

    /// Write a new plan document into a phase with the next plan number.
    pub fn create_plan(&self, phase: u32, objective: &str, tasks: Vec<Task>) -> Result<PlanInfo> {
        let info = self.require_phase(phase)?;
        let number = info.plans.iter().map(|p| p.id.plan).max().unwrap_or(0) + 1;
        let id = PlanId::new(phase, number);

        let files: BTreeSet<String> = tasks
            .iter()
            .filter_map(|t| match t {
                Task::Auto(a) => Some(a.files.iter().cloned()),
                Task::Checkpoint(_) => None,
            })
            .flatten()
            .collect();
        let files: Vec<String> = files.into_iter().collect();

        let mut plan = ParsedPlan {
            objective: objective.trim().to_string(),
            tasks,
            ..Default::default()
        };
        plan.metadata.insert("phase".into(), info.dir_name());
        plan.metadata.insert("plan".into(), format!("{:02}", number));
        plan.metadata.insert("type".into(), "execute".into());
        plan.metadata.insert("depends_on".into(), "[]".into());
        plan.metadata
            .insert("files_modified".into(), format_inline_list(&files));

        let path = info.dir.join(plan_file_name(id));
        fs::write(&path, render_plan(&plan))
            .with_context(|| format!("Failed to write plan: {}", path.display()))?;

        tracing::info!(plan = %id, path = %path.display(), "Created plan");

        Ok(PlanInfo {
            id,
            path,
            summary_path: None,
            state: PlanState::Pending,
        })
    }

    /// Counts, percentage and suggested next step for one phase.
    pub fn phase_status(&self, phase: u32) -> Result<PhaseProgress> {
        let info = self.require_phase(phase)?;
        Ok(progress_of(&info))
    }

    /// Locate `NN-MM-PLAN.*` for an id anywhere under the phases directory.
    pub fn resolve_plan(&self, id: PlanId) -> Result<Option<PathBuf>> {
        let pattern = format!(
            "{}/*/{}-PLAN.*",
            glob::Pattern::escape(&self.phases_dir().to_string_lossy()),
            id.scope()
        );
        let mut matches = glob::glob(&pattern)
            .with_context(|| format!("Invalid plan search pattern: {}", pattern))?
            .filter_map(|p| p.ok())
            .collect::<Vec<_>>();
        matches.sort();
        Ok(matches.into_iter().next())
    }

    fn plans_with_history(&self) -> HashSet<String> {
        match self.state_log().entries() {
            Ok(entries) => entries.into_iter().map(|e| e.plan).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable execution history");
                HashSet::new()
            }
        }
    }
}

/// `01-02-PLAN.md` -> `01-02-SUMMARY.md` in the same directory.
pub fn summary_path_for(plan_path: &Path) -> PathBuf {
    let file_name = plan_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let summary_name = match file_name.rfind("-PLAN") {
        Some(idx) => format!("{}-SUMMARY.md", &file_name[..idx]),
        None => {
            let stem = plan_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "plan".to_string());
            format!("{}-SUMMARY.md", stem)
        }
    };
    plan_path.with_file_name(summary_name)
}

fn scan_plans(phase_dir: &Path, history: &HashSet<String>) -> Result<Vec<PlanInfo>> {
    let mut plan_files = Vec::new();
    let mut summaries = Vec::new();

    for entry in WalkDir::new(phase_dir).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to read {}", phase_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(id) = parse_plan_file_name(&name) {
            plan_files.push((id, entry.path().to_path_buf()));
        } else if let Some(id) = parse_summary_file_name(&name) {
            summaries.push((id, entry.path().to_path_buf()));
        }
    }

    let mut plans: Vec<PlanInfo> = plan_files
        .into_iter()
        .map(|(id, path)| {
            // Summary must sit beside its plan
            let summary_path = summaries
                .iter()
                .find(|(sid, spath)| *sid == id && spath.parent() == path.parent())
                .map(|(_, p)| p.clone());
            let state = if summary_path.is_some() {
                PlanState::Complete
            } else if history.contains(&id.scope()) {
                PlanState::InProgress
            } else {
                PlanState::Pending
            };
            PlanInfo {
                id,
                path,
                summary_path,
                state,
            }
        })
        .collect();

    plans.sort_by_key(|p| p.id);
    plans.dedup_by_key(|p| p.id);
    Ok(plans)
}

fn progress_of(info: &PhaseInfo) -> PhaseProgress {
    let total = info.plans.len();
    let completed = info.completed_plans();
    let in_progress = info
        .plans
        .iter()
        .filter(|p| p.state == PlanState::InProgress)
        .count();
    let pending = total - completed - in_progress;
    let progress = if total == 0 {
        0
    } else {
        ((completed as f64 * 100.0) / total as f64).round() as u32
    };

    let next_action = match info.next_incomplete_plan() {
        _ if total == 0 => format!("plan phase {}", info.number),
        Some(plan) => format!("execute plan {}", plan.id),
        None => format!("phase {} complete", info.number),
    };

    PhaseProgress {
        phase: info.number,
        name: info.name.clone(),
        status: info.status,
        total,
        completed,
        in_progress,
        pending,
        progress,
        next_action,
    }
}

impl ExecutionJournal for PlanningDir {
    fn record_task(&self, plan: &str, task_id: &str, status: TaskStatus) -> Result<()> {
        self.state_log().append(plan, task_id, status)
    }

    fn log_issue(&self, issue: &IssueEntry) -> Result<()> {
        let path = self.issues_path();
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;

        let is_new = !path.exists();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        if is_new {
            file.write_all(ISSUES_HEADER.as_bytes())
                .context("Failed to write issues header")?;
        }
        let kind = if issue.kind.is_empty() {
            String::new()
        } else {
            format!(" ({})", issue.kind)
        };
        let line = format!(
            "- [{}] {} {}: {}{}\n",
            issue.logged_at.format("%Y-%m-%d"),
            issue.plan_id,
            issue.task_id,
            issue.description,
            kind
        );
        file.write_all(line.as_bytes())
            .context("Failed to append deferred issue")?;
        Ok(())
    }

    fn write_summary(&self, plan_path: &Path, summary: &PlanSummary) -> Result<PathBuf> {
        let path = summary_path_for(plan_path);
        let text = summary.render()?;
        fs::write(&path, text)
            .with_context(|| format!("Failed to write summary: {}", path.display()))?;
        tracing::info!(path = %path.display(), "Wrote plan summary");
        Ok(path)
    }
}
