use crate::plan::TaskStatus;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// One task transition in the execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Plan scope, e.g. `01-02`
    pub plan: String,
    pub task: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
}

/// Append-only history log of task transitions.
///
/// Format: `plan|task|status|timestamp`, one line per transition. Only read for
/// reporting; resumption is positional and never consults it.
pub struct StateLog {
    state_file: PathBuf,
}

impl StateLog {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.state_file
    }

    pub fn append(&self, plan: &str, task: &str, status: TaskStatus) -> Result<()> {
        let entry = format!(
            "{}|{}|{}|{}\n",
            plan,
            task,
            status,
            Utc::now().to_rfc3339()
        );

        if let Some(parent) = self.state_file.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.state_file)
            .context("Failed to open state file")?
            .write_all(entry.as_bytes())
            .context("Failed to write state entry")?;

        Ok(())
    }

    /// All well-formed entries in file order. Malformed lines are skipped.
    pub fn entries(&self) -> Result<Vec<StateEntry>> {
        if !self.state_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.state_file).context("Failed to read state file")?;

        Ok(content.lines().filter_map(parse_line).collect())
    }

    pub fn plan_entries(&self, plan: &str) -> Result<Vec<StateEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.plan == plan)
            .collect())
    }

    pub fn reset(&self) -> Result<()> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).context("Failed to remove state file")?;
        }
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<StateEntry> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 4 {
        return None;
    }
    Some(StateEntry {
        plan: parts[0].to_string(),
        task: parts[1].to_string(),
        status: parts[2].parse().ok()?,
        timestamp: DateTime::parse_from_rfc3339(parts[3])
            .ok()?
            .with_timezone(&Utc),
    })
}
