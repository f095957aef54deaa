//! Plan document model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identity of a plan within the phase tree: `(phase, plan)`, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId {
    pub phase: u32,
    pub plan: u32,
}

impl PlanId {
    pub fn new(phase: u32, plan: u32) -> Self {
        Self { phase, plan }
    }

    /// Commit scope and file prefix, e.g. `01-02`.
    pub fn scope(&self) -> String {
        format!("{:02}-{:02}", self.phase, self.plan)
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.phase, self.plan)
    }
}

impl FromStr for PlanId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (phase, plan) = s
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("Invalid plan id '{}': expected NN-MM", s))?;
        let phase = phase
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid phase number in plan id '{}'", s))?;
        let plan = plan
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid plan number in plan id '{}'", s))?;
        Ok(Self { phase, plan })
    }
}

/// What a checkpoint asks of the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointKind {
    /// Look at what was built and confirm it works
    #[default]
    HumanVerify,
    /// Perform a manual step the agent cannot do
    HumanAction,
    /// Choose between options before work continues
    Decision,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::HumanVerify => "human-verify",
            CheckpointKind::HumanAction => "human-action",
            CheckpointKind::Decision => "decision",
        }
    }

    /// Parse the part after `checkpoint:`; unknown kinds fall back to human-verify.
    pub fn from_suffix(suffix: &str) -> Self {
        match suffix.trim().to_lowercase().as_str() {
            "human-action" => CheckpointKind::HumanAction,
            "decision" => CheckpointKind::Decision,
            _ => CheckpointKind::HumanVerify,
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a checkpoint must be passed before execution can continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointGate {
    #[default]
    Blocking,
    Optional,
}

impl CheckpointGate {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointGate::Blocking => "blocking",
            CheckpointGate::Optional => "optional",
        }
    }
}

impl fmt::Display for CheckpointGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task inside one execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Could not run because its dependencies did not complete
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "skipped" => Ok(TaskStatus::Skipped),
            "blocked" => Ok(TaskStatus::Blocked),
            other => anyhow::bail!("Unknown task status '{}'", other),
        }
    }
}

/// A fully automatic task handed to the task runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub verify: String,
    #[serde(default)]
    pub done: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl AutoTask {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            files: Vec::new(),
            action: String::new(),
            verify: String::new(),
            done: String::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = action.to_string();
        self
    }

    pub fn with_verify(mut self, verify: &str) -> Self {
        self.verify = verify.to_string();
        self
    }

    pub fn with_done(mut self, done: &str) -> Self {
        self.done = done.to_string();
        self
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

/// A task that pauses execution until a human responds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTask {
    pub id: String,
    pub kind: CheckpointKind,
    pub gate: CheckpointGate,
    #[serde(default)]
    pub what_built: String,
    #[serde(default)]
    pub how_to_verify: String,
    #[serde(default)]
    pub resume_signal: String,
    /// Question posed by a `decision` checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Free-text options offered by a `decision` checkpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl CheckpointTask {
    pub fn new(id: &str, kind: CheckpointKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            gate: CheckpointGate::default(),
            what_built: String::new(),
            how_to_verify: String::new(),
            resume_signal: String::new(),
            decision: None,
            options: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_gate(mut self, gate: CheckpointGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_what_built(mut self, what_built: &str) -> Self {
        self.what_built = what_built.to_string();
        self
    }

    pub fn with_how_to_verify(mut self, how_to_verify: &str) -> Self {
        self.how_to_verify = how_to_verify.to_string();
        self
    }

    pub fn with_resume_signal(mut self, resume_signal: &str) -> Self {
        self.resume_signal = resume_signal.to_string();
        self
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Auto(AutoTask),
    Checkpoint(CheckpointTask),
}

impl Task {
    pub fn id(&self) -> &str {
        match self {
            Task::Auto(t) => &t.id,
            Task::Checkpoint(t) => &t.id,
        }
    }

    pub fn depends_on(&self) -> &[String] {
        match self {
            Task::Auto(t) => &t.depends_on,
            Task::Checkpoint(t) => &t.depends_on,
        }
    }

    /// Display name; checkpoints are named after what they verify.
    pub fn name(&self) -> String {
        match self {
            Task::Auto(t) => t.name.clone(),
            Task::Checkpoint(t) if t.what_built.is_empty() => format!("Checkpoint: {}", t.kind),
            Task::Checkpoint(t) => format!("Checkpoint: {}", first_line(&t.what_built)),
        }
    }

    pub fn is_checkpoint(&self) -> bool {
        matches!(self, Task::Checkpoint(_))
    }

    /// Value of the `type` attribute in the plan document.
    pub fn type_attr(&self) -> String {
        match self {
            Task::Auto(_) => "auto".to_string(),
            Task::Checkpoint(t) => format!("checkpoint:{}", t.kind),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Structured form of a plan document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParsedPlan {
    /// Flat key/value pairs from the leading frontmatter block
    pub metadata: BTreeMap<String, String>,
    pub objective: String,
    /// Verbatim `<context>` section, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub tasks: Vec<Task>,
    pub verification: Vec<String>,
    pub success_criteria: Vec<String>,
}

impl ParsedPlan {
    /// Plan identity from the `phase` and `plan` frontmatter keys.
    pub fn identity(&self) -> Option<PlanId> {
        let phase = leading_number(self.metadata.get("phase")?)?;
        let plan = leading_number(self.metadata.get("plan")?)?;
        Some(PlanId::new(phase, plan))
    }

    /// Raw `phase` frontmatter value, e.g. `01-foundation`.
    pub fn phase_label(&self) -> Option<&str> {
        self.metadata.get("phase").map(String::as_str)
    }

    pub fn depends_on(&self) -> Vec<String> {
        self.metadata
            .get("depends_on")
            .map(|v| parse_inline_list(v))
            .unwrap_or_default()
    }

    pub fn files_modified(&self) -> Vec<String> {
        self.metadata
            .get("files_modified")
            .map(|v| parse_inline_list(v))
            .unwrap_or_default()
    }

    pub fn has_checkpoints(&self) -> bool {
        self.tasks.iter().any(Task::is_checkpoint)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == id)
    }

    pub fn checkpoint(&self, id: &str) -> Option<&CheckpointTask> {
        self.tasks.iter().find_map(|t| match t {
            Task::Checkpoint(c) if c.id == id => Some(c),
            _ => None,
        })
    }

    pub fn auto_task_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_checkpoint()).count()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_checkpoint()).count()
    }

    /// `@path` references listed in the `<context>` section.
    pub fn context_files(&self) -> Vec<String> {
        self.context
            .as_deref()
            .map(|ctx| {
                ctx.lines()
                    .filter_map(|l| l.trim().strip_prefix('@'))
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse the leading run of ASCII digits, e.g. `01-foundation` -> 1.
pub fn leading_number(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse `[a, b]`, `a, b` or `[]` into a list of trimmed, unquoted items.
pub fn parse_inline_list(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render a list in the inline form accepted by [`parse_inline_list`].
pub fn format_inline_list(items: &[String]) -> String {
    format!("[{}]", items.join(", "))
}
