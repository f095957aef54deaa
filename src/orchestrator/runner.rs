use crate::deviation::Deviation;
use crate::plan::AutoTask;
use crate::signals::SignalParser;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// What the runner is told about the surrounding plan.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// Plan scope, e.g. `01-02`
    pub plan_id: String,
    pub objective: String,
    pub plan_context: Option<String>,
    pub context_files: Vec<String>,
    /// 1-based attempt number for this task
    pub attempt: u32,
    /// Error from the previous attempt, when retrying
    pub previous_error: Option<String>,
    /// Response given when the preceding checkpoint was approved
    pub human_input: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of running one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub verification_passed: Option<bool>,
    #[serde(default)]
    pub deviations: Vec<Deviation>,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            files_modified: Vec::new(),
            verification_passed: Some(true),
            deviations: Vec::new(),
            output: String::new(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            verification_passed: None,
            error: Some(error.into()),
            ..Self::success()
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files_modified = files;
        self
    }

    pub fn with_deviation(mut self, deviation: Deviation) -> Self {
        self.deviations.push(deviation);
        self
    }

    pub fn with_verification(mut self, passed: bool) -> Self {
        self.verification_passed = Some(passed);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Executes one auto task's instructions.
///
/// Real implementation: [`CommandTaskRunner`]. Errors returned here are
/// recorded as a failed task; they never abort the plan.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &AutoTask, ctx: &TaskContext) -> Result<TaskOutcome>;
}

/// Runs each task through an external agent CLI, prompt on stdin.
pub struct CommandTaskRunner {
    command: String,
    args: Vec<String>,
    project_dir: PathBuf,
    log_dir: Option<PathBuf>,
    verbose: bool,
}

impl CommandTaskRunner {
    pub fn new(command: &str, args: Vec<String>, project_dir: PathBuf) -> Self {
        Self {
            command: command.to_string(),
            args,
            project_dir,
            log_dir: None,
            verbose: false,
        }
    }

    /// Keep each prompt and output under this directory.
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn build_prompt(&self, task: &AutoTask, ctx: &TaskContext) -> String {
        let mut prompt = format!(
            "You are executing task {} of plan {}.\n\n## OBJECTIVE\n{}\n",
            task.id, ctx.plan_id, ctx.objective
        );

        if let Some(ref plan_context) = ctx.plan_context {
            prompt.push_str(&format!("\n## CONTEXT\n{}\n", plan_context.trim()));
        }

        prompt.push_str(&format!(
            "\n## TASK: {}\nFiles: {}\n\n### Action\n{}\n\n### Verify\n{}\n\n### Done when\n{}\n",
            task.name,
            if task.files.is_empty() {
                "(not declared)".to_string()
            } else {
                task.files.join(", ")
            },
            task.action,
            task.verify,
            task.done
        ));

        if let Some(ref input) = ctx.human_input {
            prompt.push_str(&format!("\n## HUMAN INPUT FROM CHECKPOINT\n{}\n", input.trim()));
        }

        if let Some(ref previous) = ctx.previous_error {
            prompt.push_str(&format!(
                "\n## PREVIOUS ATTEMPT FAILED (attempt {})\n{}\n",
                ctx.attempt.saturating_sub(1),
                previous
            ));
        }

        prompt.push_str(&format!(
            r#"
## RULES
1. Do only this task. Do not commit; the orchestrator commits for you.
2. Report anything unplanned as <deviation type="bug|security|blocker|architectural|enhancement">description</deviation>.
3. Report the verification result as <verification>passed</verification> or <verification>failed</verification>.
4. List touched files as <files-modified>path, path</files-modified>.
5. When the task is fully done and verified, output <task-complete>{}</task-complete>.
"#,
            task.id
        ));

        prompt
    }

    fn write_log(&self, name: &str, content: &str) {
        let Some(ref dir) = self.log_dir else {
            return;
        };
        let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(dir.join(name), content));
        if let Err(e) = result {
            tracing::warn!(error = %e, file = name, "Failed to write runner log");
        }
    }
}

#[async_trait]
impl TaskRunner for CommandTaskRunner {
    async fn run(&self, task: &AutoTask, ctx: &TaskContext) -> Result<TaskOutcome> {
        let prompt = self.build_prompt(task, ctx);
        let log_stem = format!("{}-{}-attempt-{}", ctx.plan_id, task.id, ctx.attempt.max(1));
        self.write_log(&format!("{}-prompt.md", log_stem), &prompt);

        let start = Instant::now();
        tracing::debug!(command = %self.command, task = %task.id, "Spawning task runner");

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.project_dir)
            .spawn()
            .with_context(|| format!("Failed to spawn task runner '{}'", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            let sent = async {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await
            }
            .await;
            if let Err(e) = sent {
                // Reap the child before giving up on it
                if let Err(kill_err) = child.kill().await {
                    tracing::warn!(error = %kill_err, task = %task.id, "Failed to stop task runner");
                }
                return Err(e).context("Failed to send prompt to task runner");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for task runner")?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        self.write_log(&format!("{}-output.log", log_stem), &stdout);

        let exit_code = output.status.code().unwrap_or(-1);
        tracing::debug!(
            task = %task.id,
            exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Task runner finished"
        );

        let signals = SignalParser::new(self.verbose).parse(&stdout);
        let files_modified = if signals.files_modified.is_empty() {
            task.files.clone()
        } else {
            signals.files_modified.clone()
        };

        let error = if exit_code != 0 {
            let detail = stderr.lines().last().unwrap_or("").trim().to_string();
            Some(format!("runner exited with code {} {}", exit_code, detail).trim().to_string())
        } else if signals.verification == Some(false) {
            Some("verification did not pass".to_string())
        } else if !signals.completes(&task.id) {
            Some(format!("runner did not report <task-complete>{}</task-complete>", task.id))
        } else {
            None
        };

        Ok(TaskOutcome {
            status: if error.is_none() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Failure
            },
            files_modified,
            verification_passed: signals.verification,
            deviations: signals.all_deviations(),
            output: stdout,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task() -> AutoTask {
        AutoTask::new("task-1", "Create user model")
            .with_files(vec!["src/user.rs".into()])
            .with_action("Define the User struct")
            .with_verify("cargo test user")
            .with_done("User compiles")
    }

    fn ctx() -> TaskContext {
        TaskContext {
            plan_id: "01-02".into(),
            objective: "Model users".into(),
            attempt: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_contains_task_fields() {
        let runner = CommandTaskRunner::new("agent", vec![], PathBuf::from("."));
        let prompt = runner.build_prompt(&task(), &ctx());
        assert!(prompt.contains("task task-1 of plan 01-02"));
        assert!(prompt.contains("Define the User struct"));
        assert!(prompt.contains("Files: src/user.rs"));
        assert!(prompt.contains("<task-complete>task-1</task-complete>"));
        assert!(!prompt.contains("PREVIOUS ATTEMPT"));
        assert!(!prompt.contains("HUMAN INPUT"));
    }

    #[test]
    fn test_prompt_includes_checkpoint_response() {
        let runner = CommandTaskRunner::new("agent", vec![], PathBuf::from("."));
        let mut ctx = ctx();
        ctx.human_input = Some("Use the blue theme".into());
        let prompt = runner.build_prompt(&task(), &ctx);
        assert!(prompt.contains("## HUMAN INPUT FROM CHECKPOINT\nUse the blue theme"));
    }

    #[test]
    fn test_prompt_mentions_previous_failure() {
        let runner = CommandTaskRunner::new("agent", vec![], PathBuf::from("."));
        let mut ctx = ctx();
        ctx.attempt = 2;
        ctx.previous_error = Some("tests failed".into());
        let prompt = runner.build_prompt(&task(), &ctx);
        assert!(prompt.contains("PREVIOUS ATTEMPT FAILED (attempt 1)"));
        assert!(prompt.contains("tests failed"));
    }

    #[test]
    fn test_outcome_builders() {
        let ok = TaskOutcome::success().with_files(vec!["a.rs".into()]);
        assert!(ok.is_success());
        assert_eq!(ok.verification_passed, Some(true));

        let failed = TaskOutcome::failure("boom");
        assert!(!failed.is_success());
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.verification_passed, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_parses_signals() {
        let dir = tempdir().unwrap();
        let script = "cat > /dev/null; echo '<deviation type=\"bug\">Off by one</deviation>'; \
                      echo '<files-modified>src/user.rs</files-modified>'; \
                      echo '<verification>passed</verification>'; \
                      echo '<task-complete>task-1</task-complete>'";
        let runner = CommandTaskRunner::new(
            "sh",
            vec!["-c".into(), script.into()],
            dir.path().to_path_buf(),
        )
        .with_log_dir(dir.path().join("logs"));

        let outcome = runner.run(&task(), &ctx()).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.files_modified, vec!["src/user.rs"]);
        assert_eq!(outcome.deviations.len(), 1);
        assert_eq!(outcome.deviations[0].kind, "bug");
        assert!(dir.path().join("logs/01-02-task-1-attempt-1-prompt.md").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_without_completion_fails() {
        let dir = tempdir().unwrap();
        let runner = CommandTaskRunner::new(
            "sh",
            vec!["-c".into(), "cat > /dev/null; echo working".into()],
            dir.path().to_path_buf(),
        );
        let outcome = runner.run(&task(), &ctx()).await.unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.error.unwrap().contains("task-complete"));
        // Declared files are used when the runner lists none
        assert_eq!(outcome.files_modified, vec!["src/user.rs"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_nonzero_exit() {
        let dir = tempdir().unwrap();
        let runner = CommandTaskRunner::new(
            "sh",
            vec![
                "-c".into(),
                "cat > /dev/null; echo '<task-complete>task-1</task-complete>'; echo oops >&2; exit 3".into(),
            ],
            dir.path().to_path_buf(),
        );
        let outcome = runner.run(&task(), &ctx()).await.unwrap();
        assert!(!outcome.is_success());
        assert_eq!(outcome.error.as_deref(), Some("runner exited with code 3 oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_exiting_before_reading_prompt_is_an_error() {
        let dir = tempdir().unwrap();
        let runner = CommandTaskRunner::new(
            "sh",
            vec!["-c".into(), "exit 0".into()],
            dir.path().to_path_buf(),
        );
        // Larger than any pipe buffer, so the write cannot complete
        let mut big = task();
        big.action = "x".repeat(4 * 1024 * 1024);

        let err = runner.run(&big, &ctx()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to send prompt"));
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let runner = CommandTaskRunner::new(
            "definitely-not-a-real-binary-xyz",
            vec![],
            std::env::temp_dir(),
        );
        assert!(runner.run(&task(), &ctx()).await.is_err());
    }
}
