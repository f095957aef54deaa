//! Integration tests for the phasekit CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a phasekit Command
fn phasekit() -> Command {
    cargo_bin_cmd!("phasekit")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir) {
    phasekit()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();
}

/// A project with phase 01 and plan 01-01 holding the given tasks.
fn project_with_plan(tasks: &[&str], checkpoint: bool) -> TempDir {
    let dir = create_temp_project();
    init_project(&dir);
    phasekit()
        .current_dir(dir.path())
        .args(["phase", "new", "Foundation", "--goal", "Base layer"])
        .assert()
        .success();

    let mut cmd = phasekit();
    cmd.current_dir(dir.path())
        .args(["plan", "new", "1", "--objective", "Set up the base"]);
    for task in tasks {
        cmd.args(["--task", task]);
    }
    if checkpoint {
        cmd.arg("--checkpoint");
    }
    cmd.assert().success();
    dir
}

fn plan_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path()
        .join(".planning/phases/01-foundation/01-01-PLAN.md")
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_phasekit_help() {
        phasekit()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("execute"))
            .stdout(predicate::str::contains("resume"));
    }

    #[test]
    fn test_phasekit_version() {
        phasekit().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();

        phasekit()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized phasekit project"));

        assert!(dir.path().join(".planning/phases").is_dir());
        assert!(dir.path().join(".planning/logs").is_dir());
        assert!(dir.path().join(".planning/config.toml").is_file());
    }

    #[test]
    fn test_init_idempotent() {
        let dir = create_temp_project();
        init_project(&dir);

        phasekit()
            .current_dir(dir.path())
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_init_stores_project_name() {
        let dir = create_temp_project();

        phasekit()
            .current_dir(dir.path())
            .args(["init", "--name", "billing"])
            .assert()
            .success();

        let config = fs::read_to_string(dir.path().join(".planning/config.toml")).unwrap();
        assert!(config.contains("name = \"billing\""));
    }

    #[test]
    fn test_commands_require_init() {
        let dir = create_temp_project();

        phasekit()
            .current_dir(dir.path())
            .args(["phase", "list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("phasekit init"));
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();

        phasekit()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("init")
            .assert()
            .success();

        assert!(dir.path().join(".planning").is_dir());
    }
}

// =============================================================================
// Phases and plans
// =============================================================================

mod phases {
    use super::*;

    #[test]
    fn test_phase_new_numbers_sequentially() {
        let dir = create_temp_project();
        init_project(&dir);

        phasekit()
            .current_dir(dir.path())
            .args(["phase", "new", "Foundation"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase 01: foundation"));
        phasekit()
            .current_dir(dir.path())
            .args(["phase", "new", "Auth Flow", "--depends-on", "01-foundation"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase 02: auth-flow"));

        let context = dir
            .path()
            .join(".planning/phases/02-auth-flow/02-CONTEXT.md");
        let text = fs::read_to_string(context).unwrap();
        assert!(text.contains("01-foundation"));
    }

    #[test]
    fn test_phase_list_json() {
        let dir = project_with_plan(&["Create schema"], false);

        let output = phasekit()
            .current_dir(dir.path())
            .args(["phase", "list", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let phases: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(phases[0]["number"], 1);
        assert_eq!(phases[0]["name"], "foundation");
        assert_eq!(phases[0]["status"], "in_progress");
        assert_eq!(phases[0]["plans"][0]["state"], "pending");
    }

    #[test]
    fn test_phase_list_empty() {
        let dir = create_temp_project();
        init_project(&dir);

        phasekit()
            .current_dir(dir.path())
            .args(["phase", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No phases found"));
    }

    #[test]
    fn test_phase_status() {
        let dir = project_with_plan(&["Create schema"], false);

        phasekit()
            .current_dir(dir.path())
            .args(["phase", "status", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("0%"))
            .stdout(predicate::str::contains("execute plan 01-01"));

        phasekit()
            .current_dir(dir.path())
            .args(["phase", "status", "7"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Phase 07 not found"));
    }

    #[test]
    fn test_plan_new_writes_plan_document() {
        let dir = project_with_plan(&["Create schema", "Add schema tests"], true);

        let text = fs::read_to_string(plan_path(&dir)).unwrap();
        assert!(text.contains("<objective>"));
        assert!(text.contains("Set up the base"));
        assert!(text.contains(r#"id="task-1""#));
        assert!(text.contains(r#"id="task-2""#));
        assert!(text.contains("checkpoint:human-verify"));
    }

    #[test]
    fn test_plan_validate_by_id() {
        let dir = project_with_plan(&["Create schema"], true);

        phasekit()
            .current_dir(dir.path())
            .args(["plan", "validate", "01-01"])
            .assert()
            .success()
            .stdout(predicate::str::contains("strategy: segmented"))
            .stdout(predicate::str::contains("valid"));
    }

    #[test]
    fn test_plan_validate_rejects_malformed_plan() {
        let dir = create_temp_project();
        init_project(&dir);
        let path = dir.path().join("broken-PLAN.md");
        fs::write(&path, "<objective>Nothing to do</objective>\n").unwrap();

        phasekit()
            .current_dir(dir.path())
            .args(["plan", "validate", "broken-PLAN.md"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("MALFORMED_PLAN"));
    }
}

// =============================================================================
// Execution
// =============================================================================

mod execution {
    use super::*;

    /// Runner that appends the task id to work.txt and reports completion.
    const RUNNER_CONFIG: &str = r#"
[runner]
command = "sh"
args = ["-c", '''prompt=$(cat); id=$(printf '%s\n' "$prompt" | sed -n 's/^You are executing task \([^ ]*\) of plan.*/\1/p'); echo "$id" >> work.txt; echo "<task-complete>$id</task-complete>"''']

[execution]
backoff_ms = 0
"#;

    fn git_project(tasks: &[&str], checkpoint: bool) -> TempDir {
        let dir = project_with_plan(tasks, checkpoint);
        fs::write(dir.path().join(".planning/config.toml"), RUNNER_CONFIG).unwrap();
        git2::Repository::init(dir.path()).unwrap();
        dir
    }

    fn commit_subjects(dir: &Path) -> Vec<String> {
        let repo = git2::Repository::open(dir).unwrap();
        let mut walk = repo.revwalk().unwrap();
        walk.push_head().unwrap();
        let mut subjects: Vec<String> = walk
            .map(|oid| {
                repo.find_commit(oid.unwrap())
                    .unwrap()
                    .summary()
                    .unwrap()
                    .to_string()
            })
            .collect();
        subjects.reverse();
        subjects
    }

    #[test]
    fn test_execute_dry_run_json() {
        let dir = project_with_plan(&["Create schema", "Add schema tests"], false);

        let output = phasekit()
            .current_dir(dir.path())
            .args(["execute", "01-01", "--dry-run", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["plan_id"], "01-01");
        assert_eq!(record["dry_run"], true);
        assert_eq!(record["status"], "pending");
        assert_eq!(record["strategy"], "autonomous");
        assert_eq!(record["task_count"], 2);
        assert_eq!(record["commits"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_execute_missing_plan_fails() {
        let dir = create_temp_project();
        init_project(&dir);

        phasekit()
            .current_dir(dir.path())
            .args(["execute", "missing-PLAN.md", "--dry-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("plan file not found"));
    }

    #[test]
    fn test_execute_commits_each_task() {
        let dir = git_project(&["Create schema", "Add schema tests"], false);

        let output = phasekit()
            .current_dir(dir.path())
            .args(["execute", "01-01", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "completed");
        assert_eq!(record["success"], true);

        assert_eq!(
            commit_subjects(dir.path()),
            vec![
                "feat(01-01): Create schema",
                "test(01-01): Add schema tests"
            ]
        );
        assert!(
            dir.path()
                .join(".planning/phases/01-foundation/01-01-SUMMARY.md")
                .is_file()
        );
        let state = fs::read_to_string(dir.path().join(".planning/STATE.log")).unwrap();
        assert!(state.contains("01-01|task-2|completed|"));
    }

    #[test]
    fn test_execute_halts_at_checkpoint_then_resume() {
        let dir = git_project(&["Create schema", "Add schema tests"], true);

        let output = phasekit()
            .current_dir(dir.path())
            .args(["execute", "01-01", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "awaiting_checkpoint");
        assert_eq!(record["checkpoint"]["id"], "task-3");

        // Both auto tasks come before the checkpoint, so only it remains
        let output = phasekit()
            .current_dir(dir.path())
            .args([
                "resume",
                "01-01",
                "task-3",
                "--approve",
                "--dependency-mode",
                "any",
                "--json",
            ])
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(record["status"], "completed");

        let summary = fs::read_to_string(
            dir.path()
                .join(".planning/phases/01-foundation/01-01-SUMMARY.md"),
        )
        .unwrap();
        assert!(summary.contains("commits: 2"));
    }

    #[test]
    fn test_resume_reject_fails_plan() {
        let dir = git_project(&["Create schema"], true);

        phasekit()
            .current_dir(dir.path())
            .args(["resume", "01-01", "task-2", "--reject", "--json"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("CHECKPOINT_NOT_APPROVED"));
    }

    #[test]
    fn test_resume_requires_answer_when_not_interactive() {
        let dir = git_project(&["Create schema"], true);

        phasekit()
            .current_dir(dir.path())
            .args(["resume", "01-01", "task-2", "--json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--approve or --reject"));
    }
}

// =============================================================================
// Classification, config and reset
// =============================================================================

mod tools {
    use super::*;

    #[test]
    fn test_classify_security_gap() {
        phasekit()
            .args(["classify", "SQL injection in login", "--type", "security"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rule 2"))
            .stdout(predicate::str::contains("auto_add"));
    }

    #[test]
    fn test_classify_json_architectural() {
        let output = phasekit()
            .args(["classify", "Switch to event sourcing", "--type", "architectural", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["rule"], "architectural");
        assert_eq!(value["action"], "stop_ask_user");
        assert_eq!(value["requires_user_input"], true);
    }

    #[test]
    fn test_classify_blocking_flag() {
        phasekit()
            .args(["classify", "Need an API key", "--blocking"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rule 3"));
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        phasekit()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No config.toml found"))
            .stdout(predicate::str::contains("max_attempts = 3"));
    }

    #[test]
    fn test_config_show_env_override() {
        let dir = create_temp_project();
        init_project(&dir);

        phasekit()
            .current_dir(dir.path())
            .env("PHASEKIT_MAX_ATTEMPTS", "5")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_attempts = 5"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_temp_project();

        phasekit()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created config.toml"));

        phasekit()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_warns() {
        let dir = create_temp_project();
        init_project(&dir);
        fs::write(
            dir.path().join(".planning/config.toml"),
            "[execution]\nmax_attempts = 0\n",
        )
        .unwrap();

        phasekit()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_attempts = 0"));
    }

    #[test]
    fn test_reset_force_clears_history() {
        let dir = create_temp_project();
        init_project(&dir);
        let state = dir.path().join(".planning/STATE.log");
        fs::write(&state, "01-01|task-1|completed|2026-01-01T00:00:00Z\n").unwrap();

        phasekit()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));

        assert!(fs::read_to_string(&state).unwrap_or_default().is_empty());
    }

    #[test]
    fn test_reset_plan_removes_summary() {
        let dir = project_with_plan(&["Create schema"], false);
        let summary = dir
            .path()
            .join(".planning/phases/01-foundation/01-01-SUMMARY.md");
        fs::write(&summary, "---\nphase: 01-foundation\n---\n").unwrap();

        phasekit()
            .current_dir(dir.path())
            .args(["reset", "--plan", "01-01", "--force"])
            .assert()
            .success();

        assert!(!summary.exists());
    }
}
