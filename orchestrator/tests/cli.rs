//! CLI tests for the `orchestrator` binary.
//!
//! Spawns the binary against a temporary config and database, with a shell
//! one-liner standing in for the completion service, and checks JSON output and
//! exit codes.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use orchestrator::exit_codes;
use orchestrator::io::config::{OrchestratorConfig, write_config};
use serde_json::Value;

const REPLY_SCRIPT: &str = r#"cat > /dev/null; printf '%s\n' '{"text":"{\"tasks\":[{\"order_index\":1,\"input\":\"step one\"},{\"order_index\":2,\"input\":\"step two\"}]}","usage":{"total_tokens":12}}'"#;

struct Workspace {
    _dir: tempfile::TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = dir.path().join("orchestrator.toml");
        let mut cfg = OrchestratorConfig::default();
        cfg.database_path = dir.path().join("data/orchestrator.db");
        cfg.completion.command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        cfg.completion.timeout_secs = 10;
        write_config(&config, &cfg).expect("write config");
        Self { _dir: dir, config }
    }

    fn run(&self, args: &[&str]) -> Output {
        orchestrator(&self.config, args)
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert_eq!(
            output.status.code(),
            Some(exit_codes::OK),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("json stdout")
    }

    fn create_project(&self) -> i64 {
        let project = self.json(&["project", "create", "--owner", "u1", "--title", "Launch"]);
        project["id"].as_i64().expect("project id")
    }
}

fn orchestrator(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("spawn orchestrator")
}

#[test]
fn pipeline_plans_executes_and_summarizes() {
    let ws = Workspace::new(REPLY_SCRIPT);
    let project_id = ws.create_project();

    let outcome = ws.json(&["run", "pipeline", &project_id.to_string()]);

    assert_eq!(outcome["run"]["status"], "summarized");
    assert_eq!(outcome["run"]["locked"], false);
    assert_eq!(outcome["plan"]["tasks"].as_array().expect("tasks").len(), 2);
    assert_eq!(outcome["execution"]["tokens_used"], 24);
    let summary = outcome["run"]["final_summary"].as_str().expect("summary");
    assert!(summary.starts_with("Summary for project: Launch"));
    assert!(summary.contains("- Instruction: step two"));

    let run_id = outcome["run"]["id"].as_i64().expect("run id").to_string();
    let tasks = ws.json(&["run", "tasks", &run_id]);
    assert!(
        tasks
            .as_array()
            .expect("tasks")
            .iter()
            .all(|t| t["status"] == "done")
    );
    let logs = ws.json(&["run", "logs", &run_id]);
    assert!(
        logs.as_array()
            .expect("logs")
            .iter()
            .any(|l| l["level"] == "cost" && l["agent_type"] == "llm")
    );

    let again = ws.run(&["run", "execute", &run_id]);
    assert_eq!(again.status.code(), Some(exit_codes::EMPTY_WORK));
}

#[test]
fn step_by_step_commands_supersede_previous_runs() {
    let ws = Workspace::new(REPLY_SCRIPT);
    let project_id = ws.create_project().to_string();

    let first = ws.json(&["run", "create", &project_id]);
    let second = ws.json(&["run", "create", &project_id]);
    assert_eq!(second["run"]["status"], "planned");

    let active = ws.json(&["run", "list", &project_id, "--archived", "false"]);
    let active = active.as_array().expect("runs");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], second["run"]["id"]);

    let first_id = first["run"]["id"].as_i64().expect("id").to_string();
    ws.json(&["run", "delete", &first_id]);
    let missing = ws.run(&["run", "get", &first_id]);
    assert_eq!(missing.status.code(), Some(exit_codes::NOT_FOUND));
}

#[test]
fn failing_completion_command_maps_to_exit_codes() {
    let ws = Workspace::new("cat > /dev/null; echo 'not json at all'");
    let project_id = ws.create_project().to_string();
    let output = ws.run(&["run", "create", &project_id]);
    assert_eq!(output.status.code(), Some(exit_codes::STRUCTURAL));

    let ws = Workspace::new("cat > /dev/null; exit 75");
    let project_id = ws.create_project().to_string();
    let output = ws.run(&["run", "create", &project_id]);
    assert_eq!(output.status.code(), Some(exit_codes::UPSTREAM));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rate limited"));
}

#[test]
fn init_writes_config_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("orchestrator.toml");
    let db = dir.path().join("orchestrator.db");

    let output = orchestrator(&config, &["--db", db.to_str().expect("utf8 path"), "init"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(config.exists());
    assert!(db.exists());

    let db_arg = db.to_str().expect("utf8 path");
    let output = orchestrator(&config, &["--db", db_arg, "init"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let output = orchestrator(&config, &["--db", db_arg, "init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn verbose_flag_surfaces_diagnostics_on_stderr() {
    let ws = Workspace::new(REPLY_SCRIPT);
    let project_id = ws.create_project().to_string();

    let quiet = ws.run(&["run", "create", &project_id]);
    assert_eq!(quiet.status.code(), Some(exit_codes::OK));
    assert!(!String::from_utf8_lossy(&quiet.stderr).contains("run planned"));

    let verbose = ws.run(&["-v", "run", "create", &project_id]);
    assert_eq!(verbose.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&verbose.stderr).contains("run planned"));
}
