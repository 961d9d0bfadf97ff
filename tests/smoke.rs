//! Smoke tests -- verify the binary runs and the offline subcommands work.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

const CONFIG: &str = r#"
[storage]
dbPath = "DB_PATH"

[[cronWorkflows]]
name = "every-five"
schedule = "*/5 * * * *"
concurrencyPolicy = "Forbid"

[[cronWorkflows]]
name = "strict"
schedule = "0 * * * *"
concurrencyPolicy = "Replace"
startingDeadlineSeconds = 30
workflowTemplate = { command = ["true"] }
"#;

fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let db = dir.path().join("runs.db");
    let path = dir.path().join("cronwarden.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.replace("DB_PATH", db.to_str().unwrap()).as_bytes())
        .unwrap();
    path
}

fn cronwarden() -> Command {
    let mut cmd = Command::cargo_bin("cronwarden").unwrap();
    cmd.env_remove("CRONWARDEN_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    cronwarden()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cron-triggered workflow controller"));
}

#[test]
fn test_cli_version() {
    cronwarden()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cronwarden"));
}

#[test]
fn test_serve_subcommand_exists() {
    cronwarden().args(["serve", "--help"]).assert().success();
}

#[test]
fn test_validate_lists_workflows() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("every-five"))
        .stdout(predicate::str::contains("Replace"))
        .stdout(predicate::str::contains("2 cron workflow(s) valid."));
}

#[test]
fn test_validate_rejects_unknown_policy() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, &CONFIG.replace("\"Forbid\"", "\"forbid\""));

    cronwarden()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid concurrency policy"));
}

#[test]
fn test_validate_rejects_bad_schedule() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, &CONFIG.replace("*/5 * * * *", "not a cron"));

    cronwarden()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("every-five"));
}

#[test]
fn test_evaluate_starts_new_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["evaluate", "--workflow", "every-five", "--at", "2024-01-01T00:07:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"action\": \"StartNewRun\""))
        .stdout(predicate::str::contains("2024-01-01T00:05:00Z"));
}

#[test]
fn test_evaluate_forbid_with_running_run_skips() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);
    let runs = dir.path().join("runs.json");
    std::fs::write(
        &runs,
        r#"[{
            "id": "6f1c2a52-6a43-4a8e-9a57-4f7f0e2d1b11",
            "specName": "every-five",
            "status": "Running",
            "startedAt": "2024-01-01T00:00:02Z",
            "finishedAt": null
        }]"#,
    )
    .unwrap();

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["evaluate", "--workflow", "every-five", "--at", "2024-01-01T00:07:00Z"])
        .arg("--runs")
        .arg(&runs)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"action\": \"SkipTick\""))
        .stdout(predicate::str::contains("ConcurrencyForbidden"));
}

#[test]
fn test_evaluate_missed_deadline() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["evaluate", "--workflow", "strict", "--at", "2024-01-01T10:05:00Z"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MissedDeadline"));
}

#[test]
fn test_evaluate_unknown_workflow_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["evaluate", "--workflow", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_history_empty_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["history", "--workflow", "strict"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded for 'strict'."));
}

#[test]
fn test_config_path_from_environment() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .env("CRONWARDEN_CONFIG", &config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("every-five"));
}

#[test]
fn test_config_load_is_logged() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);

    cronwarden()
        .env("RUST_LOG", "info")
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stderr(predicate::str::contains("Loaded configuration"));
}

#[test]
fn test_evaluate_ignores_runs_of_other_workflows() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = write_config(&dir, CONFIG);
    let runs = dir.path().join("runs.json");
    std::fs::write(
        &runs,
        r#"[{
            "id": "0b7d4f0e-3c1a-4f6e-8d52-9a1e6c2b7f30",
            "specName": "strict",
            "status": "Running",
            "startedAt": "2024-01-01T00:05:01Z"
        }]"#,
    )
    .unwrap();

    cronwarden()
        .arg("--config")
        .arg(&config)
        .args(["evaluate", "--workflow", "every-five", "--at", "2024-01-01T00:07:00Z"])
        .arg("--runs")
        .arg(&runs)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"action\": \"StartNewRun\""));
}
