//! Basic CLI tests for the printprobe command-line interface.

use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

use printprobe_core::catalog::CommandCatalog;
use printprobe_core::message::{CapturedMessage, MessageTimestamp};
use printprobe_core::message_log::MessageLog;

fn printprobe(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("printprobe").unwrap();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .env_remove("PRINTPROBE_HOST")
        .env_remove("PRINTPROBE_PORT")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("printprobe").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("catalog"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("printprobe").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("printprobe"));
}

/// Clap exits with 2 when the subcommand is missing.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("printprobe").unwrap();
    cmd.assert().failure().code(2);
}

#[test]
fn test_catalog_without_file_lists_fallback() {
    let dir = tempfile::tempdir().unwrap();

    printprobe(&dir)
        .arg("catalog")
        .arg("--catalog")
        .arg("missing.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("built-in fallback"))
        .stdout(predicate::str::contains("get_status"))
        .stdout(predicate::str::contains("get_temperature"))
        .stdout(predicate::str::contains("10.0s"))
        .stdout(predicate::str::contains("[status]"));
}

#[test]
fn test_catalog_rejects_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("catalog.json"), "{ not json").unwrap();

    printprobe(&dir)
        .arg("catalog")
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed catalog"));
}

#[test]
fn test_analyze_writes_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let raw = dir.path().join("raw_messages.json");
    let at = |ms| MessageTimestamp::at(Duration::from_millis(ms));
    MessageLog::from_messages(vec![
        CapturedMessage::sent(json!({"cmd": "get_status"}).to_string().into_bytes(), at(0)),
        CapturedMessage::received(json!({"status": "ready"}).to_string().into_bytes(), at(200)),
    ])
    .save(&raw)
    .unwrap();

    printprobe(&dir)
        .arg("analyze")
        .arg("--raw")
        .arg(&raw)
        .arg("--out")
        .arg("analysis")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 pairs"))
        .stdout(predicate::str::contains("Catalog: 1 commands"));

    let catalog = CommandCatalog::load(dir.path().join("analysis/catalog.json")).unwrap();
    assert!(catalog.contains("cmd_get_status"));
    assert!(dir.path().join("analysis/analysis_report.json").exists());
}

#[test]
fn test_send_rejects_bad_override() {
    let dir = tempfile::tempdir().unwrap();

    printprobe(&dir)
        .args(["send", "get_status", "--set", "novalue"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("expected key=value"));
}
