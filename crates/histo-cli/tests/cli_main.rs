//! Basic CLI tests for the histoctl command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

mod commands;

/// Test that the CLI binary exists and lists its commands.
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("HistoCore instrument controller"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check-events"))
        .stdout(predicate::str::contains("read-rfid"))
        .stdout(predicate::str::contains("error-string"))
        .stdout(predicate::str::contains("hash-password"));
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("histoctl"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();

    // Clap's exit code for a usage error
    cmd.assert().failure().code(2);
}

#[test]
fn test_run_rejects_missing_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("run")
        .arg("--config")
        .arg(dir.path().join("missing.toml"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}
