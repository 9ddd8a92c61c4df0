//! Tests for the `check-events` command.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const VALID: &str = r#"{
    "sources": [{
        "name": "DeviceControl",
        "events": [
            {
                "code": 7,
                "root_step": 1,
                "steps": [
                    {"id": 1, "type": "ACT", "action": "Check", "timeout_ms": 1000,
                     "next_on_fail": 2, "next_on_timeout": 2},
                    {"id": 2, "type": "MSG", "buttons": "OkCancel", "next_on_success": 1}
                ]
            },
            {"code": 8, "alarm_type": "Local", "error_type": "Error"}
        ]
    }]
}"#;

const DANGLING: &str = r#"{
    "sources": [{
        "name": "DeviceControl",
        "events": [
            {
                "code": 7,
                "root_step": 1,
                "steps": [{"id": 1, "type": "ACT", "action": "Check", "next_on_fail": 9}]
            }
        ]
    }]
}"#;

#[test]
fn test_check_events_valid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.json");
    fs::write(&path, VALID).unwrap();

    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("check-events").arg(&path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("2 events OK"))
        .stdout(predicate::str::contains("0x00000007"))
        .stdout(predicate::str::contains("0x00000008"));
}

#[test]
fn test_check_events_reports_problems() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.json");
    fs::write(&path, DANGLING).unwrap();

    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("check-events").arg(&path);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("continues with missing step 9"));
}

#[test]
fn test_check_events_requires_path() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("check-events");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required"))
        .stderr(predicate::str::contains("<PATH>"));
}
