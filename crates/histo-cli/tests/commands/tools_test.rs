//! Tests for `error-string` and `hash-password`.

use assert_cmd::Command;
use histo_core::config::defaults;
use histo_core::password::PasswordManager;
use predicates::prelude::*;

#[test]
fn test_error_string() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("error-string").arg("0x0302");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0x0302 hardware not responding"));

    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("error-string").arg("1025");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("0x0401 timeout"));
}

#[test]
fn test_error_string_unknown_code() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("error-string").arg("0x7777");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("unknown error"));

    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("error-string").arg("door");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid error code"));
}

#[test]
fn test_hash_password() {
    let expected = PasswordManager::new(defaults::PASSWORD_SEED, "SN-0001")
        .compute_hash("Supervisor", "secret")
        .unwrap();

    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("hash-password")
        .arg("--name")
        .arg("Supervisor")
        .arg("--serial")
        .arg("SN-0001")
        .write_stdin("secret\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"serial_number\": \"SN-0001\""))
        .stdout(predicate::str::contains("\"name\": \"Supervisor\""))
        .stdout(predicate::str::contains(expected));
}

#[test]
fn test_hash_password_rejects_empty_input() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("hash-password")
        .arg("--name")
        .arg("Operator")
        .arg("--serial")
        .arg("SN-0001")
        .write_stdin("");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Empty password"));
}
