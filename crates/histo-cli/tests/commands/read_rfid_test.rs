//! Tests for the `read-rfid` command.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_read_rfid() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("read-rfid").arg("--channel").arg("2");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("channel=2 uid=0x04001234 data=0x00000001"));
}

#[test]
fn test_read_rfid_invalid_channel() {
    let mut cmd = Command::cargo_bin("histoctl").unwrap();
    cmd.arg("read-rfid").arg("--channel").arg("9");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid RFID channel 9"));
}
