//! Event log file tests.

use chrono::{TimeZone, Utc};
use histo_core::config::LogConfig;
use histo_events::{DataLogger, EventCatalog, EventConfigError, LogEntry};

fn entry(day: u32, code: u32) -> LogEntry {
    LogEntry {
        timestamp: Utc.with_ymd_and_hms(2026, 5, day, 8, 30, 0).unwrap(),
        source: "DeviceControl".into(),
        event_type: "Error".into(),
        status: "Active".into(),
        code,
        message: format!("event {}", code),
    }
}

fn logger(dir: &std::path::Path) -> DataLogger {
    DataLogger::new(dir, &LogConfig::default(), "HIM-4711", "production")
}

#[test]
fn test_daily_files_with_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut logger = logger(dir.path());

    logger.write(&entry(1, 1)).unwrap();
    logger.write(&entry(1, 2)).unwrap();
    logger.write(&entry(2, 3)).unwrap();

    let first = std::fs::read_to_string(dir.path().join("Events_HIM-4711_20260501.log")).unwrap();
    let lines: Vec<&str> = first.lines().collect();
    assert_eq!(lines.len(), 13);
    assert_eq!(lines[0], "Format Version: 1");
    assert_eq!(lines[2], "FileName: Events_HIM-4711_20260501.log");
    assert_eq!(lines[8], "Serial Number: HIM-4711");
    assert_eq!(
        lines[11],
        "2026-05-01 08:30:00.000;DeviceControl;Error;Active;0x00000001;event 1"
    );
    assert!(lines[12].ends_with(";event 2"));

    let second = std::fs::read_to_string(dir.path().join("Events_HIM-4711_20260502.log")).unwrap();
    assert_eq!(second.lines().count(), 12);
    assert_eq!(
        logger.current_file(),
        Some(dir.path().join("Events_HIM-4711_20260502.log").as_path())
    );
}

#[test]
fn test_reopened_file_gets_no_second_header() {
    let dir = tempfile::tempdir().unwrap();
    logger(dir.path()).write(&entry(3, 1)).unwrap();
    logger(dir.path()).write(&entry(3, 2)).unwrap();

    let text = std::fs::read_to_string(dir.path().join("Events_HIM-4711_20260503.log")).unwrap();
    assert_eq!(text.matches("Format Version").count(), 1);
    assert_eq!(text.lines().count(), 13);
}

#[test]
fn test_unwritable_directory_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let mut logger = logger(&blocker);
    assert!(logger.write(&entry(1, 1)).is_err());
    assert!(logger.current_file().is_none());
}

#[test]
fn test_load_catalog_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.toml");
    std::fs::write(
        &path,
        r#"
        [[sources]]
        name = "RemoteCare"

        [[sources.events]]
        code = 131074
        error_type = "Warning"
        "#,
    )
    .unwrap();

    let catalog = EventCatalog::load(&path).unwrap();
    assert_eq!(catalog.codes(), vec![131_074]);
    assert_eq!(catalog.get(131_074).unwrap().source, "RemoteCare");

    let missing = EventCatalog::load(dir.path().join("missing.json")).unwrap_err();
    assert!(matches!(missing, EventConfigError::Io { .. }));
}

#[test]
fn test_invalid_catalog_lists_every_problem() {
    let err = EventCatalog::from_json(
        r#"{"sources": [{"name": "X", "events": [
            {"code": 1, "root_step": 3},
            {"code": 2, "root_step": 1, "steps": [
                {"id": 1, "type": "ACT", "next_on_fail": 1}
            ]}
        ]}]}"#,
    )
    .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("2 configuration problem(s)"), "{}", text);
    assert!(text.contains("event 1: root step 3 does not exist"));
    assert!(text.contains("event 2: steps 1 -> 1 loop without a MSG step"));
}
