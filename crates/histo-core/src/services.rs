//! Process services constructed once at start-up and passed down.
//!
//! These replace process-wide singletons: whoever needs the adjusted
//! instrument time or a system directory receives the service explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Instrument time: UTC plus a user-adjustable offset.
///
/// Cloning shares the offset.
#[derive(Debug, Clone, Default)]
pub struct AdjustedTime {
    offset_secs: Arc<RwLock<i64>>,
}

impl AdjustedTime {
    /// Create with zero offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instrument time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(*self.offset_secs.read())
    }

    /// Offset in seconds.
    pub fn offset_secs(&self) -> i64 {
        *self.offset_secs.read()
    }

    /// Replace the offset.
    pub fn set_offset_secs(&self, offset: i64) {
        *self.offset_secs.write() = offset;
    }

    /// Adjust so that `now()` returns `target` at this moment.
    pub fn adjust_to(&self, target: DateTime<Utc>) {
        let offset = (target - Utc::now()).num_seconds();
        self.set_offset_secs(offset);
    }
}

/// Well-known directories below one installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPaths {
    root: PathBuf,
}

impl SystemPaths {
    /// Paths below `root`.
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Installation root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Settings files (event configuration, password store).
    pub fn settings_dir(&self) -> PathBuf {
        self.root.join("Settings")
    }

    /// Event and data log files.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("Logfiles")
    }

    /// Firmware images for the slave boards.
    pub fn firmware_dir(&self) -> PathBuf {
        self.root.join("Firmware")
    }

    /// Executables of external processes.
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Create every directory that does not exist yet.
    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in [
            self.settings_dir(),
            self.log_dir(),
            self.firmware_dir(),
            self.bin_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjusted_time_offset_is_shared() {
        let time = AdjustedTime::new();
        let shared = time.clone();
        time.set_offset_secs(3600);
        assert_eq!(shared.offset_secs(), 3600);

        let diff = shared.now() - Utc::now();
        assert!((diff.num_seconds() - 3600).abs() <= 1);
    }

    #[test]
    fn test_adjust_to() {
        let time = AdjustedTime::new();
        let target = Utc::now() - Duration::days(1);
        time.adjust_to(target);
        assert!((time.now() - target).num_seconds().abs() <= 1);
    }

    #[test]
    fn test_system_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SystemPaths::from_root(dir.path());
        paths.create_all().unwrap();
        assert!(paths.settings_dir().is_dir());
        assert!(paths.log_dir().ends_with("Logfiles"));
    }
}
