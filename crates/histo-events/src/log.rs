//! Event log file.
//!
//! One file per day, named `<prefix>_<serial>_<yyyymmdd>.log`. A new file
//! starts with a fixed header block, followed by one semicolon-delimited
//! line per entry:
//!
//! ```text
//! <timestamp>;<source>;<eventType>;<eventStatus>;<eventCode>;<message>
//! ```
//!
//! The logger is not shared; the event handler owns it and writes from its
//! own task.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use histo_core::config::LogConfig;

/// Timestamp format of the header and of log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One line of the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub event_type: String,
    pub status: String,
    pub code: u32,
    pub message: String,
}

impl LogEntry {
    /// Format as a log line, without the line break.
    ///
    /// Separators inside fields are replaced so the column count is fixed.
    pub fn to_line(&self) -> String {
        format!(
            "{};{};{};{};0x{:08X};{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            field(&self.source),
            field(&self.event_type),
            field(&self.status),
            self.code,
            field(&self.message)
        )
    }
}

fn field(text: &str) -> String {
    text.replace(';', ",").replace(['\r', '\n'], " ")
}

/// Header block written at the top of every log file.
pub fn file_header(
    format_version: u32,
    file_name: &str,
    created: DateTime<Utc>,
    operating_mode: &str,
    serial_number: &str,
) -> String {
    format!(
        "Format Version: {}\n\nFileName: {}\n\nTimeStamp: {}\n\nOperatingMode: {}\n\nSerial Number: {}\n\n\n",
        format_version,
        file_name,
        created.format(TIMESTAMP_FORMAT),
        operating_mode,
        serial_number
    )
}

struct OpenFile {
    day: NaiveDate,
    path: PathBuf,
    file: File,
}

/// Daily rotating event log writer.
pub struct DataLogger {
    dir: PathBuf,
    prefix: String,
    serial_number: String,
    operating_mode: String,
    format_version: u32,
    current: Option<OpenFile>,
}

impl DataLogger {
    pub fn new(
        dir: impl Into<PathBuf>,
        config: &LogConfig,
        serial_number: impl Into<String>,
        operating_mode: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: config.file_prefix.clone(),
            serial_number: serial_number.into(),
            operating_mode: operating_mode.into(),
            format_version: config.format_version,
            current: None,
        }
    }

    /// Log directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File currently written to, if any.
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }

    /// File name for entries of `day`.
    pub fn file_name(&self, day: NaiveDate) -> String {
        format!(
            "{}_{}_{}.log",
            self.prefix,
            self.serial_number,
            day.format("%Y%m%d")
        )
    }

    /// Append an entry.
    ///
    /// When the file cannot be written the line goes to the console
    /// instead, and the error is returned.
    pub fn write(&mut self, entry: &LogEntry) -> io::Result<()> {
        let line = entry.to_line();
        let result = self.append(entry.timestamp, &line);
        if let Err(e) = &result {
            tracing::error!(dir = %self.dir.display(), "Cannot write event log: {}", e);
            self.current = None;
            println!("{}", line);
        }
        result
    }

    fn append(&mut self, timestamp: DateTime<Utc>, line: &str) -> io::Result<()> {
        let day = timestamp.date_naive();
        let stale = self.current.as_ref().map_or(true, |c| c.day != day);
        if stale {
            self.current = Some(self.open(day, timestamp)?);
        }
        match self.current.as_mut() {
            Some(current) => writeln!(current.file, "{}", line),
            None => Err(io::Error::other("log file not open")),
        }
    }

    fn open(&self, day: NaiveDate, created: DateTime<Utc>) -> io::Result<OpenFile> {
        std::fs::create_dir_all(&self.dir)?;
        let name = self.file_name(day);
        let path = self.dir.join(&name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(
                file_header(
                    self.format_version,
                    &name,
                    created,
                    &self.operating_mode,
                    &self.serial_number,
                )
                .as_bytes(),
            )?;
        }
        tracing::info!(path = %path.display(), "Event log opened");
        Ok(OpenFile { day, path, file })
    }
}

impl std::fmt::Debug for DataLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLogger")
            .field("dir", &self.dir)
            .field("current", &self.current_file())
            .finish()
    }
}
