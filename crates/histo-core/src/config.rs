//! System configuration.
//!
//! Loaded once from a TOML file at start-up; every field has a default so
//! an empty file is a valid configuration. A handful of values can be
//! overridden from the environment (see [`env_vars`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    /// Bits per command reference.
    pub const REFERENCE_WIDTH: u32 = 32;
    /// Per-direction capacity of a command channel.
    pub const CHANNEL_CAPACITY: usize = 256;
    /// Login timeout for self-initiated network connections (ms).
    pub const EP_LOGIN_TIMEOUT_MS: u64 = 30_000;
    /// Login timeout for externally initiated connections (ms).
    pub const SERVER_LOGIN_TIMEOUT_MS: u64 = 10_000;
    /// Heartbeat period (ms).
    pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
    /// Missing heartbeats for this long drop the connection (ms).
    pub const HEARTBEAT_TIMEOUT_MS: u64 = 15_000;
    /// Grace period between terminate and kill (ms).
    pub const PROCESS_TERMINATE_GRACE_MS: u64 = 3_000;
    /// Longest wait for one RFID transceiver report (ms).
    pub const RFID_STEP_TIMEOUT_MS: u64 = 2_000;
    /// Event log file format version.
    pub const LOG_FORMAT_VERSION: u32 = 1;
    /// Remote-care agent address.
    pub const REMOTE_CARE_ADDR: &str = "127.0.0.1:8501";
    /// Key of the password store digest.
    pub const PASSWORD_SEED: &[u8] = b"HistoCore-Himalaya";
}

/// Environment variable names.
pub mod env_vars {
    pub const SERIAL_NUMBER: &str = "HISTO_SERIAL_NUMBER";
    pub const LOG_DIR: &str = "HISTO_LOG_DIR";
    pub const REMOTE_CARE_ADDR: &str = "HISTO_REMOTE_CARE_ADDR";
    pub const LOG_JSON: &str = "HISTO_LOG_JSON";

    /// Whether JSON diagnostic logging is requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Event log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Overrides the log directory derived from the root directory
    pub dir: Option<PathBuf>,
    /// Log file name prefix
    pub file_prefix: String,
    /// Format version written to the file header
    pub format_version: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            file_prefix: "Events".to_string(),
            format_version: defaults::LOG_FORMAT_VERSION,
        }
    }
}

/// Remote-care bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCareConfig {
    /// Connect to the remote-care agent at start-up
    pub enabled: bool,
    /// Agent address
    pub address: String,
    /// Name sent in the login
    pub client_name: String,
    /// Secret mixed into the login digest
    pub shared_secret: String,
    /// Agent executable started by the controller, if any
    pub agent_executable: Option<PathBuf>,
    pub login_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub terminate_grace_ms: u64,
}

impl Default for RemoteCareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: defaults::REMOTE_CARE_ADDR.to_string(),
            client_name: "Himalaya".to_string(),
            shared_secret: String::new(),
            agent_executable: None,
            login_timeout_ms: defaults::EP_LOGIN_TIMEOUT_MS,
            heartbeat_interval_ms: defaults::HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: defaults::HEARTBEAT_TIMEOUT_MS,
            terminate_grace_ms: defaults::PROCESS_TERMINATE_GRACE_MS,
        }
    }
}

/// Device control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Login password of the rack RFID transponders
    pub rfid_login_password: u32,
    /// User data block read after the UID
    pub rfid_data_address: u8,
    /// Number of RFID antenna channels
    pub rfid_channel_count: u8,
    /// Longest wait for each transceiver report before the read fails (ms)
    pub rfid_step_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            rfid_login_password: 0x8000_0000,
            rfid_data_address: 0,
            rfid_channel_count: 5,
            rfid_step_timeout_ms: defaults::RFID_STEP_TIMEOUT_MS,
        }
    }
}

/// Complete system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub serial_number: String,
    pub operating_mode: String,
    /// Installation root
    pub root_dir: PathBuf,
    /// Event configuration file
    pub event_config: Option<PathBuf>,
    pub reference_width: u32,
    pub channel_capacity: usize,
    pub log: LogConfig,
    pub remote_care: RemoteCareConfig,
    pub device: DeviceConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            serial_number: "UNKNOWN".to_string(),
            operating_mode: "production".to_string(),
            root_dir: PathBuf::from("."),
            event_config: None,
            reference_width: defaults::REFERENCE_WIDTH,
            channel_capacity: defaults::CHANNEL_CAPACITY,
            log: LogConfig::default(),
            remote_care: RemoteCareConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: SystemConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(serial) = std::env::var(env_vars::SERIAL_NUMBER) {
            self.serial_number = serial;
        }
        if let Ok(dir) = std::env::var(env_vars::LOG_DIR) {
            self.log.dir = Some(PathBuf::from(dir));
        }
        if let Ok(addr) = std::env::var(env_vars::REMOTE_CARE_ADDR) {
            self.remote_care.address = addr;
        }
    }

    /// Reject values the controllers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=32).contains(&self.reference_width) {
            return Err(Error::Config(format!(
                "reference_width must be 1..=32, got {}",
                self.reference_width
            )));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be positive".into()));
        }
        if self.remote_care.login_timeout_ms == 0 {
            return Err(Error::Config("remote_care.login_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Effective log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log
            .dir
            .clone()
            .unwrap_or_else(|| self.root_dir.join("Logfiles"))
    }
}
