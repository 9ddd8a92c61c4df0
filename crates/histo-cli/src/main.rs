//! Command-line interface for the HistoCore instrument controller.

mod console;
mod system;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use histo_commands::{CommandChannel, CommandRouter};
use histo_core::config::{defaults, env_vars};
use histo_core::password::{PasswordEntry, PasswordManager, PasswordStore};
use histo_core::{AdjustedTime, EventReporter, SystemConfig, SystemPaths, Timeout};
use histo_devices::{CmdReadRackRfid, DEVICE_CONTROL, SimulatedTransceiver, simulated_device_control};
use histo_events::EventCatalog;
use histo_hal::ErrorCode;

use crate::system::{SIM_TAG_DATA, SIM_TAG_UID, System};

/// HistoCore instrument controller.
#[derive(Parser, Debug)]
#[command(name = "histoctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the controllers and run until Ctrl-C or SIGTERM.
    Run {
        /// System configuration file (TOML).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Event configuration file (JSON or TOML).
        #[arg(short, long)]
        events: Option<PathBuf>,
    },
    /// Load and validate an event configuration.
    CheckEvents {
        /// Path to the event configuration.
        #[arg(required = true)]
        path: PathBuf,
    },
    /// Read a rack RFID tag with the simulated reader.
    ReadRfid {
        /// Antenna channel.
        #[arg(long)]
        channel: u8,
        /// Read timeout in milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u32,
    },
    /// Print the description of a firmware error code.
    ErrorString {
        /// Code, decimal or 0x-prefixed hex.
        code: String,
    },
    /// Print a password store entry for a password read from stdin.
    HashPassword {
        /// User level name.
        #[arg(long)]
        name: String,
        /// Instrument serial number the store belongs to.
        #[arg(long)]
        serial: String,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n=== PANIC ===");
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        } else {
            eprintln!("Location: <unknown>");
        }
        eprintln!("Message: {}", panic_info);
        eprintln!("==============\n");
    }));

    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("histo=info"));

    // Logs go to stderr; stdout carries command output.
    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    match args.command {
        Command::Run { config, events } => run(config, events).await,
        Command::CheckEvents { path } => check_events(path),
        Command::ReadRfid { channel, timeout_ms } => read_rfid(channel, timeout_ms).await,
        Command::ErrorString { code } => error_string(&code),
        Command::HashPassword { name, serial } => hash_password(&name, &serial),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<SystemConfig> {
    match path {
        Some(path) => Ok(SystemConfig::load(path)?),
        None => Ok(SystemConfig::from_env()),
    }
}

/// Run the controllers until Ctrl-C or SIGTERM.
async fn run(config: Option<PathBuf>, events: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let paths = SystemPaths::from_root(&config.root_dir);
    let default_events = paths.settings_dir().join("EventConfig.json");
    let events = events
        .or_else(|| config.event_config.clone())
        .or_else(|| default_events.is_file().then_some(default_events));
    let catalog = match events {
        Some(path) => EventCatalog::load(&path)
            .with_context(|| format!("Invalid event configuration {}", path.display()))?,
        None => {
            tracing::warn!("No event configuration, events are only logged");
            EventCatalog::default()
        }
    };

    tracing::info!(
        serial = %config.serial_number,
        mode = %config.operating_mode,
        log_dir = %config.log_dir().display(),
        "Starting HistoCore controller"
    );
    let system = System::start(&config, catalog, AdjustedTime::new())?;

    shutdown_signal().await?;
    tracing::info!("Shutting down");
    system.shutdown().await
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate()).context("Cannot listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Cannot listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Cannot listen for Ctrl-C")?;
    Ok(())
}

fn check_events(path: PathBuf) -> Result<()> {
    let catalog = EventCatalog::load(&path)
        .with_context(|| format!("Invalid event configuration {}", path.display()))?;
    println!("{}: {} events OK", path.display(), catalog.len());
    for code in catalog.codes() {
        println!("  0x{:08X}", code);
    }
    Ok(())
}

/// One read through the router, answered by the simulated transceiver.
async fn read_rfid(channel: u8, timeout_ms: u32) -> Result<()> {
    let config = SystemConfig::from_env();
    let events = EventReporter::detached();
    let mut router = CommandRouter::new(events.clone());
    let (end, master) = CommandChannel::pair(DEVICE_CONTROL, "master", config.channel_capacity);
    let port = router.add_port(master);
    router.route::<CmdReadRackRfid>(port)?;

    let devices = simulated_device_control(
        end,
        events,
        &config.device,
        SimulatedTransceiver::new(SIM_TAG_UID, SIM_TAG_DATA),
    )?;
    let (router, router_task) = router.spawn();
    let (controller, controller_task) = devices.spawn();
    controller.go();

    let result = router
        .request(Box::new(CmdReadRackRfid::new(Timeout(timeout_ms), channel)))
        .await;

    controller.stop();
    let _ = controller_task.await;
    router.shutdown();
    let _ = router_task.await;

    let ack = result?;
    let text = ack.text.clone().unwrap_or_default();
    if !ack.is_ok() {
        bail!("RFID read failed: {}", text);
    }
    println!("{}", text);
    Ok(())
}

fn parse_code(text: &str) -> Result<u16> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| anyhow!("Invalid error code '{}'", text))
}

fn error_string(code: &str) -> Result<()> {
    let code = ErrorCode(parse_code(code)?);
    println!("{}", code);
    Ok(())
}

fn hash_password(name: &str, serial: &str) -> Result<()> {
    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("Cannot read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        bail!("Empty password");
    }

    let manager = PasswordManager::new(defaults::PASSWORD_SEED, serial);
    let hash = manager
        .compute_hash(name, password)
        .ok_or_else(|| anyhow!("Cannot compute password digest"))?;
    let store = PasswordStore {
        serial_number: serial.to_string(),
        entries: vec![PasswordEntry {
            name: name.to_string(),
            hash,
        }],
    };
    println!("{}", serde_json::to_string_pretty(&store)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("0x0302").unwrap(), 0x0302);
        assert_eq!(parse_code("0X10").unwrap(), 0x10);
        assert_eq!(parse_code("513").unwrap(), 0x0201);
        assert!(parse_code("0xzz").is_err());
        assert!(parse_code("70000").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["histoctl", "read-rfid", "--channel", "2"]).unwrap();
        assert!(matches!(
            args.command,
            Command::ReadRfid {
                channel: 2,
                timeout_ms: 5000
            }
        ));
        assert!(Args::try_parse_from(["histoctl", "read-rfid"]).is_err());
    }
}
