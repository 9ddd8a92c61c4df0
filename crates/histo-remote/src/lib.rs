//! Remote side of the HistoCore instrument.
//!
//! Supervises helper processes and connects to external peers (the
//! remote-care agent, a GUI process) through an authenticated, heartbeat
//! supervised message connection.

pub mod bridge;
pub mod commands;
pub mod device;
pub mod error;
pub mod process;
pub mod protocol;
pub mod session;
pub mod transport;

pub use bridge::{REMOTE_CARE, RemoteCareBridge};
pub use commands::{CmdRemoteCareConnect, CmdRemoteCareEvent, CmdRemoteCareStatus, NotifyNetSignal};
pub use device::{NetEffect, NetInput, NetSignal, NetState, NetworkDevice, Role};
pub use error::{RemoteError, Result};
pub use process::{ExternalProcess, ProcessState};
pub use protocol::NetMessage;
pub use session::{Session, SessionConfig};
pub use transport::{LineChannel, MessageChannel};
