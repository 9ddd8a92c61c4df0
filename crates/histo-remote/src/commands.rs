//! Commands handled by the remote-care bridge.

use histo_core::{CommandCodec, Result, Timeout, impl_command};
use serde::{Deserialize, Serialize};

use crate::device::NetSignal;

/// Open the connection to the remote-care agent.
///
/// Acknowledged once the attempt has started; the outcome arrives as
/// network state notifications and, on failure, a system event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdRemoteCareConnect {
    pub timeout: Timeout,
}
impl_command!(CmdRemoteCareConnect, "CmdRemoteCareConnect");

/// Report an instrument event to the remote-care service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdRemoteCareEvent {
    pub timeout: Timeout,
    pub event_id: u32,
    pub active: bool,
    pub text: String,
}
impl_command!(CmdRemoteCareEvent, "CmdRemoteCareEvent");

/// Ask the instrument for its state. Sent by the remote-care agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdRemoteCareStatus {
    pub timeout: Timeout,
}
impl_command!(CmdRemoteCareStatus, "CmdRemoteCareStatus");

/// Signal of the bridge's network session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyNetSignal {
    pub timeout: Timeout,
    pub signal: NetSignal,
}
impl_command!(NotifyNetSignal, "NotifyNetSignal", notification);

impl NotifyNetSignal {
    pub fn new(signal: NetSignal) -> Self {
        Self {
            timeout: Timeout::NONE,
            signal,
        }
    }
}

/// Register the commands exchanged with the remote-care agent.
pub fn register_codec(codec: &mut CommandCodec) -> Result<()> {
    codec.register::<CmdRemoteCareEvent>()?;
    codec.register::<CmdRemoteCareStatus>()?;
    Ok(())
}
