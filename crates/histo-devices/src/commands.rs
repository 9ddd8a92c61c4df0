//! Commands handled by device control.

use histo_core::{CommandCodec, Result, Timeout, impl_command};
use serde::{Deserialize, Serialize};

use crate::rfid::RfidReport;

/// Read the RFID tag of the rack on an antenna channel.
///
/// Acknowledged when the read sequence finishes; the `Ok` text carries the
/// reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmdReadRackRfid {
    pub timeout: Timeout,
    pub channel: u8,
}
impl_command!(CmdReadRackRfid, "CmdReadRackRfid");

impl CmdReadRackRfid {
    pub fn new(timeout: Timeout, channel: u8) -> Self {
        Self { timeout, channel }
    }
}

/// Hardware report of the RFID transceiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRfidReport {
    pub timeout: Timeout,
    pub report: RfidReport,
}
impl_command!(NotifyRfidReport, "NotifyRfidReport", notification);

/// Deadline of an RFID step, posted locally by device control.
///
/// `step` identifies the step that armed it; a deadline for a step that
/// already completed is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyRfidStepTimeout {
    pub timeout: Timeout,
    pub step: u64,
}
impl_command!(NotifyRfidStepTimeout, "NotifyRfidStepTimeout", notification);

/// Register the device commands that cross process boundaries.
pub fn register_codec(codec: &mut CommandCodec) -> Result<()> {
    codec.register::<CmdReadRackRfid>()
}
