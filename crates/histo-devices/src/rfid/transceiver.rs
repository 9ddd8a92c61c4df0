//! RFID transceiver driver contract and a simulated transceiver.

use std::collections::VecDeque;

use histo_commands::LocalSender;
use histo_core::Timeout;

use super::{RfidReport, RfidState};
use crate::commands::NotifyRfidReport;
use crate::error::{DeviceError, Result};

/// Driver of an RFID transceiver.
///
/// Each request returns as soon as the hardware accepted it. Completion is
/// reported later as an [`RfidReport`].
pub trait RfidTransceiver: Send {
    fn set_channel(&mut self, channel: u8) -> Result<()>;
    fn send_login(&mut self, password: u32) -> Result<()>;
    fn read_uid(&mut self) -> Result<()>;
    fn read_user_data(&mut self, address: u8) -> Result<()>;
}

/// Hardware request of the read sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RfidStep {
    SetChannel,
    SendLogin,
    ReadUid,
    ReadData,
}

impl RfidStep {
    /// State waiting for this request's report.
    pub fn state(&self) -> RfidState {
        match self {
            RfidStep::SetChannel => RfidState::SetChannel,
            RfidStep::SendLogin => RfidState::SendLogin,
            RfidStep::ReadUid => RfidState::ReadUid,
            RfidStep::ReadData => RfidState::ReadData,
        }
    }
}

/// Transceiver that answers every request with a scripted report.
///
/// Reports are posted to the attached controller as [`NotifyRfidReport`]
/// commands, or queued for [`SimulatedTransceiver::take_report`] when no
/// controller is attached.
#[derive(Debug)]
pub struct SimulatedTransceiver {
    uid: u32,
    data: u32,
    fail_request: Option<RfidStep>,
    fail_report: Option<RfidStep>,
    last_password: Option<u32>,
    outbox: VecDeque<RfidReport>,
    local: Option<LocalSender>,
}

impl SimulatedTransceiver {
    /// Transceiver reading `uid` and `data` from every tag.
    pub fn new(uid: u32, data: u32) -> Self {
        Self {
            uid,
            data,
            fail_request: None,
            fail_report: None,
            last_password: None,
            outbox: VecDeque::new(),
            local: None,
        }
    }

    /// Post reports to a controller.
    pub fn attach(&mut self, local: LocalSender) {
        self.local = Some(local);
    }

    /// Make `step`'s request fail immediately.
    pub fn fail_request(&mut self, step: RfidStep) {
        self.fail_request = Some(step);
    }

    /// Make `step`'s report carry a failure.
    pub fn fail_report(&mut self, step: RfidStep) {
        self.fail_report = Some(step);
    }

    /// Clear scripted failures.
    pub fn clear_failures(&mut self) {
        self.fail_request = None;
        self.fail_report = None;
    }

    /// Change the tag contents.
    pub fn set_tag(&mut self, uid: u32, data: u32) {
        self.uid = uid;
        self.data = data;
    }

    /// Oldest queued report.
    pub fn take_report(&mut self) -> Option<RfidReport> {
        self.outbox.pop_front()
    }

    /// Password of the last login request.
    pub fn last_password(&self) -> Option<u32> {
        self.last_password
    }

    fn request(&mut self, step: RfidStep, ok: RfidReport, failed: RfidReport) -> Result<()> {
        if self.fail_request == Some(step) {
            return Err(DeviceError::Hardware(format!("{:?} request rejected", step)));
        }
        let report = if self.fail_report == Some(step) { failed } else { ok };
        match &self.local {
            Some(local) => {
                let posted = local.post(NotifyRfidReport {
                    timeout: Timeout::NONE,
                    report,
                });
                if !posted {
                    return Err(DeviceError::NotConnected("rfid".into()));
                }
            }
            None => self.outbox.push_back(report),
        }
        Ok(())
    }
}

impl RfidTransceiver for SimulatedTransceiver {
    fn set_channel(&mut self, _channel: u8) -> Result<()> {
        self.request(
            RfidStep::SetChannel,
            RfidReport::ChannelSet(Ok(())),
            RfidReport::ChannelSet(Err("no antenna".into())),
        )
    }

    fn send_login(&mut self, password: u32) -> Result<()> {
        self.last_password = Some(password);
        self.request(
            RfidStep::SendLogin,
            RfidReport::LoggedIn(Ok(())),
            RfidReport::LoggedIn(Err("login refused".into())),
        )
    }

    fn read_uid(&mut self) -> Result<()> {
        let uid = self.uid;
        self.request(
            RfidStep::ReadUid,
            RfidReport::Uid(Ok(uid)),
            RfidReport::Uid(Err("no tag".into())),
        )
    }

    fn read_user_data(&mut self, _address: u8) -> Result<()> {
        let data = self.data;
        self.request(
            RfidStep::ReadData,
            RfidReport::UserData(Ok(data)),
            RfidReport::UserData(Err("read error".into())),
        )
    }
}
