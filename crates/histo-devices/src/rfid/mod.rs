//! Rack RFID read sequence.
//!
//! ```text
//!      ┌──────────┐
//!      │   Idle   │ ← ReadRackRfid(channel)
//!      └────┬─────┘
//!           │ set_channel ok
//!           ▼
//!      ┌──────────┐
//!      │SetChannel│ ← channel report
//!      └────┬─────┘
//!           │ send_login ok
//!           ▼
//!      ┌──────────┐
//!      │SendLogin │ ← login report
//!      └────┬─────┘
//!           │ read_uid ok
//!           ▼
//!      ┌──────────┐
//!      │ ReadUid  │ ← UID report
//!      └────┬─────┘
//!           │ read_user_data ok
//!           ▼
//!      ┌──────────┐
//!      │ ReadData │ ← data report: success
//!      └────┬─────┘
//!           ▼
//!         Idle
//! ```
//!
//! Any request that fails immediately, any report carrying a failure and a
//! step timeout take the machine straight back to `Idle` with one failure
//! outcome.

pub mod transceiver;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::machine::{DeviceStateMachine, Transition};
pub use transceiver::{RfidStep, RfidTransceiver, SimulatedTransceiver};

/// States of the read sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RfidState {
    Idle,
    SetChannel,
    SendLogin,
    ReadUid,
    ReadData,
}

impl RfidState {
    /// Get the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RfidState::Idle => "Idle",
            RfidState::SetChannel => "SetChannel",
            RfidState::SendLogin => "SendLogin",
            RfidState::ReadUid => "ReadUid",
            RfidState::ReadData => "ReadData",
        }
    }
}

impl fmt::Display for RfidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Asynchronous report from the transceiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfidReport {
    ChannelSet(Result<(), String>),
    LoggedIn(Result<(), String>),
    Uid(Result<u32, String>),
    UserData(Result<u32, String>),
}

impl RfidReport {
    /// State this report completes.
    pub fn answers(&self) -> RfidState {
        match self {
            RfidReport::ChannelSet(_) => RfidState::SetChannel,
            RfidReport::LoggedIn(_) => RfidState::SendLogin,
            RfidReport::Uid(_) => RfidState::ReadUid,
            RfidReport::UserData(_) => RfidState::ReadData,
        }
    }
}

/// Input of the read machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RfidInput {
    /// Start a read on an antenna channel.
    Read { channel: u8 },
    /// Hardware report.
    Report(RfidReport),
    /// The report of the current step did not arrive in time.
    Timeout,
}

/// A completed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfidReading {
    pub channel: u8,
    pub uid: u32,
    pub data: u32,
}

impl fmt::Display for RfidReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel={} uid={:#010x} data={:#010x}",
            self.channel, self.uid, self.data
        )
    }
}

/// Result of one read sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RfidOutcome {
    Success(RfidReading),
    Failure {
        channel: u8,
        /// State the sequence failed in
        state: RfidState,
        reason: String,
    },
}

impl RfidOutcome {
    /// Whether the read succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RfidOutcome::Success(_))
    }
}

/// Values collected during one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadContext {
    pub channel: u8,
    pub uid: Option<u32>,
    pub data: Option<u32>,
}

/// Read parameters fixed per installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfidParams {
    pub login_password: u32,
    pub data_address: u8,
}

/// Transition function of the read sequence.
pub fn transition(
    state: RfidState,
    input: RfidInput,
    ctx: &mut ReadContext,
    params: &RfidParams,
    hw: &mut dyn RfidTransceiver,
) -> Transition<RfidState, RfidOutcome> {
    let fail = |ctx: &ReadContext, state: RfidState, reason: String| {
        Transition::finish(
            RfidState::Idle,
            RfidOutcome::Failure {
                channel: ctx.channel,
                state,
                reason,
            },
        )
    };

    match (state, input) {
        (RfidState::Idle, RfidInput::Read { channel }) => {
            *ctx = ReadContext {
                channel,
                ..ReadContext::default()
            };
            match hw.set_channel(channel) {
                Ok(()) => Transition::to(RfidState::SetChannel),
                Err(e) => fail(ctx, RfidState::SetChannel, e.to_string()),
            }
        }
        (state, RfidInput::Read { .. }) => Transition::to(state),

        (RfidState::Idle, RfidInput::Timeout) => Transition::to(RfidState::Idle),
        (state, RfidInput::Timeout) => fail(ctx, state, format!("no report in {}", state)),

        (state, RfidInput::Report(report)) if report.answers() != state => {
            tracing::debug!(state = %state, report = ?report, "Unexpected RFID report ignored");
            Transition::to(state)
        }

        (RfidState::SetChannel, RfidInput::Report(RfidReport::ChannelSet(result))) => {
            match result.and_then(|()| hw.send_login(params.login_password).map_err(|e| e.to_string())) {
                Ok(()) => Transition::to(RfidState::SendLogin),
                Err(reason) => fail(ctx, state, reason),
            }
        }
        (RfidState::SendLogin, RfidInput::Report(RfidReport::LoggedIn(result))) => {
            match result.and_then(|()| hw.read_uid().map_err(|e| e.to_string())) {
                Ok(()) => Transition::to(RfidState::ReadUid),
                Err(reason) => fail(ctx, state, reason),
            }
        }
        (RfidState::ReadUid, RfidInput::Report(RfidReport::Uid(result))) => {
            let requested = result.and_then(|uid| {
                ctx.uid = Some(uid);
                hw.read_user_data(params.data_address)
                    .map_err(|e| e.to_string())
            });
            match requested {
                Ok(()) => Transition::to(RfidState::ReadData),
                Err(reason) => fail(ctx, state, reason),
            }
        }
        (RfidState::ReadData, RfidInput::Report(RfidReport::UserData(result))) => match result {
            Ok(data) => {
                ctx.data = Some(data);
                Transition::finish(
                    RfidState::Idle,
                    RfidOutcome::Success(RfidReading {
                        channel: ctx.channel,
                        uid: ctx.uid.unwrap_or_default(),
                        data,
                    }),
                )
            }
            Err(reason) => fail(ctx, state, reason),
        },

        // Reports always match their state after the guard above.
        (state, RfidInput::Report(_)) => Transition::to(state),
    }
}

/// Rack RFID reader: the read sequence bound to one transceiver.
#[derive(Debug)]
pub struct ReadRackRfid<T: RfidTransceiver> {
    state: RfidState,
    ctx: ReadContext,
    params: RfidParams,
    transceiver: T,
}

impl<T: RfidTransceiver> ReadRackRfid<T> {
    /// Create an idle reader.
    pub fn new(transceiver: T, params: RfidParams) -> Self {
        Self {
            state: RfidState::Idle,
            ctx: ReadContext::default(),
            params,
            transceiver,
        }
    }

    /// Start a read. Does nothing while a read is in progress.
    pub fn read(&mut self, channel: u8) -> Option<RfidOutcome> {
        self.handle(RfidInput::Read { channel })
    }

    /// Feed a hardware report.
    pub fn on_report(&mut self, report: RfidReport) -> Option<RfidOutcome> {
        self.handle(RfidInput::Report(report))
    }

    /// Abort the current step because its report is overdue.
    pub fn on_timeout(&mut self) -> Option<RfidOutcome> {
        self.handle(RfidInput::Timeout)
    }

    /// Values of the current or last read.
    pub fn context(&self) -> &ReadContext {
        &self.ctx
    }

    /// The driven transceiver.
    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    /// The driven transceiver, mutably.
    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }
}

impl<T: RfidTransceiver> DeviceStateMachine for ReadRackRfid<T> {
    type State = RfidState;
    type Input = RfidInput;
    type Outcome = RfidOutcome;

    fn state(&self) -> RfidState {
        self.state
    }

    fn is_idle(&self) -> bool {
        self.state == RfidState::Idle
    }

    fn handle(&mut self, input: RfidInput) -> Option<RfidOutcome> {
        let step = transition(
            self.state,
            input,
            &mut self.ctx,
            &self.params,
            &mut self.transceiver,
        );
        if step.next != self.state {
            tracing::debug!(from = %self.state, to = %step.next, "RFID state changed");
        }
        self.state = step.next;
        step.outcome
    }
}
