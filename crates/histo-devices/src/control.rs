//! Device control thread handler.
//!
//! Hosts the rack RFID reader. A read request is acknowledged once the
//! read sequence finishes; the transceiver's reports arrive on the same
//! controller as injected notification commands. Every step that waits for
//! a report arms a deadline, so a lost report fails the read instead of
//! leaving the reader busy.

use std::time::Duration;

use histo_commands::{
    ChannelEndpoint, ControllerContext, PowerFailStage, ThreadController, ThreadHandler,
};
use histo_core::config::DeviceConfig;
use histo_core::event::codes;
use histo_core::{
    Acknowledge, EventReporter, Reference, Result, StateNotification, SystemEvent, Timeout,
};

use crate::commands::{CmdReadRackRfid, NotifyRfidReport, NotifyRfidStepTimeout};
use crate::machine::DeviceStateMachine;
use crate::rfid::{
    RfidOutcome, RfidParams, RfidState, RfidTransceiver, ReadRackRfid, SimulatedTransceiver,
};

/// Controller name.
pub const DEVICE_CONTROL: &str = "DeviceControl";

/// Device name used in state notifications.
pub const RACK_RFID: &str = "RackRfid";

/// Device control state.
#[derive(Debug)]
pub struct DeviceControl<T: RfidTransceiver> {
    rfid: ReadRackRfid<T>,
    channel_count: u8,
    /// Request currently being served
    active_read: Option<Reference>,
    last_outcome: Option<RfidOutcome>,
    step_timeout: Duration,
    /// Reader state after the last transition
    state_seen: RfidState,
    /// Counts entered steps; identifies the armed deadline
    step: u64,
}

impl<T: RfidTransceiver + 'static> DeviceControl<T> {
    /// Create with the given transceiver.
    pub fn new(transceiver: T, config: &DeviceConfig) -> Self {
        let params = RfidParams {
            login_password: config.rfid_login_password,
            data_address: config.rfid_data_address,
        };
        Self {
            rfid: ReadRackRfid::new(transceiver, params),
            channel_count: config.rfid_channel_count,
            active_read: None,
            last_outcome: None,
            step_timeout: Duration::from_millis(config.rfid_step_timeout_ms),
            state_seen: RfidState::Idle,
            step: 0,
        }
    }

    /// The rack RFID reader.
    pub fn rfid(&self) -> &ReadRackRfid<T> {
        &self.rfid
    }

    /// The rack RFID reader, mutably.
    pub fn rfid_mut(&mut self) -> &mut ReadRackRfid<T> {
        &mut self.rfid
    }

    /// Outcome of the last finished read.
    pub fn last_outcome(&self) -> Option<&RfidOutcome> {
        self.last_outcome.as_ref()
    }

    /// Register the device control commands on `controller`.
    pub fn register(controller: &mut ThreadController<Self>) -> Result<()> {
        controller.register_command_for_processing(Self::on_read_rack_rfid)?;
        // Reports must keep flowing in power-fail so a running read ends.
        controller.register_critical_command_for_processing(Self::on_rfid_report)?;
        controller.register_critical_command_for_processing(Self::on_step_timeout)?;
        Ok(())
    }

    fn on_read_rack_rfid(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        cmd: CmdReadRackRfid,
    ) -> Result<()> {
        if self.active_read.is_some() || !self.rfid.is_idle() {
            return ctx.send_ack(reference, Acknowledge::nok("RFID reader busy"));
        }
        if cmd.channel >= self.channel_count {
            return ctx.send_ack(
                reference,
                Acknowledge::nok(format!("invalid RFID channel {}", cmd.channel)),
            );
        }

        tracing::info!(channel = cmd.channel, reference = %reference, "Reading rack RFID");
        self.active_read = Some(reference);
        let outcome = self.rfid.read(cmd.channel);
        self.after_transition(ctx, outcome)
    }

    fn on_rfid_report(
        &mut self,
        ctx: &mut ControllerContext,
        _reference: Reference,
        cmd: NotifyRfidReport,
    ) -> Result<()> {
        let outcome = self.rfid.on_report(cmd.report);
        self.after_transition(ctx, outcome)
    }

    fn on_step_timeout(
        &mut self,
        ctx: &mut ControllerContext,
        _reference: Reference,
        cmd: NotifyRfidStepTimeout,
    ) -> Result<()> {
        if cmd.step != self.step || self.rfid.is_idle() {
            return Ok(());
        }
        tracing::warn!(state = %self.rfid.state(), "RFID report overdue");
        let outcome = self.rfid.on_timeout();
        self.after_transition(ctx, outcome)
    }

    /// Post a deadline for the step just entered.
    fn arm_step_timeout(&self, ctx: &ControllerContext) {
        let local = ctx.local_sender();
        let step = self.step;
        let delay = self.step_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The controller may be gone by now.
            let _ = local.post(NotifyRfidStepTimeout {
                timeout: Timeout::NONE,
                step,
            });
        });
    }

    fn after_transition(
        &mut self,
        ctx: &mut ControllerContext,
        outcome: Option<RfidOutcome>,
    ) -> Result<()> {
        let state = self.rfid.state();
        if state != self.state_seen {
            self.state_seen = state;
            self.step += 1;
            if !self.rfid.is_idle() {
                self.arm_step_timeout(ctx);
            }
        }
        ctx.notify(StateNotification::DeviceState {
            device: RACK_RFID.to_string(),
            state: state.to_string(),
        });
        let Some(outcome) = outcome else {
            return Ok(());
        };

        let reference = self.active_read.take().unwrap_or(Reference::INVALID);
        let ack = match &outcome {
            RfidOutcome::Success(reading) => {
                tracing::info!(%reading, "Rack RFID read");
                Acknowledge::ok_with(reading.to_string())
            }
            RfidOutcome::Failure {
                channel,
                state,
                reason,
            } => {
                tracing::warn!(channel, state = %state, reason = %reason, "Rack RFID read failed");
                ctx.raise_event(SystemEvent::new(codes::HARDWARE_ERROR).with_args(vec![
                    format!("rack RFID channel {} failed in {}: {}", channel, state, reason),
                    RACK_RFID.to_string(),
                ]));
                Acknowledge::nok(reason.clone())
            }
        };
        self.last_outcome = Some(outcome);
        ctx.send_ack(reference, ack)
    }
}

impl<T: RfidTransceiver + 'static> ThreadHandler for DeviceControl<T> {
    fn on_go(&mut self, ctx: &mut ControllerContext) {
        ctx.notify(StateNotification::DeviceState {
            device: RACK_RFID.to_string(),
            state: self.rfid.state().to_string(),
        });
    }

    fn on_power_fail(&mut self, _ctx: &mut ControllerContext, stage: PowerFailStage) {
        tracing::info!(stage = ?stage, busy = self.active_read.is_some(), "Device control power fail");
    }

    fn on_stop(&mut self, ctx: &mut ControllerContext) {
        if let Some(reference) = self.active_read.take() {
            if let Err(e) = ctx.send_ack(reference, Acknowledge::nok("device control stopped")) {
                tracing::warn!(reference = %reference, "Failed to answer pending RFID read: {}", e);
                ctx.events().report_error(&e);
            }
        }
    }
}

/// Build a device control controller backed by a simulated transceiver.
pub fn simulated_device_control(
    endpoint: ChannelEndpoint,
    events: EventReporter,
    config: &DeviceConfig,
    transceiver: SimulatedTransceiver,
) -> Result<ThreadController<DeviceControl<SimulatedTransceiver>>> {
    let mut controller = ThreadController::new(
        DEVICE_CONTROL,
        DeviceControl::new(transceiver, config),
        endpoint,
        events,
    );
    let local = controller.local_sender();
    controller
        .handler_mut()
        .rfid_mut()
        .transceiver_mut()
        .attach(local);
    DeviceControl::register(&mut controller)?;
    Ok(controller)
}
