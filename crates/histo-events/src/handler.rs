//! Event handler thread handler.
//!
//! Owns the [`EventActionHub`] and the event log. Raised events arrive on
//! the [`EventReporter`](histo_core::EventReporter) channel and are pumped
//! into the controller as [`NotifySystemEvent`]s, so they are processed on
//! the controller's task like every other command. ACT and MSG steps go to
//! the master as commands; their acknowledges or timeouts become the step
//! results.

use std::collections::{HashMap, VecDeque};

use histo_commands::{ControllerContext, ThreadController, ThreadHandler};
use histo_core::{
    ActionResult, Acknowledge, Command, EventKey, Reference, Result, StateNotification,
    SystemEvent, Timeout,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::{CmdEventAction, CmdShowEventMessage, NotifyEventInfo, NotifySystemEvent};
use crate::hub::{EventActionHub, HubEffect};
use crate::log::DataLogger;

/// Controller name.
pub const EVENT_HANDLER: &str = "EventHandler";

/// Event handler state.
pub struct EventHandler {
    hub: EventActionHub,
    logger: Option<DataLogger>,
    events: Option<mpsc::UnboundedReceiver<SystemEvent>>,
    pump: Option<JoinHandle<()>>,
    /// Step commands waiting for their acknowledge
    outstanding: HashMap<Reference, EventKey>,
}

impl EventHandler {
    /// Handler consuming the events sent to `events`.
    pub fn new(hub: EventActionHub, events: mpsc::UnboundedReceiver<SystemEvent>) -> Self {
        Self {
            hub,
            logger: None,
            events: Some(events),
            pump: None,
            outstanding: HashMap::new(),
        }
    }

    /// Write log entries to `logger` instead of the diagnostic log.
    pub fn with_logger(mut self, logger: DataLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn hub(&self) -> &EventActionHub {
        &self.hub
    }

    /// Step commands waiting for their acknowledge.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Register the event handler commands on `controller`.
    pub fn register(controller: &mut ThreadController<Self>) -> Result<()> {
        // Events are processed in power-fail mode too.
        controller.register_critical_command_for_processing(Self::on_event)
    }

    fn on_event(
        &mut self,
        ctx: &mut ControllerContext,
        _reference: Reference,
        cmd: NotifySystemEvent,
    ) -> Result<()> {
        let effects = self.hub.process_event(cmd.event);
        self.apply(ctx, effects);
        Ok(())
    }

    fn apply(&mut self, ctx: &mut ControllerContext, effects: Vec<HubEffect>) {
        let mut queue: VecDeque<HubEffect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                HubEffect::Log(entry) => match &mut self.logger {
                    Some(logger) => {
                        // The logger falls back to the console itself.
                        let _ = logger.write(&entry);
                    }
                    None => tracing::info!(target: "histo_events::log", "{}", entry.to_line()),
                },
                HubEffect::Inform {
                    key,
                    event_id,
                    error_type,
                    text,
                } => {
                    let notice = NotifyEventInfo {
                        timeout: Timeout::NONE,
                        key,
                        event_id,
                        error_type,
                        text,
                    };
                    if let Err(e) = ctx.send(notice) {
                        tracing::warn!(key = %key, "Cannot inform GUI: {}", e);
                    }
                }
                HubEffect::ShowMessage {
                    key,
                    event_id,
                    text,
                    buttons,
                    timeout,
                    ..
                } => {
                    let cmd = CmdShowEventMessage {
                        timeout,
                        key,
                        event_id,
                        text,
                        buttons,
                    };
                    queue.extend(self.send_step(ctx, key, Box::new(cmd)));
                }
                HubEffect::Forward {
                    key,
                    event_id,
                    step,
                    source,
                    action,
                    timeout,
                } => {
                    let cmd = CmdEventAction {
                        timeout,
                        key,
                        event_id,
                        step,
                        source,
                        action,
                    };
                    queue.extend(self.send_step(ctx, key, Box::new(cmd)));
                }
                HubEffect::Alarm {
                    event_id, active, ..
                } => {
                    tracing::info!(event_id, active, "Alarm changed");
                    ctx.notify(StateNotification::Alarm { event_id, active });
                }
                HubEffect::Completed {
                    key,
                    event_id,
                    cancelled,
                } => {
                    self.outstanding.retain(|_, k| *k != key);
                    tracing::debug!(key = %key, event_id, cancelled, "Event sequence done");
                }
            }
        }
    }

    /// Send a step command; a send failure fails the step.
    fn send_step(
        &mut self,
        ctx: &mut ControllerContext,
        key: EventKey,
        cmd: Box<dyn Command>,
    ) -> Vec<HubEffect> {
        match ctx.send_command(cmd) {
            Ok(reference) => {
                self.outstanding.insert(reference, key);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(key = %key, "Cannot send step command: {}", e);
                self.hub.step_result(key, ActionResult::Fail)
            }
        }
    }

    fn step_finished(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        result: ActionResult,
    ) {
        let Some(key) = self.outstanding.remove(&reference) else {
            return;
        };
        let effects = self.hub.step_result(key, result);
        self.apply(ctx, effects);
    }
}

impl ThreadHandler for EventHandler {
    fn on_go(&mut self, ctx: &mut ControllerContext) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        let local = ctx.local_sender();
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !local.post(NotifySystemEvent::new(event)) {
                    break;
                }
            }
        }));
        tracing::info!(events = self.hub.catalog().len(), "Event handler started");
    }

    fn on_stop(&mut self, _ctx: &mut ControllerContext) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.hub.running() > 0 {
            tracing::warn!(running = self.hub.running(), "Stopped with running action sequences");
        }
    }

    fn on_acknowledge(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        _command: &'static str,
        ack: Acknowledge,
    ) {
        let result = if ack.is_ok() {
            ActionResult::Success
        } else {
            ActionResult::Fail
        };
        self.step_finished(ctx, reference, result);
    }

    fn on_ack_timeout(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        _command: &'static str,
    ) {
        self.step_finished(ctx, reference, ActionResult::Timeout);
    }
}
