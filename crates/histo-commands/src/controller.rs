//! Thread controller: one task per subsystem, one channel, one handler table.
//!
//! A [`ThreadController`] owns its handler state, its channel endpoint and
//! the bookkeeping for the commands it sends. Handlers run to completion
//! one at a time on the controller's task; nothing outside the task touches
//! the state. Lifecycle is driven through a [`ControllerHandle`].
//!
//! Failures never escape the loop. A handler `Err` or panic is turned into
//! a raised [`SystemEvent`], the sender of the offending command gets a
//! `Nok` acknowledge and the controller carries on with the next message.

use std::panic::{AssertUnwindSafe, catch_unwind};

use histo_core::{
    Acknowledge, Command, Error, EventReporter, NamedCommand, NotificationBus, Reference,
    ReferenceManager, Result, StateNotification, SystemEvent, event::codes,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChannelEndpoint, ChannelReceiver, ChannelSender, Inbound};
use crate::pending::PendingCommands;
use crate::registry::FunctorRegistry;

/// Power-fail stages signalled by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerFailStage {
    /// Mains lost, running on buffer power.
    Stage1,
    /// Shutdown imminent.
    Stage2,
    /// Power restored.
    Revert,
}

/// Operating mode of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControllerMode {
    /// Created, waiting for `Go`.
    Initialized,
    /// Dispatching every registered command.
    Active,
    /// Dispatching critical commands only.
    PowerFail(PowerFailStage),
    /// Draining queued commands after `Stop`.
    Stopping,
    /// Loop finished.
    Stopped,
}

impl ControllerMode {
    /// Get the mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerMode::Initialized => "initialized",
            ControllerMode::Active => "active",
            ControllerMode::PowerFail(PowerFailStage::Stage1) => "power_fail_1",
            ControllerMode::PowerFail(PowerFailStage::Stage2) => "power_fail_2",
            ControllerMode::PowerFail(PowerFailStage::Revert) => "active",
            ControllerMode::Stopping => "stopping",
            ControllerMode::Stopped => "stopped",
        }
    }
}

/// Lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Go,
    Stop,
    PowerFail(PowerFailStage),
}

/// Subsystem behaviour hosted by a [`ThreadController`].
///
/// Every hook has a no-op default.
pub trait ThreadHandler: Send + 'static {
    /// Controller switched to active operation.
    fn on_go(&mut self, _ctx: &mut ControllerContext) {}

    /// Queued commands are drained; the controller exits after this.
    fn on_stop(&mut self, _ctx: &mut ControllerContext) {}

    /// Power-fail stage changed.
    fn on_power_fail(&mut self, _ctx: &mut ControllerContext, _stage: PowerFailStage) {}

    /// An acknowledge for a command sent through the context arrived.
    fn on_acknowledge(
        &mut self,
        _ctx: &mut ControllerContext,
        _reference: Reference,
        _command: &'static str,
        _ack: Acknowledge,
    ) {
    }

    /// A command sent through the context was not acknowledged in time.
    fn on_ack_timeout(
        &mut self,
        _ctx: &mut ControllerContext,
        _reference: Reference,
        _command: &'static str,
    ) {
    }
}

/// Sender for in-task injection of commands.
///
/// Hardware drivers use it to post their asynchronous reports back onto the
/// controller that owns them. Injected commands are dispatched like inbound
/// ones, with [`Reference::INVALID`].
#[derive(Debug, Clone)]
pub struct LocalSender {
    tx: mpsc::UnboundedSender<Box<dyn Command>>,
}

impl LocalSender {
    /// Post a command. Returns `false` once the controller is gone.
    pub fn post<C: Command>(&self, cmd: C) -> bool {
        self.post_boxed(Box::new(cmd))
    }

    /// Post a boxed command.
    pub fn post_boxed(&self, cmd: Box<dyn Command>) -> bool {
        self.tx.send(cmd).is_ok()
    }
}

/// Everything a handler may use besides its own state.
pub struct ControllerContext {
    name: String,
    sender: ChannelSender,
    refs: ReferenceManager,
    pending: PendingCommands,
    events: EventReporter,
    notifications: Option<NotificationBus>,
    local_tx: mpsc::UnboundedSender<Box<dyn Command>>,
    mode: ControllerMode,
}

impl ControllerContext {
    /// Create a context sending through `sender`.
    pub fn new(name: impl Into<String>, sender: ChannelSender, events: EventReporter) -> Self {
        Self::with_local_channel(name, sender, events).0
    }

    fn with_local_channel(
        name: impl Into<String>,
        sender: ChannelSender,
        events: EventReporter,
    ) -> (Self, mpsc::UnboundedReceiver<Box<dyn Command>>) {
        let name = name.into();
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let ctx = Self {
            events: events.for_source(name.clone()),
            name,
            sender,
            refs: ReferenceManager::new(),
            pending: PendingCommands::new(),
            notifications: None,
            local_tx,
            mode: ControllerMode::Initialized,
        };
        (ctx, local_rx)
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current operating mode.
    pub fn mode(&self) -> ControllerMode {
        self.mode
    }

    /// Send a command to the peer.
    ///
    /// A fresh reference is blocked for the command. Unless the command is a
    /// notification, the reference stays blocked until the acknowledge
    /// arrives or, for commands with a timeout, the deadline passes.
    pub fn send_command(&mut self, cmd: Box<dyn Command>) -> Result<Reference> {
        let name = cmd.name();
        let timeout = cmd.timeout();
        let notification = cmd.is_notification();
        if notification && !timeout.is_none() {
            return Err(Error::TimeoutNotAllowed(name.to_string()));
        }

        let reference = self.refs.get_new_ref()?;
        if let Err(e) = self.sender.send_command(reference, cmd) {
            self.refs.unblock_reference(reference);
            return Err(e.into());
        }

        if notification {
            self.refs.unblock_reference(reference);
        } else {
            self.pending.register(reference, name, timeout, Instant::now());
        }
        tracing::debug!(
            controller = %self.name,
            command = name,
            reference = %reference,
            timeout = %timeout,
            "Command sent"
        );
        Ok(reference)
    }

    /// Send a concrete command to the peer.
    pub fn send<C: Command>(&mut self, cmd: C) -> Result<Reference> {
        self.send_command(Box::new(cmd))
    }

    /// Acknowledge a command received with `reference`.
    ///
    /// Commands that were injected locally carry no reference; their
    /// acknowledges are dropped.
    pub fn send_ack(&self, reference: Reference, ack: Acknowledge) -> Result<()> {
        if !reference.is_valid() {
            return Ok(());
        }
        self.sender.send_ack(reference, ack).map_err(Into::into)
    }

    /// Raise a system event.
    pub fn raise_event(&self, event: SystemEvent) {
        self.events.report(event);
    }

    /// Event reporter of this controller.
    pub fn events(&self) -> &EventReporter {
        &self.events
    }

    /// Sender for local command injection.
    pub fn local_sender(&self) -> LocalSender {
        LocalSender {
            tx: self.local_tx.clone(),
        }
    }

    /// Publish a state change, if a notification bus is attached.
    pub fn notify(&self, notification: StateNotification) {
        if let Some(bus) = &self.notifications {
            bus.publish(notification);
        }
    }

    /// Number of commands awaiting their acknowledge.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `reference` is awaiting its acknowledge.
    pub fn is_pending(&self, reference: Reference) -> bool {
        self.pending.contains(reference)
    }

    fn set_mode(&mut self, mode: ControllerMode) {
        if self.mode == mode {
            return;
        }
        tracing::info!(
            controller = %self.name,
            from = self.mode.as_str(),
            to = mode.as_str(),
            "Controller mode changed"
        );
        self.mode = mode;
        self.notify(StateNotification::ControllerMode {
            controller: self.name.clone(),
            mode: mode.as_str().to_string(),
        });
    }
}

impl std::fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerContext")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Lifecycle handle of a spawned controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    name: String,
    tx: mpsc::UnboundedSender<ControlSignal>,
}

impl ControllerHandle {
    /// Controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start active operation.
    pub fn go(&self) -> bool {
        self.signal(ControlSignal::Go)
    }

    /// Drain and exit.
    pub fn stop(&self) -> bool {
        self.signal(ControlSignal::Stop)
    }

    /// Enter or leave power-fail mode.
    pub fn power_fail(&self, stage: PowerFailStage) -> bool {
        self.signal(ControlSignal::PowerFail(stage))
    }

    /// Send a raw signal. Returns `false` once the controller has exited.
    pub fn signal(&self, signal: ControlSignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// Message loop hosting one [`ThreadHandler`].
pub struct ThreadController<S: ThreadHandler> {
    handler: S,
    registry: FunctorRegistry<S>,
    ctx: ControllerContext,
    receiver: ChannelReceiver,
    local_rx: mpsc::UnboundedReceiver<Box<dyn Command>>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
}

impl<S: ThreadHandler> ThreadController<S> {
    /// Create a controller on `endpoint`.
    pub fn new(
        name: impl Into<String>,
        handler: S,
        endpoint: ChannelEndpoint,
        events: EventReporter,
    ) -> Self {
        let (sender, receiver) = endpoint.split();
        let (ctx, local_rx) = ControllerContext::with_local_channel(name, sender, events);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            handler,
            registry: FunctorRegistry::new(),
            ctx,
            receiver,
            local_rx,
            control_tx,
            control_rx,
        }
    }

    /// Use a narrower reference space.
    pub fn with_reference_width(mut self, width: u32) -> Self {
        self.ctx.refs = ReferenceManager::with_width(width);
        self
    }

    /// Publish mode changes and handler notifications on `bus`.
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.ctx.notifications = Some(bus);
        self
    }

    /// Controller name.
    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    /// Register the handler for command type `C`.
    pub fn register_command_for_processing<C, F>(&mut self, handler: F) -> Result<()>
    where
        C: NamedCommand,
        F: FnMut(&mut S, &mut ControllerContext, Reference, C) -> Result<()> + Send + 'static,
    {
        self.registry.register::<C, F>(false, handler)
    }

    /// Register a handler that keeps running in power-fail mode.
    pub fn register_critical_command_for_processing<C, F>(&mut self, handler: F) -> Result<()>
    where
        C: NamedCommand,
        F: FnMut(&mut S, &mut ControllerContext, Reference, C) -> Result<()> + Send + 'static,
    {
        self.registry.register::<C, F>(true, handler)
    }

    /// Whether a handler for `C` is registered.
    pub fn handles<C: NamedCommand>(&self) -> bool {
        self.registry.contains::<C>()
    }

    /// Lifecycle handle.
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            name: self.ctx.name.clone(),
            tx: self.control_tx.clone(),
        }
    }

    /// Sender for local command injection.
    pub fn local_sender(&self) -> LocalSender {
        self.ctx.local_sender()
    }

    /// Handler state.
    pub fn handler(&self) -> &S {
        &self.handler
    }

    /// Mutable handler state, for wiring before the loop starts.
    pub fn handler_mut(&mut self) -> &mut S {
        &mut self.handler
    }

    /// Run the loop on a new task. The task yields the handler on exit.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<S>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run the loop until `Stop` or until the peer closes the channel.
    pub async fn run(mut self) -> S {
        // Inbound commands stay queued in the channel until Go.
        loop {
            match self.control_rx.recv().await {
                Some(ControlSignal::Go) => break,
                Some(ControlSignal::PowerFail(stage)) => self.enter_power_fail(stage),
                Some(ControlSignal::Stop) | None => return self.shutdown(),
            }
        }

        if !matches!(self.ctx.mode, ControllerMode::PowerFail(_)) {
            self.ctx.set_mode(ControllerMode::Active);
        }
        self.guarded("on_go", |handler, ctx| handler.on_go(ctx));

        loop {
            let deadline = self.ctx.pending.next_deadline();
            tokio::select! {
                signal = self.control_rx.recv() => match signal {
                    Some(ControlSignal::Go) => {
                        tracing::debug!(controller = %self.ctx.name, "Go while active ignored");
                    }
                    Some(ControlSignal::PowerFail(stage)) => self.enter_power_fail(stage),
                    Some(ControlSignal::Stop) | None => break,
                },
                inbound = self.receiver.recv() => match inbound {
                    Some(Inbound::Command(reference, cmd)) => self.dispatch(reference, cmd),
                    Some(Inbound::Ack(reference, ack)) => self.process_ack(reference, ack),
                    None => {
                        tracing::warn!(controller = %self.ctx.name, "Channel closed, stopping");
                        break;
                    }
                },
                Some(cmd) = self.local_rx.recv() => self.dispatch(Reference::INVALID, cmd),
                _ = wait_until(deadline) => self.process_timeouts(),
            }
        }

        self.shutdown()
    }

    fn shutdown(mut self) -> S {
        self.ctx.set_mode(ControllerMode::Stopping);
        while let Some(ack) = self.receiver.try_recv_ack() {
            self.process_ack(ack.0, ack.1);
        }
        while let Some((reference, cmd)) = self.receiver.try_recv_command() {
            self.dispatch(reference, cmd);
        }
        while let Ok(cmd) = self.local_rx.try_recv() {
            self.dispatch(Reference::INVALID, cmd);
        }
        self.guarded("on_stop", |handler, ctx| handler.on_stop(ctx));
        self.ctx.set_mode(ControllerMode::Stopped);
        tracing::info!(controller = %self.ctx.name, "Controller stopped");
        self.handler
    }

    fn enter_power_fail(&mut self, stage: PowerFailStage) {
        let mode = match stage {
            PowerFailStage::Revert => match self.ctx.mode {
                ControllerMode::PowerFail(_) => ControllerMode::Active,
                other => other,
            },
            stage => ControllerMode::PowerFail(stage),
        };
        self.ctx.set_mode(mode);
        self.guarded("on_power_fail", |handler, ctx| handler.on_power_fail(ctx, stage));
    }

    fn dispatch(&mut self, reference: Reference, cmd: Box<dyn Command>) {
        let name = cmd.name();
        let expects_ack = reference.is_valid() && !cmd.is_notification();

        if cmd.is_notification() && !cmd.timeout().is_none() {
            let error = Error::TimeoutNotAllowed(name.to_string());
            tracing::warn!(controller = %self.ctx.name, command = name, "Protocol violation: {}", error);
            self.ctx.events.report_error(&error);
            return;
        }

        let restricted = matches!(
            self.ctx.mode,
            ControllerMode::PowerFail(PowerFailStage::Stage1 | PowerFailStage::Stage2)
        );
        if restricted && !self.registry.is_critical(cmd.as_ref()) {
            tracing::info!(controller = %self.ctx.name, command = name, "Refused in power-fail mode");
            if expects_ack {
                self.reply(reference, Acknowledge::nok("power fail"));
            }
            return;
        }

        let registry = &mut self.registry;
        let handler = &mut self.handler;
        let ctx = &mut self.ctx;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            registry.dispatch(handler, ctx, reference, cmd)
        }));

        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(panic) => Error::Panic(panic_message(panic.as_ref())),
        };

        match &error {
            Error::Panic(_) => tracing::error!(
                controller = %self.ctx.name,
                command = name,
                reference = %reference,
                "Handler panicked: {}",
                error
            ),
            _ => tracing::warn!(
                controller = %self.ctx.name,
                command = name,
                reference = %reference,
                "Command failed: {}",
                error
            ),
        }

        let event = match &error {
            Error::Panic(_) => SystemEvent::new(codes::FATAL_ERROR)
                .with_args(vec![error.to_string(), name.to_string()]),
            _ => SystemEvent::from_error(&error),
        };
        self.ctx.raise_event(event);
        if expects_ack {
            self.reply(reference, Acknowledge::nok(error.to_string()));
        }
    }

    fn reply(&mut self, reference: Reference, ack: Acknowledge) {
        if let Err(e) = self.ctx.send_ack(reference, ack) {
            tracing::warn!(controller = %self.ctx.name, reference = %reference, "Failed to send acknowledge: {}", e);
            self.ctx.events.report_error(&e);
        }
    }

    fn process_ack(&mut self, reference: Reference, ack: Acknowledge) {
        let Some(pending) = self.ctx.pending.take(reference) else {
            tracing::debug!(
                controller = %self.ctx.name,
                reference = %reference,
                "Acknowledge for unknown or expired reference ignored"
            );
            return;
        };
        self.ctx.refs.unblock_reference(reference);
        tracing::debug!(
            controller = %self.ctx.name,
            command = pending.name,
            reference = %reference,
            ok = ack.is_ok(),
            "Acknowledge received"
        );
        self.guarded("on_acknowledge", |handler, ctx| {
            handler.on_acknowledge(ctx, reference, pending.name, ack)
        });
    }

    fn process_timeouts(&mut self) {
        for pending in self.ctx.pending.take_expired(Instant::now()) {
            self.ctx.refs.unblock_reference(pending.reference);
            tracing::warn!(
                controller = %self.ctx.name,
                command = pending.name,
                reference = %pending.reference,
                "Acknowledge timeout"
            );
            self.guarded("on_ack_timeout", |handler, ctx| {
                handler.on_ack_timeout(ctx, pending.reference, pending.name)
            });
        }
    }

    fn guarded<F>(&mut self, hook: &'static str, f: F)
    where
        F: FnOnce(&mut S, &mut ControllerContext),
    {
        let handler = &mut self.handler;
        let ctx = &mut self.ctx;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(handler, ctx))) {
            let message = panic_message(panic.as_ref());
            tracing::error!(controller = %self.ctx.name, hook, "Hook panicked: {}", message);
            self.ctx.raise_event(
                SystemEvent::new(codes::FATAL_ERROR).with_args(vec![message, hook.to_string()]),
            );
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
