//! Remote-care bridge thread handler.
//!
//! Connects to the remote-care agent as a network client. Commands the
//! master sends to the bridge are forwarded to the agent as `Message`
//! frames and acknowledged when the agent answers. Commands the agent sends
//! are decoded and passed on to the master; the master's acknowledge goes
//! back to the agent.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use histo_commands::{ControllerContext, PowerFailStage, ThreadController, ThreadHandler};
use histo_core::config::RemoteCareConfig;
use histo_core::{
    Acknowledge, Command, CommandCodec, NamedCommand, Reference, Result, StateNotification,
    SystemEvent,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::{CmdRemoteCareConnect, CmdRemoteCareEvent, NotifyNetSignal};
use crate::device::{NetSignal, NetState, NetworkDevice};
use crate::protocol::NetMessage;
use crate::session::{Session, SessionConfig};
use crate::transport::LineChannel;

/// Controller name.
pub const REMOTE_CARE: &str = "RemoteCare";

/// Messages queued towards the agent.
const OUTBOUND_CAPACITY: usize = 64;

/// Event ids raised by the bridge.
pub mod codes {
    /// The agent did not complete the login in time.
    pub const REMOTE_LOGIN_TIMEOUT: u32 = 0x0002_0001;
    /// The connection could not be established or was lost.
    pub const REMOTE_CONNECTION_LOST: u32 = 0x0002_0002;
    /// The login was refused or the agent broke the protocol.
    pub const REMOTE_PROTOCOL_ERROR: u32 = 0x0002_0003;
}

/// Remote-care bridge state.
pub struct RemoteCareBridge {
    config: RemoteCareConfig,
    codec: CommandCodec,
    state: NetState,
    outbound: Option<mpsc::Sender<NetMessage>>,
    session: Option<JoinHandle<()>>,
    /// Master commands waiting for the agent, by their reference
    forwarded: HashSet<Reference>,
    /// Agent commands waiting for the master: our reference to the agent's
    from_agent: HashMap<Reference, u32>,
}

impl RemoteCareBridge {
    /// Bridge decoding agent commands with `codec`.
    pub fn new(config: RemoteCareConfig, codec: CommandCodec) -> Self {
        Self {
            config,
            codec,
            state: NetState::Init,
            outbound: None,
            session: None,
            forwarded: HashSet::new(),
            from_agent: HashMap::new(),
        }
    }

    /// Connection state as last signalled by the session.
    pub fn state(&self) -> NetState {
        self.state
    }

    /// Agent commands waiting for the master's acknowledge.
    pub fn pending_from_agent(&self) -> usize {
        self.from_agent.len()
    }

    /// Register the bridge commands on `controller`.
    pub fn register(controller: &mut ThreadController<Self>) -> Result<()> {
        controller.register_command_for_processing(Self::on_connect)?;
        controller.register_critical_command_for_processing(Self::on_net_signal)?;
        Self::forward::<CmdRemoteCareEvent>(controller)
    }

    /// Forward commands of type `C` from the master to the agent.
    pub fn forward<C: NamedCommand>(controller: &mut ThreadController<Self>) -> Result<()> {
        let codec = &mut controller.handler_mut().codec;
        if !codec.is_registered(C::NAME) {
            codec.register::<C>()?;
        }
        controller.register_command_for_processing(
            |bridge: &mut Self, ctx: &mut ControllerContext, reference, cmd: C| {
                bridge.forward_to_agent(ctx, reference, &cmd)
            },
        )
    }

    fn on_connect(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        _cmd: CmdRemoteCareConnect,
    ) -> Result<()> {
        if self.session.as_ref().is_some_and(|s| !s.is_finished()) {
            return ctx.send_ack(reference, Acknowledge::nok("remote care connection in progress"));
        }
        self.start_session(ctx);
        ctx.send_ack(reference, Acknowledge::ok())
    }

    fn forward_to_agent(
        &mut self,
        ctx: &mut ControllerContext,
        reference: Reference,
        cmd: &dyn Command,
    ) -> Result<()> {
        if self.state != NetState::Authenticated {
            return ctx.send_ack(reference, Acknowledge::nok("remote care not connected"));
        }
        let msg = NetMessage::command(reference, cmd, &self.codec)?;
        if !self.send_to_agent(msg) {
            return ctx.send_ack(reference, Acknowledge::nok("remote care queue full"));
        }
        tracing::debug!(command = cmd.name(), reference = %reference, "Forwarded to agent");
        if reference.is_valid() && !cmd.is_notification() {
            self.forwarded.insert(reference);
        }
        Ok(())
    }

    fn on_net_signal(
        &mut self,
        ctx: &mut ControllerContext,
        _reference: Reference,
        cmd: NotifyNetSignal,
    ) -> Result<()> {
        match cmd.signal {
            NetSignal::Authenticated => {
                tracing::info!(addr = %self.config.address, "Remote care connected");
                self.set_state(ctx, NetState::Authenticated);
            }
            NetSignal::Delivered(msg) => self.on_agent_message(ctx, msg)?,
            NetSignal::LoginTimeout => {
                self.disconnected(ctx, codes::REMOTE_LOGIN_TIMEOUT, "login timeout".into())
            }
            NetSignal::ConnectFailed(reason) | NetSignal::ConnectionLost(reason) => {
                self.disconnected(ctx, codes::REMOTE_CONNECTION_LOST, reason)
            }
            NetSignal::AuthenticationFailed(reason) | NetSignal::ProtocolViolation(reason) => {
                self.disconnected(ctx, codes::REMOTE_PROTOCOL_ERROR, reason)
            }
        }
        Ok(())
    }

    fn on_agent_message(&mut self, ctx: &mut ControllerContext, msg: NetMessage) -> Result<()> {
        match msg {
            NetMessage::Ack { reference, ack } => {
                let reference = Reference(reference);
                if self.forwarded.remove(&reference) {
                    ctx.send_ack(reference, ack)?;
                } else {
                    tracing::debug!(reference = %reference, "Acknowledge for unknown command from agent");
                }
            }
            msg @ NetMessage::Message { .. } => {
                let (agent_ref, cmd) = match msg.decode_command(&self.codec) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        let error = histo_core::Error::from(e);
                        ctx.raise_event(SystemEvent::from_error(&error));
                        if let NetMessage::Message { reference, .. } = msg {
                            self.send_to_agent(NetMessage::Ack {
                                reference,
                                ack: Acknowledge::nok(error.to_string()),
                            });
                        }
                        return Ok(());
                    }
                };
                let notification = cmd.is_notification();
                match ctx.send_command(cmd) {
                    Ok(reference) if !notification && agent_ref.is_valid() => {
                        self.from_agent.insert(reference, agent_ref.0);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.send_to_agent(NetMessage::Ack {
                            reference: agent_ref.0,
                            ack: Acknowledge::nok(e.to_string()),
                        });
                    }
                }
            }
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring agent message");
            }
        }
        Ok(())
    }

    fn start_session(&mut self, ctx: &mut ControllerContext) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let local = ctx.local_sender();
        let device = NetworkDevice::client(
            self.config.client_name.clone(),
            self.config.shared_secret.clone(),
            Duration::from_millis(self.config.login_timeout_ms),
        );
        let session = Session::new(device, SessionConfig::from_config(&self.config));
        let addr = self.config.address.clone();

        tracing::info!(addr = %addr, "Connecting to remote care agent");
        self.outbound = Some(tx);
        self.set_state(ctx, NetState::Init);
        self.session = Some(tokio::spawn(async move {
            let post = move |signal: NetSignal| {
                if !local.post(NotifyNetSignal::new(signal)) {
                    tracing::debug!("Remote care bridge gone");
                }
            };
            match LineChannel::connect(&addr).await {
                Ok(channel) => {
                    session.run(channel, rx, post).await;
                }
                Err(e) => post(NetSignal::ConnectFailed(format!("{}: {}", addr, e))),
            }
        }));
    }

    fn send_to_agent(&self, msg: NetMessage) -> bool {
        match &self.outbound {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    fn disconnected(&mut self, ctx: &mut ControllerContext, event_id: u32, reason: String) {
        tracing::warn!(reason = %reason, "Remote care disconnected");
        ctx.raise_event(
            SystemEvent::new(event_id).with_args(vec![reason, self.config.address.clone()]),
        );
        self.outbound = None;
        self.from_agent.clear();
        self.fail_forwarded(ctx, "remote care connection lost");
        self.set_state(ctx, NetState::ConnectFailed);
    }

    fn fail_forwarded(&mut self, ctx: &mut ControllerContext, text: &str) {
        for reference in self.forwarded.drain() {
            let _ = ctx.send_ack(reference, Acknowledge::nok(text));
        }
    }

    fn set_state(&mut self, ctx: &mut ControllerContext, state: NetState) {
        self.state = state;
        ctx.notify(StateNotification::NetworkState {
            device: REMOTE_CARE.to_string(),
            state: state.to_string(),
        });
    }
}

impl ThreadHandler for RemoteCareBridge {
    fn on_go(&mut self, ctx: &mut ControllerContext) {
        if self.config.enabled {
            self.start_session(ctx);
        }
    }

    fn on_stop(&mut self, ctx: &mut ControllerContext) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
        self.outbound = None;
        self.fail_forwarded(ctx, "remote care stopped");
    }

    fn on_power_fail(&mut self, _ctx: &mut ControllerContext, stage: PowerFailStage) {
        tracing::info!(stage = ?stage, state = %self.state, "Remote care power fail");
    }

    fn on_acknowledge(
        &mut self,
        _ctx: &mut ControllerContext,
        reference: Reference,
        command: &'static str,
        ack: Acknowledge,
    ) {
        if let Some(agent_ref) = self.from_agent.remove(&reference) {
            tracing::debug!(command, reference = %reference, "Returning acknowledge to agent");
            self.send_to_agent(NetMessage::Ack {
                reference: agent_ref,
                ack,
            });
        }
    }

    fn on_ack_timeout(
        &mut self,
        _ctx: &mut ControllerContext,
        reference: Reference,
        command: &'static str,
    ) {
        if let Some(agent_ref) = self.from_agent.remove(&reference) {
            self.send_to_agent(NetMessage::Ack {
                reference: agent_ref,
                ack: Acknowledge::nok(format!("{} timed out", command)),
            });
        }
    }
}
