//! Network device state machine.
//!
//! ```text
//!            Connected            Welcome / valid Login
//!   Init ---------------> NotAuthenticated ---------------> Authenticated
//!     ^                          |                               |
//!     |          login timeout, refused, protocol violation,     |
//!     |          connection lost, missed heartbeats              |
//!     |                          v                               v
//!     +------- Reset -------- ConnectFailed <--------------------+
//! ```
//!
//! `ConnectFailed` absorbs every input except `Reset`. The device never
//! reconnects by itself; the owner decides when to try again.
//!
//! The machine is pure: [`NetworkDevice::handle`] returns the effects to
//! carry out (messages to send, timers to arm, signals to raise) and the
//! session driver performs them.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{NetMessage, login_digest, new_challenge, verify_login};

/// Which side of the connection the device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Self-initiated connection, answers the challenge.
    Client,
    /// Externally initiated connection, issues the challenge.
    Server,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetState {
    Init,
    NotAuthenticated,
    Authenticated,
    ConnectFailed,
}

impl NetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetState::Init => "Init",
            NetState::NotAuthenticated => "NotAuthenticated",
            NetState::Authenticated => "Authenticated",
            NetState::ConnectFailed => "ConnectFailed",
        }
    }
}

impl fmt::Display for NetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum NetInput {
    /// Transport connection established.
    Connected,
    /// A message arrived.
    Received(NetMessage),
    /// The login timer fired.
    LoginTimerExpired,
    /// Time to send a heartbeat.
    HeartbeatTick,
    /// Nothing was received for the heartbeat timeout.
    HeartbeatMissed,
    /// The transport failed or the peer closed it.
    Disconnected(String),
    /// Return to `Init` for a new attempt.
    Reset,
}

/// Signal raised towards the owning controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetSignal {
    /// Login completed.
    Authenticated,
    /// No login in time.
    LoginTimeout,
    /// The login was refused or its digest was wrong.
    AuthenticationFailed(String),
    /// The peer broke the protocol.
    ProtocolViolation(String),
    /// The connection could not be established.
    ConnectFailed(String),
    /// An authenticated connection went away.
    ConnectionLost(String),
    /// Application message from the peer.
    Delivered(#[serde(with = "crate::protocol::as_line")] NetMessage),
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEffect {
    Send(NetMessage),
    StartLoginTimer(Duration),
    StopLoginTimer,
    StartHeartbeat,
    Signal(NetSignal),
    Close,
}

/// Network device: login handshake and heartbeat supervision.
#[derive(Debug)]
pub struct NetworkDevice {
    role: Role,
    state: NetState,
    /// Client name, or the name the server expects
    name: String,
    secret: String,
    login_timeout: Duration,
    challenge: Option<String>,
    heartbeat_nr: u64,
}

impl NetworkDevice {
    /// Client logging in as `name`.
    pub fn client(name: impl Into<String>, secret: impl Into<String>, login_timeout: Duration) -> Self {
        Self::new(Role::Client, name.into(), secret.into(), login_timeout)
    }

    /// Server accepting logins from `name`.
    pub fn server(name: impl Into<String>, secret: impl Into<String>, login_timeout: Duration) -> Self {
        Self::new(Role::Server, name.into(), secret.into(), login_timeout)
    }

    fn new(role: Role, name: String, secret: String, login_timeout: Duration) -> Self {
        Self {
            role,
            state: NetState::Init,
            name,
            secret,
            login_timeout,
            challenge: None,
            heartbeat_nr: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NetState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == NetState::Authenticated
    }

    /// Feed one input, returning the effects in execution order.
    pub fn handle(&mut self, input: NetInput) -> Vec<NetEffect> {
        if let NetInput::Reset = input {
            self.state = NetState::Init;
            self.challenge = None;
            self.heartbeat_nr = 0;
            return Vec::new();
        }

        match (self.state, input) {
            (NetState::ConnectFailed, _) => Vec::new(),

            (NetState::Init, NetInput::Connected) => self.on_connected(),
            (NetState::Init, NetInput::Disconnected(reason)) => {
                self.fail(NetSignal::ConnectFailed(reason), false)
            }
            (NetState::Init, _) => Vec::new(),

            (NetState::NotAuthenticated, NetInput::Received(msg)) => self.on_login_message(msg),
            (NetState::NotAuthenticated, NetInput::LoginTimerExpired) => {
                tracing::warn!(device = %self.name, "Login timed out");
                self.fail(NetSignal::LoginTimeout, false)
            }
            (NetState::NotAuthenticated, NetInput::Disconnected(reason)) => {
                self.fail(NetSignal::ConnectFailed(reason), false)
            }
            (NetState::NotAuthenticated, _) => Vec::new(),

            (NetState::Authenticated, NetInput::Received(msg)) => self.on_authenticated_message(msg),
            (NetState::Authenticated, NetInput::HeartbeatTick) => {
                self.heartbeat_nr += 1;
                vec![NetEffect::Send(NetMessage::HeartBeat {
                    nr: self.heartbeat_nr,
                })]
            }
            (NetState::Authenticated, NetInput::HeartbeatMissed) => {
                tracing::warn!(device = %self.name, "Heartbeat missing");
                self.fail(NetSignal::ConnectionLost("heartbeat timeout".into()), true)
            }
            (NetState::Authenticated, NetInput::Disconnected(reason)) => {
                self.fail(NetSignal::ConnectionLost(reason), true)
            }
            (NetState::Authenticated, _) => Vec::new(),
        }
    }

    fn on_connected(&mut self) -> Vec<NetEffect> {
        self.state = NetState::NotAuthenticated;
        let mut effects = vec![NetEffect::StartLoginTimer(self.login_timeout)];
        if self.role == Role::Server {
            let challenge = new_challenge();
            effects.push(NetEffect::Send(NetMessage::Authentication {
                challenge: challenge.clone(),
            }));
            self.challenge = Some(challenge);
        }
        effects
    }

    fn on_login_message(&mut self, msg: NetMessage) -> Vec<NetEffect> {
        match (self.role, msg) {
            (Role::Client, NetMessage::Authentication { challenge }) => {
                let digest = login_digest(&self.secret, &challenge, &self.name);
                vec![NetEffect::Send(NetMessage::Login {
                    name: self.name.clone(),
                    digest,
                })]
            }
            (Role::Client, NetMessage::Welcome) => self.authenticated(Vec::new()),
            (Role::Client, NetMessage::Refused { reason }) => {
                self.fail(NetSignal::AuthenticationFailed(reason), false)
            }
            (Role::Server, NetMessage::Login { name, digest }) => {
                let challenge = self.challenge.take().unwrap_or_default();
                if name == self.name && verify_login(&self.secret, &challenge, &name, &digest) {
                    self.authenticated(vec![NetEffect::Send(NetMessage::Welcome)])
                } else {
                    tracing::warn!(device = %self.name, login = %name, "Login refused");
                    let mut effects = vec![NetEffect::Send(NetMessage::Refused {
                        reason: "invalid login".into(),
                    })];
                    effects.extend(self.fail(
                        NetSignal::AuthenticationFailed(format!("invalid login from {}", name)),
                        false,
                    ));
                    effects
                }
            }
            // Heartbeats may overtake the welcome.
            (_, NetMessage::HeartBeat { .. }) => Vec::new(),
            (_, other) => self.fail(
                NetSignal::ProtocolViolation(format!("{} before login", other.kind())),
                false,
            ),
        }
    }

    fn on_authenticated_message(&mut self, msg: NetMessage) -> Vec<NetEffect> {
        match msg {
            NetMessage::HeartBeat { .. } => Vec::new(),
            msg if msg.is_application() => vec![NetEffect::Signal(NetSignal::Delivered(msg))],
            other => self.fail(
                NetSignal::ProtocolViolation(format!("unexpected {}", other.kind())),
                true,
            ),
        }
    }

    fn authenticated(&mut self, mut effects: Vec<NetEffect>) -> Vec<NetEffect> {
        tracing::info!(device = %self.name, role = ?self.role, "Authenticated");
        self.state = NetState::Authenticated;
        effects.push(NetEffect::StopLoginTimer);
        effects.push(NetEffect::StartHeartbeat);
        effects.push(NetEffect::Signal(NetSignal::Authenticated));
        effects
    }

    fn fail(&mut self, signal: NetSignal, was_authenticated: bool) -> Vec<NetEffect> {
        self.state = NetState::ConnectFailed;
        self.challenge = None;
        let mut effects = Vec::new();
        if !was_authenticated {
            effects.push(NetEffect::StopLoginTimer);
        }
        effects.push(NetEffect::Signal(signal));
        effects.push(NetEffect::Close);
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn sent(effects: &[NetEffect]) -> Vec<NetMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                NetEffect::Send(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn signals(effects: &[NetEffect]) -> Vec<NetSignal> {
        effects
            .iter()
            .filter_map(|e| match e {
                NetEffect::Signal(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Run the handshake between a client and a server device.
    fn handshake(client: &mut NetworkDevice, server: &mut NetworkDevice) {
        let server_effects = server.handle(NetInput::Connected);
        client.handle(NetInput::Connected);
        let challenge = sent(&server_effects).remove(0);
        let login = sent(&client.handle(NetInput::Received(challenge))).remove(0);
        let welcome = sent(&server.handle(NetInput::Received(login))).remove(0);
        let effects = client.handle(NetInput::Received(welcome));
        assert_eq!(signals(&effects), vec![NetSignal::Authenticated]);
    }

    #[test]
    fn test_handshake() {
        let mut client = NetworkDevice::client("Himalaya", "s3cret", TIMEOUT);
        let mut server = NetworkDevice::server("Himalaya", "s3cret", TIMEOUT);
        handshake(&mut client, &mut server);
        assert!(client.is_authenticated());
        assert!(server.is_authenticated());
    }

    #[test]
    fn test_connect_arms_login_timer() {
        let mut client = NetworkDevice::client("a", "s", TIMEOUT);
        assert_eq!(
            client.handle(NetInput::Connected),
            vec![NetEffect::StartLoginTimer(TIMEOUT)]
        );
        assert_eq!(client.state(), NetState::NotAuthenticated);

        let mut server = NetworkDevice::server("a", "s", TIMEOUT);
        let effects = server.handle(NetInput::Connected);
        assert!(matches!(sent(&effects)[0], NetMessage::Authentication { .. }));
    }

    #[test]
    fn test_wrong_secret_is_refused() {
        let mut client = NetworkDevice::client("Himalaya", "wrong", TIMEOUT);
        let mut server = NetworkDevice::server("Himalaya", "s3cret", TIMEOUT);
        let challenge = sent(&server.handle(NetInput::Connected)).remove(0);
        client.handle(NetInput::Connected);
        let login = sent(&client.handle(NetInput::Received(challenge))).remove(0);

        let effects = server.handle(NetInput::Received(login));
        assert!(matches!(sent(&effects)[0], NetMessage::Refused { .. }));
        assert!(matches!(signals(&effects)[0], NetSignal::AuthenticationFailed(_)));
        assert!(effects.contains(&NetEffect::Close));
        assert_eq!(server.state(), NetState::ConnectFailed);

        let refused = sent(&effects).remove(0);
        let effects = client.handle(NetInput::Received(refused));
        assert!(matches!(signals(&effects)[0], NetSignal::AuthenticationFailed(_)));
        assert_eq!(client.state(), NetState::ConnectFailed);
    }

    #[test]
    fn test_login_timeout_then_reset() {
        let mut client = NetworkDevice::client("a", "s", TIMEOUT);
        client.handle(NetInput::Connected);
        let effects = client.handle(NetInput::LoginTimerExpired);
        assert_eq!(signals(&effects), vec![NetSignal::LoginTimeout]);
        assert_eq!(client.state(), NetState::ConnectFailed);

        // Absorbing until reset.
        assert!(client.handle(NetInput::Connected).is_empty());
        assert!(client.handle(NetInput::Received(NetMessage::Welcome)).is_empty());
        assert_eq!(client.state(), NetState::ConnectFailed);

        client.handle(NetInput::Reset);
        assert_eq!(client.state(), NetState::Init);
        client.handle(NetInput::Connected);
        assert_eq!(client.state(), NetState::NotAuthenticated);
    }

    #[test]
    fn test_application_message_before_login_is_a_violation() {
        let mut server = NetworkDevice::server("a", "s", TIMEOUT);
        server.handle(NetInput::Connected);
        let effects = server.handle(NetInput::Received(NetMessage::Message {
            name: "CmdX".into(),
            reference: 1,
            body: String::new(),
        }));
        assert!(matches!(signals(&effects)[0], NetSignal::ProtocolViolation(_)));
        assert_eq!(server.state(), NetState::ConnectFailed);
    }

    #[test]
    fn test_heartbeats() {
        let mut client = NetworkDevice::client("a", "s", TIMEOUT);
        let mut server = NetworkDevice::server("a", "s", TIMEOUT);
        handshake(&mut client, &mut server);

        assert_eq!(
            sent(&client.handle(NetInput::HeartbeatTick)),
            vec![NetMessage::HeartBeat { nr: 1 }]
        );
        assert_eq!(
            sent(&client.handle(NetInput::HeartbeatTick)),
            vec![NetMessage::HeartBeat { nr: 2 }]
        );
        assert!(server.handle(NetInput::Received(NetMessage::HeartBeat { nr: 1 })).is_empty());

        let effects = server.handle(NetInput::HeartbeatMissed);
        assert!(matches!(signals(&effects)[0], NetSignal::ConnectionLost(_)));
        assert_eq!(server.state(), NetState::ConnectFailed);
    }

    #[test]
    fn test_delivery_and_disconnect() {
        let mut client = NetworkDevice::client("a", "s", TIMEOUT);
        let mut server = NetworkDevice::server("a", "s", TIMEOUT);
        handshake(&mut client, &mut server);

        let ack = NetMessage::Ack {
            reference: 3,
            ack: histo_core::Acknowledge::ok(),
        };
        assert_eq!(
            signals(&client.handle(NetInput::Received(ack.clone()))),
            vec![NetSignal::Delivered(ack)]
        );

        let effects = client.handle(NetInput::Disconnected("closed by peer".into()));
        assert_eq!(
            signals(&effects),
            vec![NetSignal::ConnectionLost("closed by peer".into())]
        );
    }
}
