//! Async driver of a [`NetworkDevice`] over a [`MessageChannel`].
//!
//! One session serves one connection: it feeds transport events and timer
//! expiries into the device, carries out the returned effects, and ends
//! once the device closes the connection. Signals are handed to a callback
//! so the owner can turn them into commands on its own controller.

use std::collections::VecDeque;
use std::time::Duration;

use histo_core::config::RemoteCareConfig;
use histo_core::{NotificationBus, StateNotification};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};

use crate::device::{NetEffect, NetInput, NetSignal, NetworkDevice};
use crate::protocol::NetMessage;
use crate::transport::MessageChannel;

/// Heartbeat settings of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Period between own heartbeats
    pub heartbeat_interval: Duration,
    /// Silence after which the peer is considered gone
    pub heartbeat_timeout: Duration,
}

impl SessionConfig {
    pub fn from_config(config: &RemoteCareConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&RemoteCareConfig::default())
    }
}

/// A network device bound to its heartbeat settings.
pub struct Session {
    device: NetworkDevice,
    config: SessionConfig,
    notifications: Option<NotificationBus>,
}

impl Session {
    pub fn new(device: NetworkDevice, config: SessionConfig) -> Self {
        Self {
            device,
            config,
            notifications: None,
        }
    }

    /// Publish connection state changes on `bus`.
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.notifications = Some(bus);
        self
    }

    /// Drive the connection until it closes.
    ///
    /// Messages from `outbound` are sent once the device is authenticated;
    /// closing `outbound` closes the connection. Returns the device in its
    /// final state.
    pub async fn run<C, F>(
        self,
        mut channel: C,
        mut outbound: mpsc::Receiver<NetMessage>,
        mut on_signal: F,
    ) -> NetworkDevice
    where
        C: MessageChannel,
        F: FnMut(NetSignal) + Send,
    {
        let Session {
            mut device,
            config,
            notifications,
        } = self;

        let mut heartbeat = interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_on = false;
        let mut login_deadline: Option<Instant> = None;
        let mut last_received = Instant::now();
        let mut closing = false;
        let mut inputs = VecDeque::from([NetInput::Connected]);

        loop {
            while let Some(input) = inputs.pop_front() {
                let before = device.state();
                for effect in device.handle(input) {
                    match effect {
                        NetEffect::Send(msg) => {
                            if let Err(e) = channel.send(&msg).await {
                                inputs.push_back(NetInput::Disconnected(e.to_string()));
                            }
                        }
                        NetEffect::StartLoginTimer(timeout) => {
                            login_deadline = Some(Instant::now() + timeout);
                        }
                        NetEffect::StopLoginTimer => login_deadline = None,
                        NetEffect::StartHeartbeat => {
                            heartbeat_on = true;
                            heartbeat.reset();
                            last_received = Instant::now();
                        }
                        NetEffect::Signal(signal) => on_signal(signal),
                        NetEffect::Close => closing = true,
                    }
                }
                if device.state() != before {
                    publish(&notifications, &device);
                }
            }
            if closing {
                break;
            }

            let input = tokio::select! {
                received = channel.recv() => match received {
                    Ok(Some(msg)) => {
                        last_received = Instant::now();
                        NetInput::Received(msg)
                    }
                    Ok(None) => NetInput::Disconnected("closed by peer".into()),
                    Err(e) => NetInput::Disconnected(e.to_string()),
                },
                _ = wait_until(login_deadline) => {
                    login_deadline = None;
                    NetInput::LoginTimerExpired
                }
                _ = heartbeat.tick(), if heartbeat_on => NetInput::HeartbeatTick,
                _ = sleep_until(last_received + config.heartbeat_timeout), if heartbeat_on => {
                    NetInput::HeartbeatMissed
                }
                msg = outbound.recv(), if device.is_authenticated() => match msg {
                    Some(msg) => match channel.send(&msg).await {
                        Ok(()) => continue,
                        Err(e) => NetInput::Disconnected(e.to_string()),
                    },
                    None => {
                        tracing::info!(device = %device.name(), "Session closed by owner");
                        break;
                    }
                },
            };
            inputs.push_back(input);
        }

        tracing::debug!(device = %device.name(), state = %device.state(), "Session ended");
        device
    }
}

fn publish(notifications: &Option<NotificationBus>, device: &NetworkDevice) {
    tracing::debug!(device = %device.name(), state = %device.state(), "Network state changed");
    if let Some(bus) = notifications {
        bus.publish(StateNotification::NetworkState {
            device: device.name().to_string(),
            state: device.state().to_string(),
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
