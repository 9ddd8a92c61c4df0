//! State-change notifications for GUI-side consumers.
//!
//! Device state machines, network devices and process supervisors publish
//! their transitions here. Consumers (dashboard panels, the remote-care
//! agent) subscribe; nobody reaches into the publisher's state directly.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity for the notification bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A published state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StateNotification {
    /// Device state machine changed state.
    DeviceState { device: String, state: String },
    /// Network device changed connection state.
    NetworkState { device: String, state: String },
    /// External process started, stopped or exited.
    ProcessState { process: String, state: String },
    /// Thread controller changed operating mode.
    ControllerMode { controller: String, mode: String },
    /// Alarm raised or cleared by the event hub.
    Alarm { event_id: u32, active: bool },
}

impl StateNotification {
    /// Name of the publishing component.
    pub fn origin(&self) -> &str {
        match self {
            StateNotification::DeviceState { device, .. }
            | StateNotification::NetworkState { device, .. } => device,
            StateNotification::ProcessState { process, .. } => process,
            StateNotification::ControllerMode { controller, .. } => controller,
            StateNotification::Alarm { .. } => "alarm",
        }
    }

    /// Get the notification type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateNotification::DeviceState { .. } => "DeviceState",
            StateNotification::NetworkState { .. } => "NetworkState",
            StateNotification::ProcessState { .. } => "ProcessState",
            StateNotification::ControllerMode { .. } => "ControllerMode",
            StateNotification::Alarm { .. } => "Alarm",
        }
    }
}

/// Broadcast bus for [`StateNotification`]s.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<StateNotification>,
}

impl NotificationBus {
    /// Create a bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the specified capacity.
    ///
    /// The capacity determines how many notifications are buffered for
    /// slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish a notification. Returns `true` if anybody was listening.
    pub fn publish(&self, notification: StateNotification) -> bool {
        self.tx.send(notification).is_ok()
    }

    /// Subscribe to all notifications.
    pub fn subscribe(&self) -> NotificationReceiver {
        NotificationReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to notifications matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&StateNotification) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Receiver for all notifications.
pub struct NotificationReceiver {
    rx: broadcast::Receiver<StateNotification>,
}

impl NotificationReceiver {
    /// Receive the next notification.
    ///
    /// Returns `None` if the bus is closed. Lagging receivers skip the
    /// notifications they missed.
    pub async fn recv(&mut self) -> Option<StateNotification> {
        loop {
            match self.rx.recv().await {
                Ok(n) => return Some(n),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Notification receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&mut self) -> Option<StateNotification> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered notifications.
pub struct FilteredReceiver<F>
where
    F: Fn(&StateNotification) -> bool + Send,
{
    rx: broadcast::Receiver<StateNotification>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&StateNotification) -> bool + Send,
{
    /// Receive the next matching notification.
    pub async fn recv(&mut self) -> Option<StateNotification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if (self.filter)(&n) => return Some(n),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching notification without blocking.
    pub fn try_recv(&mut self) -> Option<StateNotification> {
        while let Ok(n) = self.rx.try_recv() {
            if (self.filter)(&n) {
                return Some(n);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(state: &str) -> StateNotification {
        StateNotification::DeviceState {
            device: "rfid".to_string(),
            state: state.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = NotificationBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert!(bus.publish(device("Idle")));
        assert_eq!(rx1.recv().await, Some(device("Idle")));
        assert_eq!(rx2.recv().await, Some(device("Idle")));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = NotificationBus::new();
        assert!(!bus.publish(device("Idle")));
    }

    #[tokio::test]
    async fn test_filtered() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe_filtered(|n| n.type_name() == "Alarm");

        bus.publish(device("ReadUid"));
        bus.publish(StateNotification::Alarm {
            event_id: 7,
            active: true,
        });

        let n = rx.recv().await.unwrap();
        assert_eq!(n.origin(), "alarm");
        assert!(rx.try_recv().is_none());
    }
}
