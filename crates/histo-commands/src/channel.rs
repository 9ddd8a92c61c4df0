//! Duplex command channel between two endpoints.
//!
//! Commands flow with their reference in one subchannel, acknowledges in
//! another. Each subchannel is FIFO; there is no ordering between the two
//! and none across channels. Sending never blocks: a full subchannel is a
//! resource exhaustion the sender has to handle.

use histo_core::{Acknowledge, Command, Reference};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

type CommandItem = (Reference, Box<dyn Command>);
type AckItem = (Reference, Acknowledge);

/// Channel error types.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {0} is full")]
    Full(String),

    #[error("Channel {0} is closed")]
    Closed(String),
}

impl From<ChannelError> for histo_core::Error {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Full(name) => histo_core::Error::ChannelFull(name),
            ChannelError::Closed(name) => histo_core::Error::ChannelClosed(name),
        }
    }
}

/// Something received on an endpoint.
#[derive(Debug)]
pub enum Inbound {
    /// A command the peer wants executed.
    Command(Reference, Box<dyn Command>),
    /// The acknowledge for a command this side sent.
    Ack(Reference, Acknowledge),
}

/// Factory for connected endpoint pairs.
pub struct CommandChannel;

impl CommandChannel {
    /// Create two connected endpoints with `capacity` slots per direction
    /// and subchannel.
    pub fn pair(
        a: impl Into<String>,
        b: impl Into<String>,
        capacity: usize,
    ) -> (ChannelEndpoint, ChannelEndpoint) {
        let (a, b) = (a.into(), b.into());
        let capacity = capacity.max(1);

        let (cmd_a_tx, cmd_a_rx) = mpsc::channel(capacity);
        let (cmd_b_tx, cmd_b_rx) = mpsc::channel(capacity);
        let (ack_a_tx, ack_a_rx) = mpsc::channel(capacity);
        let (ack_b_tx, ack_b_rx) = mpsc::channel(capacity);

        let end_a = ChannelEndpoint {
            sender: ChannelSender {
                label: format!("{}->{}", a, b),
                cmd_tx: cmd_b_tx,
                ack_tx: ack_b_tx,
            },
            receiver: ChannelReceiver {
                cmd_rx: cmd_a_rx,
                ack_rx: ack_a_rx,
            },
            name: a.clone(),
            peer: b.clone(),
        };
        let end_b = ChannelEndpoint {
            sender: ChannelSender {
                label: format!("{}->{}", b, a),
                cmd_tx: cmd_a_tx,
                ack_tx: ack_a_tx,
            },
            receiver: ChannelReceiver {
                cmd_rx: cmd_b_rx,
                ack_rx: ack_b_rx,
            },
            name: b,
            peer: a,
        };
        (end_a, end_b)
    }
}

/// One side of a [`CommandChannel`].
pub struct ChannelEndpoint {
    sender: ChannelSender,
    receiver: ChannelReceiver,
    name: String,
    peer: String,
}

impl ChannelEndpoint {
    /// Name of this side.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the other side.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a command to the peer.
    pub fn send_command(
        &self,
        reference: Reference,
        cmd: Box<dyn Command>,
    ) -> Result<(), ChannelError> {
        self.sender.send_command(reference, cmd)
    }

    /// Send an acknowledge to the peer.
    pub fn send_ack(&self, reference: Reference, ack: Acknowledge) -> Result<(), ChannelError> {
        self.sender.send_ack(reference, ack)
    }

    /// Receive the next inbound item.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.receiver.recv().await
    }

    /// Split into the sending and receiving halves.
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Sending half of an endpoint.
#[derive(Clone)]
pub struct ChannelSender {
    label: String,
    cmd_tx: mpsc::Sender<CommandItem>,
    ack_tx: mpsc::Sender<AckItem>,
}

impl ChannelSender {
    /// Channel label, `from->to`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Queue a command for the peer without waiting.
    pub fn send_command(
        &self,
        reference: Reference,
        cmd: Box<dyn Command>,
    ) -> Result<(), ChannelError> {
        self.cmd_tx
            .try_send((reference, cmd))
            .map_err(|e| self.map_err(e))
    }

    /// Queue an acknowledge for the peer without waiting.
    pub fn send_ack(&self, reference: Reference, ack: Acknowledge) -> Result<(), ChannelError> {
        self.ack_tx
            .try_send((reference, ack))
            .map_err(|e| self.map_err(e))
    }

    /// Whether the peer's receiving half is gone.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    fn map_err<T>(&self, e: TrySendError<T>) -> ChannelError {
        match e {
            TrySendError::Full(_) => ChannelError::Full(self.label.clone()),
            TrySendError::Closed(_) => ChannelError::Closed(self.label.clone()),
        }
    }
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("label", &self.label)
            .finish()
    }
}

/// Receiving half of an endpoint.
pub struct ChannelReceiver {
    cmd_rx: mpsc::Receiver<CommandItem>,
    ack_rx: mpsc::Receiver<AckItem>,
}

impl ChannelReceiver {
    /// Receive the next command or acknowledge.
    ///
    /// Returns `None` once both subchannels are closed and drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        tokio::select! {
            Some((reference, cmd)) = self.cmd_rx.recv() => Some(Inbound::Command(reference, cmd)),
            Some((reference, ack)) = self.ack_rx.recv() => Some(Inbound::Ack(reference, ack)),
            else => None,
        }
    }

    /// Take an already queued command without waiting.
    pub fn try_recv_command(&mut self) -> Option<(Reference, Box<dyn Command>)> {
        self.cmd_rx.try_recv().ok()
    }

    /// Take an already queued acknowledge without waiting.
    pub fn try_recv_ack(&mut self) -> Option<(Reference, Acknowledge)> {
        self.ack_rx.try_recv().ok()
    }
}
