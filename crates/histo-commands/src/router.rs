//! Master-side command router.
//!
//! The router holds the master end of every controller's channel. A
//! command arriving on any port is looked up in the routing table by type
//! and forwarded to the owning controller under a fresh router reference;
//! the acknowledge that comes back is mapped to the original sender's
//! reference. Commands without a route are refused with `Nok` and reported.
//!
//! Code outside any controller (the CLI, tests) talks to the router through
//! a [`RouterHandle`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use histo_core::{
    Acknowledge, Command, Error, EventReporter, NamedCommand, Reference, ReferenceManager, Result,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChannelEndpoint, ChannelReceiver, ChannelSender, Inbound};
use crate::pending::PendingCommands;

/// Index of a router port.
pub type PortId = usize;

struct Port {
    name: String,
    sender: ChannelSender,
}

/// Who is waiting for a forwarded command's acknowledge.
#[derive(Debug)]
enum Origin {
    Port { port: PortId, reference: Reference },
    Request(Option<oneshot::Sender<Acknowledge>>),
}

enum RouterRequest {
    Send {
        cmd: Box<dyn Command>,
        reply: Option<oneshot::Sender<Acknowledge>>,
    },
    Shutdown,
}

type RouteTable = Arc<DashMap<TypeId, (PortId, &'static str)>>;

/// Routes commands between controllers.
pub struct CommandRouter {
    ports: Vec<Port>,
    receivers: Vec<ChannelReceiver>,
    routes: RouteTable,
    refs: ReferenceManager,
    pending: PendingCommands,
    origins: HashMap<Reference, Origin>,
    events: EventReporter,
    request_tx: mpsc::UnboundedSender<RouterRequest>,
    request_rx: mpsc::UnboundedReceiver<RouterRequest>,
}

impl CommandRouter {
    /// Create a router without ports.
    pub fn new(events: EventReporter) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            ports: Vec::new(),
            receivers: Vec::new(),
            routes: Arc::new(DashMap::new()),
            refs: ReferenceManager::new(),
            pending: PendingCommands::new(),
            origins: HashMap::new(),
            events: events.for_source("Router"),
            request_tx,
            request_rx,
        }
    }

    /// Use a narrower reference space.
    pub fn with_reference_width(mut self, width: u32) -> Self {
        self.refs = ReferenceManager::with_width(width);
        self
    }

    /// Attach the master end of a controller channel. The port is named
    /// after the endpoint's peer.
    pub fn add_port(&mut self, endpoint: ChannelEndpoint) -> PortId {
        let name = endpoint.peer().to_string();
        let (sender, receiver) = endpoint.split();
        self.ports.push(Port { name, sender });
        self.receivers.push(receiver);
        self.ports.len() - 1
    }

    /// Look up a port by controller name.
    pub fn port_id(&self, name: &str) -> Option<PortId> {
        self.ports.iter().position(|p| p.name == name)
    }

    /// Route command type `C` to `port`.
    pub fn route<C: NamedCommand>(&self, port: PortId) -> Result<()> {
        if port >= self.ports.len() {
            return Err(Error::InvalidState(format!("no router port {}", port)));
        }
        match self.routes.entry(TypeId::of::<C>()) {
            Entry::Occupied(_) => Err(Error::AlreadyRegistered(C::NAME.to_string())),
            Entry::Vacant(slot) => {
                slot.insert((port, C::NAME));
                Ok(())
            }
        }
    }

    /// Handle for code outside the controllers.
    pub fn handle(&self) -> RouterHandle {
        RouterHandle {
            tx: self.request_tx.clone(),
            routes: self.routes.clone(),
        }
    }

    /// Run the router on a new task.
    pub fn spawn(self) -> (RouterHandle, JoinHandle<()>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    /// Run until [`RouterHandle::shutdown`].
    pub async fn run(mut self) {
        let (merged_tx, mut merged_rx) = mpsc::unbounded_channel::<(PortId, Inbound)>();
        let forwarders: Vec<JoinHandle<()>> = std::mem::take(&mut self.receivers)
            .into_iter()
            .enumerate()
            .map(|(port, mut receiver)| {
                let tx = merged_tx.clone();
                tokio::spawn(async move {
                    while let Some(inbound) = receiver.recv().await {
                        if tx.send((port, inbound)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(merged_tx);

        tracing::info!(ports = self.ports.len(), routes = self.routes.len(), "Router started");

        loop {
            let deadline = self.pending.next_deadline();
            tokio::select! {
                Some((port, inbound)) = merged_rx.recv() => match inbound {
                    Inbound::Command(reference, cmd) => {
                        self.forward(Origin::Port { port, reference }, cmd)
                    }
                    Inbound::Ack(reference, ack) => self.complete(reference, ack),
                },
                request = self.request_rx.recv() => match request {
                    Some(RouterRequest::Send { cmd, reply }) => {
                        self.forward(Origin::Request(reply), cmd)
                    }
                    Some(RouterRequest::Shutdown) | None => break,
                },
                _ = wait_until(deadline) => self.expire(),
            }
        }

        for task in forwarders {
            task.abort();
        }
        tracing::info!("Router stopped");
    }

    fn forward(&mut self, origin: Origin, cmd: Box<dyn Command>) {
        let name = cmd.name();
        let route = self
            .routes
            .get(&Any::type_id(cmd.as_any()))
            .map(|entry| entry.value().0);
        let Some(port) = route else {
            self.refuse(origin, Error::UnsupportedCommand(name.to_string()));
            return;
        };

        let reference = match self.refs.get_new_ref() {
            Ok(reference) => reference,
            Err(e) => {
                self.refuse(origin, e);
                return;
            }
        };

        let notification = cmd.is_notification();
        let timeout = cmd.timeout();
        if let Err(e) = self.ports[port].sender.send_command(reference, cmd) {
            self.refs.unblock_reference(reference);
            self.refuse(origin, e.into());
            return;
        }
        tracing::debug!(
            command = name,
            to = %self.ports[port].name,
            reference = %reference,
            "Command forwarded"
        );

        if notification {
            self.refs.unblock_reference(reference);
            if let Origin::Request(Some(reply)) = origin {
                let _ = reply.send(Acknowledge::ok());
            }
            return;
        }
        self.pending.register(reference, name, timeout, Instant::now());
        self.origins.insert(reference, origin);
    }

    fn complete(&mut self, reference: Reference, ack: Acknowledge) {
        if self.pending.take(reference).is_none() {
            tracing::debug!(reference = %reference, "Acknowledge for unknown or expired reference ignored");
            return;
        }
        self.refs.unblock_reference(reference);
        match self.origins.remove(&reference) {
            Some(Origin::Port { port, reference }) => {
                if let Err(e) = self.ports[port].sender.send_ack(reference, ack) {
                    tracing::warn!(to = %self.ports[port].name, "Failed to return acknowledge: {}", e);
                    self.events.report_error(&Error::from(e));
                }
            }
            Some(Origin::Request(Some(reply))) => {
                let _ = reply.send(ack);
            }
            Some(Origin::Request(None)) | None => {}
        }
    }

    fn expire(&mut self) {
        for pending in self.pending.take_expired(Instant::now()) {
            self.refs.unblock_reference(pending.reference);
            // Dropping a request's reply sender wakes the waiting caller.
            let origin = self.origins.remove(&pending.reference);
            tracing::debug!(
                command = pending.name,
                reference = %pending.reference,
                origin = ?origin,
                "Forwarded command expired"
            );
        }
    }

    fn refuse(&mut self, origin: Origin, error: Error) {
        tracing::warn!("Command refused: {}", error);
        self.events.report_error(&error);
        let ack = Acknowledge::nok(error.to_string());
        match origin {
            Origin::Port { port, reference } if reference.is_valid() => {
                if let Err(e) = self.ports[port].sender.send_ack(reference, ack) {
                    tracing::warn!(to = %self.ports[port].name, "Failed to return acknowledge: {}", e);
                }
            }
            Origin::Request(Some(reply)) => {
                let _ = reply.send(ack);
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports: Vec<&str> = self.ports.iter().map(|p| p.name.as_str()).collect();
        f.debug_struct("CommandRouter")
            .field("ports", &ports)
            .field("routes", &self.routes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Cloneable access to a running router.
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<RouterRequest>,
    routes: RouteTable,
}

impl RouterHandle {
    /// Send a command and ignore its acknowledge.
    pub fn send<C: Command>(&self, cmd: C) -> Result<()> {
        self.tx
            .send(RouterRequest::Send {
                cmd: Box::new(cmd),
                reply: None,
            })
            .map_err(|_| Error::ChannelClosed("router".into()))
    }

    /// Send a command and wait for its acknowledge.
    ///
    /// Fails with [`Error::Timeout`] when the command declares a timeout and
    /// no acknowledge arrives within it.
    pub async fn request(&self, cmd: Box<dyn Command>) -> Result<Acknowledge> {
        let name = cmd.name();
        let timeout = cmd.timeout();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RouterRequest::Send {
                cmd,
                reply: Some(reply),
            })
            .map_err(|_| Error::ChannelClosed("router".into()))?;

        match timeout.as_duration() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(Ok(ack)) => Ok(ack),
                Ok(Err(_)) | Err(_) => Err(Error::Timeout(name.to_string())),
            },
            None => rx
                .await
                .map_err(|_| Error::ChannelClosed("router".into())),
        }
    }

    /// Whether command type `C` has a route.
    pub fn is_routed<C: NamedCommand>(&self) -> bool {
        self.routes.contains_key(&TypeId::of::<C>())
    }

    /// Names of all routed command types, sorted.
    pub fn routed_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.routes.iter().map(|e| e.value().1).collect();
        names.sort_unstable();
        names
    }

    /// Stop the router.
    pub fn shutdown(&self) {
        let _ = self.tx.send(RouterRequest::Shutdown);
    }
}

impl std::fmt::Debug for RouterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHandle")
            .field("routes", &self.routes.len())
            .finish()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandChannel;
    use histo_core::{Timeout, impl_command};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CmdPing {
        timeout: Timeout,
    }
    impl_command!(CmdPing, "CmdPing");

    #[test]
    fn test_route_registration() {
        let mut router = CommandRouter::new(EventReporter::detached());
        let (master, _device) = CommandChannel::pair("master", "device", 4);
        let port = router.add_port(master);
        assert_eq!(router.port_id("device"), Some(port));

        router.route::<CmdPing>(port).unwrap();
        assert!(matches!(
            router.route::<CmdPing>(port),
            Err(Error::AlreadyRegistered(_))
        ));
        assert!(matches!(
            router.route::<CmdPing>(port + 1),
            Err(Error::InvalidState(_))
        ));

        let handle = router.handle();
        assert!(handle.is_routed::<CmdPing>());
        assert_eq!(handle.routed_names(), vec!["CmdPing"]);
    }
}
