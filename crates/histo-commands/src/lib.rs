//! Command transport and dispatch.
//!
//! Provides:
//! - Duplex command/acknowledge channels between two endpoints
//! - Per-controller handler registry keyed by command type
//! - Acknowledge deadline tracking for sent commands
//! - The thread controller message loop and its lifecycle
//! - The master-side router connecting all controllers

pub mod channel;
pub mod controller;
pub mod pending;
pub mod registry;
pub mod router;

pub use channel::{
    ChannelEndpoint, ChannelError, ChannelReceiver, ChannelSender, CommandChannel, Inbound,
};
pub use controller::{
    ControlSignal, ControllerContext, ControllerHandle, ControllerMode, LocalSender,
    PowerFailStage, ThreadController, ThreadHandler,
};
pub use pending::{PendingCommand, PendingCommands};
pub use registry::FunctorRegistry;
pub use router::{CommandRouter, PortId, RouterHandle};
