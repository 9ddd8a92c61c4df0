//! Device control for the HistoCore instrument.
//!
//! Device operations are state machines driven by requests and by the
//! asynchronous reports of their hardware drivers. The rack RFID reader is
//! the reference machine: a strictly sequential chain with one shared
//! failure exit.

pub mod commands;
pub mod control;
pub mod error;
pub mod machine;
pub mod rfid;

pub use commands::{CmdReadRackRfid, NotifyRfidReport, NotifyRfidStepTimeout};
pub use control::{DEVICE_CONTROL, DeviceControl, simulated_device_control};
pub use error::DeviceError;
pub use machine::{DeviceStateMachine, Transition};
pub use rfid::{
    ReadRackRfid, RfidOutcome, RfidReading, RfidReport, RfidState, RfidStep, RfidTransceiver,
    SimulatedTransceiver,
};
