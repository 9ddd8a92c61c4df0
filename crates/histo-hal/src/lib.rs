//! Embedded hardware abstraction for the HistoCore controller boards.
//!
//! Provides:
//! - The interrupt vector table and master dispatch routine over an
//!   interrupt controller
//! - Firmware error codes and their descriptions
//! - A simulated interrupt controller for host builds

pub mod error;
pub mod interrupt;
pub mod sim;

pub use error::{codes, error_string, ErrorCategory, ErrorCode, HalError, Result};
pub use interrupt::{
    Dispatch, InterruptController, InterruptHandler, InterruptId, InterruptTable, VECTOR_COUNT,
};
pub use sim::SimulatedPie;
