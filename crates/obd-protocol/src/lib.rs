//! OBD-II Protocol Implementation
//!
//! This crate provides the serial link to ELM327-compatible OBD-II
//! adapters: adapter initialisation, supported-PID discovery and bounded
//! single-PID request/response exchanges. An in-memory adapter simulator
//! is included for running without hardware.

mod connection;
mod elm327;
mod error;
mod pid;
mod protocol;
pub mod simulator;

pub use connection::{LinkConfig, LinkConnection, DEFAULT_BAUD_RATE, DEFAULT_PORT};
pub use elm327::{BoxedTransport, Transport};
pub use error::{ConnectFailure, ConnectionError, ObdError};
pub use pid::{Pid, Reading, SupportedPids, Unit};
pub use protocol::ObdProtocol;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
}
