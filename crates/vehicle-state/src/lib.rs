//! Shared Vehicle State
//!
//! Provides the lock-free record the telemetry poller writes and the
//! render loop reads, plus the conversions into display units.

mod state;
pub mod units;

pub use state::VehicleState;
pub use units::SpeedUnit;

use serde::{Deserialize, Serialize};

/// Point-in-time copy of the vehicle state handed to the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Vehicle speed (mph)
    pub speed: u32,
    /// Engine RPM
    pub rpm: u32,
    /// Engine load (0-100%)
    pub load: u32,
}
