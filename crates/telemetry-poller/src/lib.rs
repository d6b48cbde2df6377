//! Telemetry Poller for OBD-II Live Data
//!
//! Repeatedly requests the subscribed PIDs over a validated link, routes
//! each decoded reading into the shared vehicle state, and raises the
//! shared shutdown signal when the link is lost.

mod poller;
mod shutdown;
mod subscriptions;

pub use poller::{PollStats, PollerConfig, PollerError, TelemetryPoller};
pub use shutdown::{Shutdown, ShutdownReason};
pub use subscriptions::{Route, Subscriptions};
