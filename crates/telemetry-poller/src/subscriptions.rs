//! PID Subscriptions
//!
//! Maps each polled PID to the conversion into display units and the
//! vehicle state field it updates.

use crate::poller::PollerError;
use obd_protocol::{LinkConnection, Pid, Reading};
use std::fmt;
use vehicle_state::units::{to_display_speed, to_int, SpeedUnit};
use vehicle_state::VehicleState;

/// Decoded reading to display value
pub type Converter = fn(&Reading) -> u32;

/// Display value into its state field
pub type Setter = fn(&VehicleState, u32);

/// Converter and setter for one PID
#[derive(Clone, Copy)]
pub struct Route {
    pub pid: Pid,
    convert: Converter,
    store: Setter,
}

impl Route {
    pub fn new(pid: Pid, convert: Converter, store: Setter) -> Self {
        Self {
            pid,
            convert,
            store,
        }
    }

    /// Convert and store a reading, returning the stored display value
    pub fn apply(&self, reading: &Reading, state: &VehicleState) -> u32 {
        let value = (self.convert)(reading);
        (self.store)(state, value);
        value
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("pid", &self.pid).finish_non_exhaustive()
    }
}

fn speed_mph(reading: &Reading) -> u32 {
    to_display_speed(reading.value, SpeedUnit::Kph)
}

fn whole(reading: &Reading) -> u32 {
    to_int(reading.value)
}

/// Fixed set of routes polled for the lifetime of a link
#[derive(Debug, Clone)]
pub struct Subscriptions {
    routes: Box<[Route]>,
}

impl Subscriptions {
    /// Speed, RPM and engine load
    pub fn standard() -> Self {
        Self {
            routes: Box::new([
                Route::new(Pid::Speed, speed_mph, VehicleState::update_speed),
                Route::new(Pid::Rpm, whole, VehicleState::update_rpm),
                Route::new(Pid::EngineLoad, whole, VehicleState::update_load),
            ]),
        }
    }

    /// Build the standard subscriptions for a validated link
    pub fn register(link: &LinkConnection) -> Result<Self, PollerError> {
        if !link.is_live() {
            return Err(PollerError::NotReady(format!("link on {} is not live", link.port())));
        }

        let subscriptions = Self::standard();
        let missing = link.supported().missing(&subscriptions.pids());
        if let Some(pid) = missing.first() {
            return Err(PollerError::NotReady(format!("{} is not supported", pid)));
        }
        Ok(subscriptions)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.routes.iter().map(|route| route.pid).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
