//! Display Unit Conversion

use serde::{Deserialize, Serialize};

/// Kilometres per hour to miles per hour
pub const KPH_TO_MPH: f64 = 0.621371;

/// Unit a speed magnitude is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    Kph,
    Mph,
}

/// Convert a speed to whole display miles per hour, truncating toward zero
pub fn to_display_speed(magnitude: f64, unit: SpeedUnit) -> u32 {
    match unit {
        SpeedUnit::Kph => to_int(magnitude * KPH_TO_MPH),
        SpeedUnit::Mph => to_int(magnitude),
    }
}

/// Truncate toward zero. Negative values and NaN saturate to 0.
pub fn to_int(magnitude: f64) -> u32 {
    magnitude as u32
}
