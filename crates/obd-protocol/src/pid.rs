//! OBD-II PID Definitions and Response Parsing
//!
//! Defines the Mode 01 Parameter IDs (PIDs) the dashboard polls and their
//! decoding formulas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mode 01 PIDs polled by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
}

impl Pid {
    /// Every PID the dashboard needs from the vehicle
    pub const REQUIRED: [Pid; 3] = [Pid::Speed, Pid::Rpm, Pid::EngineLoad];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Look up a PID by its hex value
    pub fn from_hex(code: u8) -> Option<Self> {
        match code {
            0x04 => Some(Pid::EngineLoad),
            0x0C => Some(Pid::Rpm),
            0x0D => Some(Pid::Speed),
            _ => None,
        }
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm => 2,
            _ => 1,
        }
    }

    /// Unit of the decoded value
    pub fn unit(&self) -> Unit {
        match self {
            Pid::EngineLoad => Unit::Percent,
            Pid::Rpm => Unit::Rpm,
            Pid::Speed => Unit::Kph,
        }
    }

    /// ELM327 request string (mode 01)
    pub fn command(&self) -> String {
        format!("{:02X}{:02X}", crate::mode::CURRENT_DATA, self.as_hex())
    }

    /// Short name for logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "engine_load",
            Pid::Rpm => "rpm",
            Pid::Speed => "speed",
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:02X})", self.name(), self.as_hex())
    }
}

/// Physical unit attached to a decoded reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Kilometres per hour
    Kph,
    /// Revolutions per minute
    Rpm,
    /// Percentage (0-100)
    Percent,
}

/// A decoded PID value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// The PID that was queried
    pub pid: Pid,
    /// Decoded magnitude
    pub value: f64,
    /// Unit of `value`
    pub unit: Unit,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
    /// Data bytes from the response (after the mode/PID echo)
    pub raw_bytes: Vec<u8>,
}

impl Reading {
    /// Build a reading from an already-decoded magnitude
    pub fn new(pid: Pid, value: f64) -> Self {
        Self {
            pid,
            value,
            unit: pid.unit(),
            timestamp_ms: 0,
            raw_bytes: Vec::new(),
        }
    }

    /// Decode raw data bytes using the PID formula.
    ///
    /// Returns `None` if fewer bytes arrived than the PID needs.
    pub fn decode(pid: Pid, raw_bytes: Vec<u8>, timestamp_ms: u64) -> Option<Self> {
        let value = Self::decode_value(pid, &raw_bytes)?;
        Some(Self {
            pid,
            value,
            unit: pid.unit(),
            timestamp_ms,
            raw_bytes,
        })
    }

    fn decode_value(pid: Pid, bytes: &[u8]) -> Option<f64> {
        if bytes.len() < pid.response_bytes() {
            return None;
        }
        let value = match pid {
            // Engine Load: A * 100 / 255 (%)
            Pid::EngineLoad => bytes[0] as f64 * 100.0 / 255.0,
            // RPM: ((A*256)+B)/4
            Pid::Rpm => ((bytes[0] as f64 * 256.0) + bytes[1] as f64) / 4.0,
            // Speed: A (km/h)
            Pid::Speed => bytes[0] as f64,
        };
        Some(value)
    }
}

/// Supported-PID bitmap for PIDs 0x01-0x20, as answered to `0100`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPids(u32);

impl SupportedPids {
    /// Wrap the four data bytes A..D of a `41 00` response
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Build a bitmap advertising exactly `pids`
    pub fn from_pids(pids: &[Pid]) -> Self {
        Self(pids.iter().fold(0, |mask, pid| mask | Self::bit(pid.as_hex())))
    }

    /// Raw bitmap
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Bitmap as the four response bytes
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Check whether a PID is advertised
    pub fn contains(&self, pid: Pid) -> bool {
        self.0 & Self::bit(pid.as_hex()) != 0
    }

    /// Check whether every PID in `pids` is advertised
    pub fn contains_all(&self, pids: &[Pid]) -> bool {
        pids.iter().all(|pid| self.contains(*pid))
    }

    /// PIDs from `pids` that are not advertised
    pub fn missing(&self, pids: &[Pid]) -> Vec<Pid> {
        pids.iter().copied().filter(|pid| !self.contains(*pid)).collect()
    }

    /// Number of advertised PIDs
    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    // Bit 31 is PID 0x01, bit 0 is PID 0x20.
    fn bit(code: u8) -> u32 {
        match code {
            0x01..=0x20 => 1 << (0x20 - code as u32),
            _ => 0,
        }
    }
}
