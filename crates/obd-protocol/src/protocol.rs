//! OBD-II Protocol Definitions

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Bus protocols selectable on an ELM327 (`ATSP<n>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// ELM327 protocol number
    pub fn id(&self) -> char {
        match self {
            ObdProtocol::Auto => '0',
            ObdProtocol::J1850Pwm => '1',
            ObdProtocol::J1850Vpw => '2',
            ObdProtocol::Iso9141_2 => '3',
            ObdProtocol::Iso14230_4Kwp => '4',
            ObdProtocol::Iso14230_4KwpFast => '5',
            ObdProtocol::Iso15765_4Can11bit500 => '6',
            ObdProtocol::Iso15765_4Can29bit500 => '7',
            ObdProtocol::Iso15765_4Can11bit250 => '8',
            ObdProtocol::Iso15765_4Can29bit250 => '9',
        }
    }

    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.id())
    }
}

impl FromStr for ObdProtocol {
    type Err = ObdError;

    /// Parse an ELM327 protocol number (`"0"`..`"9"`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let protocol = match s.trim() {
            "0" => ObdProtocol::Auto,
            "1" => ObdProtocol::J1850Pwm,
            "2" => ObdProtocol::J1850Vpw,
            "3" => ObdProtocol::Iso9141_2,
            "4" => ObdProtocol::Iso14230_4Kwp,
            "5" => ObdProtocol::Iso14230_4KwpFast,
            "6" => ObdProtocol::Iso15765_4Can11bit500,
            "7" => ObdProtocol::Iso15765_4Can29bit500,
            "8" => ObdProtocol::Iso15765_4Can11bit250,
            "9" => ObdProtocol::Iso15765_4Can29bit250,
            other => return Err(ObdError::UnsupportedProtocol(other.to_string())),
        };
        Ok(protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocol_id() {
        let protocol: ObdProtocol = "6".parse().unwrap();
        assert_eq!(protocol, ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(protocol.to_elm_command(), "ATSP6");
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("A".parse::<ObdProtocol>().is_err());
        assert!("".parse::<ObdProtocol>().is_err());
    }

    #[test]
    fn test_default_is_auto() {
        assert_eq!(ObdProtocol::default().to_elm_command(), "ATSP0");
    }
}
