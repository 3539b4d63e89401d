//! Door state derived from a raw digital level.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Raw level read from a digital input. Only `0` and `1` are valid.
pub type RawLevel = u8;

/// Confirmed state of the door contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum DoorState {
    Open,
    Closed,
}

impl DoorState {
    /// Map a raw level to a door state: `open_level` means open, anything else closed.
    pub fn from_level(level: RawLevel, open_level: RawLevel) -> Self {
        if level == open_level {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_from_level_respects_open_level() {
        assert_eq!(DoorState::from_level(1, 1), DoorState::Open);
        assert_eq!(DoorState::from_level(0, 1), DoorState::Closed);

        // Active-low wiring
        assert_eq!(DoorState::from_level(0, 0), DoorState::Open);
        assert_eq!(DoorState::from_level(1, 0), DoorState::Closed);
    }

    #[test]
    fn test_display_and_parse() {
        assert_eq!(DoorState::Open.to_string(), "OPEN");
        assert_eq!(DoorState::Closed.to_string(), "CLOSED");
        assert_eq!(DoorState::from_str("OPEN").unwrap(), DoorState::Open);
        assert!(DoorState::from_str("ajar").is_err());
    }
}
