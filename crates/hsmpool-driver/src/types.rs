//! Records exchanged across the driver boundary

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logical key-group identifier partitioning keys across units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyGroup(pub u32);

impl KeyGroup {
    /// The ambient group used when no reference is given
    pub const DEFAULT: Self = Self(0);

    /// Raw identifier
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for KeyGroup {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for KeyGroup {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(Self)
    }
}

impl fmt::Display for KeyGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity record of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Serial number
    pub serial_number: u32,
    /// Firmware version
    pub version: u8,
    /// Version of the on-unit key structure
    pub structure_version: u8,
    /// Total number of channels the unit can open at once
    pub channels_total: u16,
}

impl fmt::Display for UnitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Serial number: {:08X}, Version: {}, Structure version: {}, Max channels: {}",
            self.serial_number, self.version, self.structure_version, self.channels_total
        )
    }
}

/// One entry of a unit's key inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Group the key belongs to
    pub key_group: KeyGroup,
    /// Slot index of the key inside the unit
    #[serde(default)]
    pub index: u16,
    /// Key identifier
    #[serde(default)]
    pub kif: u8,
    /// Key version
    #[serde(default)]
    pub kvc: u8,
    /// Algorithm identifier
    #[serde(default)]
    pub algorithm: u8,
}

impl KeyInfo {
    /// Column header matching the [`Display`](fmt::Display) layout
    pub const HEADER: &'static str = "Group Index KIF KVC Alg";

    /// Key of `key_group` with all other fields zeroed
    #[must_use]
    pub const fn in_group(key_group: u32) -> Self {
        Self {
            key_group: KeyGroup(key_group),
            index: 0,
            kif: 0,
            kvc: 0,
            algorithm: 0,
        }
    }
}

impl fmt::Display for KeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5} {:>5}  {:02X}  {:02X}  {:02X}",
            self.key_group, self.index, self.kif, self.kvc, self.algorithm
        )
    }
}

/// Channel identifier, unique per unit while the channel is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic description of an open channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel identifier
    pub id: ChannelId,
    /// Group the channel was opened for
    pub key_group: KeyGroup,
    /// Serial number of the owning unit
    pub unit_serial: u32,
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "channel={} group={} unit={:08X}",
            self.id, self.key_group, self.unit_serial
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_group_parse() {
        assert_eq!("7".parse::<KeyGroup>().ok(), Some(KeyGroup(7)));
        assert!("-1".parse::<KeyGroup>().is_err());
        assert!("abc".parse::<KeyGroup>().is_err());
        assert_eq!(KeyGroup(12).to_string(), "12");
    }

    #[test]
    fn test_unit_info_display() {
        let info = UnitInfo {
            serial_number: 0x00AB_CDEF,
            version: 3,
            structure_version: 1,
            channels_total: 8,
        };
        assert_eq!(
            info.to_string(),
            "Serial number: 00ABCDEF, Version: 3, Structure version: 1, Max channels: 8"
        );
    }
}
