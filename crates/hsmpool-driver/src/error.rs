//! Driver error taxonomy.
//!
//! Every driver call reports failures as a [`DriverError`]: the vendor's numeric result code
//! plus its message. Callers never parse codes themselves; they branch on
//! [`DriverError::kind`], which maps the code table below onto an explicit enumerated reason.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Numeric result codes reported by the driver.
pub mod codes {
    /// Unspecified device failure
    pub const GENERIC: u32 = 0x01;
    /// The system handle has not been initialized (or was already freed)
    pub const NOT_INITIALIZED: u32 = 0x02;
    /// No unit answered the enumeration
    pub const NO_UNIT: u32 = 0x03;
    /// The requested key group is not available on this unit now
    pub const KEY_GROUP: u32 = 0x14;
    /// Every channel of the unit is in use
    pub const NO_CHANNEL: u32 = 0x15;
    /// The channel was already closed
    pub const CHANNEL_CLOSED: u32 = 0x16;
    /// Communication with the unit failed
    pub const IO: u32 = 0x20;
}

/// Enumerated reason behind a [`DriverError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// The unit holds no usable key of the requested group at the moment
    KeyGroupUnavailable,
    /// The unit has no free channel left
    NoChannelAvailable,
    /// The system handle is not initialized
    NotInitialized,
    /// No unit is attached
    NoUnit,
    /// The channel is already closed
    ChannelClosed,
    /// Any other device or communication failure
    Device,
}

impl DriverErrorKind {
    /// Classify a raw driver result code
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            codes::KEY_GROUP => Self::KeyGroupUnavailable,
            codes::NO_CHANNEL => Self::NoChannelAvailable,
            codes::NOT_INITIALIZED => Self::NotInitialized,
            codes::NO_UNIT => Self::NoUnit,
            codes::CHANNEL_CLOSED => Self::ChannelClosed,
            _ => Self::Device,
        }
    }

    /// Get a human-readable description of this error kind
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::KeyGroupUnavailable => "key group unavailable on this unit",
            Self::NoChannelAvailable => "no channel available",
            Self::NotInitialized => "driver not initialized",
            Self::NoUnit => "no unit attached",
            Self::ChannelClosed => "channel closed",
            Self::Device => "device failure",
        }
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error reported by the hardware driver
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("driver error result={code:02X} ({message})")]
pub struct DriverError {
    /// Raw result code, preserved for diagnostics
    pub code: u32,
    /// Driver message, preserved for diagnostics
    pub message: String,
}

impl DriverError {
    /// Create a new driver error
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Enumerated reason derived from the result code
    #[must_use]
    pub const fn kind(&self) -> DriverErrorKind {
        DriverErrorKind::from_code(self.code)
    }

    /// Whether the failure only means "this unit cannot serve the key group right now"
    #[must_use]
    pub const fn is_key_group_unavailable(&self) -> bool {
        matches!(self.kind(), DriverErrorKind::KeyGroupUnavailable)
    }

    /// Shorthand for a [`codes::KEY_GROUP`] error
    pub fn key_group_unavailable(message: impl Into<String>) -> Self {
        Self::new(codes::KEY_GROUP, message)
    }

    /// Shorthand for a [`codes::IO`] error
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(codes::IO, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            DriverErrorKind::from_code(codes::KEY_GROUP),
            DriverErrorKind::KeyGroupUnavailable
        );
        assert_eq!(
            DriverErrorKind::from_code(codes::NO_CHANNEL),
            DriverErrorKind::NoChannelAvailable
        );
        assert_eq!(DriverErrorKind::from_code(0xFFFF), DriverErrorKind::Device);
    }

    #[test]
    fn test_display_keeps_code_and_message() {
        let err = DriverError::new(0x2A, "bus timeout");
        assert_eq!(err.to_string(), "driver error result=2A (bus timeout)");
        assert!(!err.is_key_group_unavailable());
        assert!(DriverError::key_group_unavailable("group 3").is_key_group_unavailable());
    }
}
