//! Pool and reader error types.
//!
//! Driver failures are never flattened into strings: every variant that stems from a driver
//! call keeps the original [`DriverError`] (code and message) as its source.

use hsmpool_driver::{DriverError, KeyGroup};
use thiserror::Error;

/// Result type for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Result type for reader operations
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

/// Errors raised by a virtual reader
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// Exchange or close failed against the open channel
    #[error("Channel I/O error during {operation} on reader {reader}: {source}")]
    ChannelIo {
        /// Name of the reader
        reader: String,
        /// Operation that failed
        operation: &'static str,
        /// Driver failure
        #[source]
        source: DriverError,
    },

    /// The reader was released and no longer owns a channel
    #[error("Reader {reader} has been released")]
    ChannelReleased {
        /// Name of the reader
        reader: String,
    },
}

impl ReaderError {
    /// Driver error behind this failure, if any
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::ChannelIo { source, .. } => Some(source),
            Self::ChannelReleased { .. } => None,
        }
    }
}

/// Errors raised by the pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The driver could not start, reported no unit, or a unit could not be indexed
    #[error("Unable to initialize the HSM pool: {reason}")]
    Initialization {
        /// What went wrong
        reason: String,
        /// Driver failure, when the driver reported one
        #[source]
        source: Option<DriverError>,
    },

    /// The group reference is present but is not a key-group identifier
    #[error("Bad group reference string: '{reference}'")]
    InvalidArgument {
        /// Reference as given by the caller
        reference: String,
    },

    /// No unit can serve the key group
    #[error("The requested key group reference {group} is not available")]
    ResourceUnavailable {
        /// Requested group
        group: KeyGroup,
    },

    /// A unit failed for a reason other than key-group availability
    #[error("Unable to allocate a channel for key group {group} on {unit}: {reason}")]
    Allocation {
        /// Display name of the failing unit
        unit: String,
        /// Requested group
        group: KeyGroup,
        /// What went wrong
        reason: String,
        /// Driver failure, absent when the driver returned no channel
        #[source]
        source: Option<DriverError>,
    },

    /// Closing the reader's channel failed
    #[error("A reader error occurred while releasing {reader}")]
    Release {
        /// Name of the reader
        reader: String,
        /// Reader failure
        #[source]
        source: ReaderError,
    },

    /// The system-level driver handle could not be released
    #[error("Unable to free the HSM client: {source}")]
    Shutdown {
        /// Driver failure
        #[source]
        source: DriverError,
    },
}

impl PoolError {
    /// Whether the pool is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Initialization { .. })
    }

    /// Whether this is an ordinary runtime condition the caller is expected to handle
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. } | Self::ResourceUnavailable { .. }
        )
    }

    /// Driver error behind this failure, if any
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Initialization { source, .. } | Self::Allocation { source, .. } => {
                source.as_ref()
            }
            Self::Release { source, .. } => source.driver_error(),
            Self::Shutdown { source } => Some(source),
            Self::InvalidArgument { .. } | Self::ResourceUnavailable { .. } => None,
        }
    }

    /// Driver result code behind this failure, if any
    pub fn driver_code(&self) -> Option<u32> {
        self.driver_error().map(|err| err.code)
    }

    pub(crate) fn initialization(reason: impl Into<String>, source: DriverError) -> Self {
        Self::Initialization {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmpool_driver::codes;

    #[test]
    fn test_error_classification() {
        let init = PoolError::initialization("no unit", DriverError::new(codes::NO_UNIT, "none"));
        assert!(init.is_fatal());
        assert!(!init.is_expected());
        assert_eq!(init.driver_code(), Some(codes::NO_UNIT));

        let unavailable = PoolError::ResourceUnavailable { group: KeyGroup(3) };
        assert!(unavailable.is_expected());
        assert!(!unavailable.is_fatal());
        assert_eq!(unavailable.driver_code(), None);

        let invalid = PoolError::InvalidArgument {
            reference: "x".to_string(),
        };
        assert!(invalid.is_expected());
    }

    #[test]
    fn test_release_error_keeps_driver_code() {
        let err = PoolError::Release {
            reader: "r".to_string(),
            source: ReaderError::ChannelIo {
                reader: "r".to_string(),
                operation: "close",
                source: DriverError::new(codes::IO, "bus reset"),
            },
        };
        assert_eq!(err.driver_code(), Some(codes::IO));
        assert!(!err.is_fatal());
        assert!(!err.is_expected());
    }

    #[test]
    fn test_messages() {
        let err = PoolError::ResourceUnavailable { group: KeyGroup(12) };
        assert_eq!(
            err.to_string(),
            "The requested key group reference 12 is not available"
        );

        let err = PoolError::InvalidArgument {
            reference: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Bad group reference string: 'abc'");
    }
}
