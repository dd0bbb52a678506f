//! Driver traits consumed by the pool.
//!
//! All calls are synchronous and may block on the hardware. Implementations must be safe to
//! call from several threads at once; the driver owns its own channel accounting.

use std::fmt;
use std::sync::Arc;

use crate::error::DriverResult;
use crate::types::{ChannelId, ChannelInfo, KeyGroup, KeyInfo, UnitInfo};

/// System-level driver handle
pub trait HsmSystem: Send + Sync + fmt::Debug {
    /// Initialize the driver. Must succeed before any other call.
    fn initialize(&self) -> DriverResult<()>;

    /// Release the driver and everything it allocated
    fn free(&self) -> DriverResult<()>;

    /// Enumerate attached units
    fn units(&self) -> DriverResult<Vec<Arc<dyn HsmDevice>>>;
}

/// One physical unit. `Display` renders the unit's display name.
pub trait HsmDevice: Send + Sync + fmt::Debug + fmt::Display {
    /// Identity record. `Ok(None)` breaks the driver contract.
    fn info(&self) -> DriverResult<Option<UnitInfo>>;

    /// Key inventory
    fn keys(&self) -> DriverResult<Vec<KeyInfo>>;

    /// Open a channel scoped to `key_group`.
    ///
    /// Fails with [`KeyGroupUnavailable`](crate::DriverErrorKind::KeyGroupUnavailable) when the
    /// unit cannot serve the group right now.
    fn open_channel(&self, key_group: KeyGroup) -> DriverResult<Option<Box<dyn HsmChannel>>>;
}

/// An open channel on one unit
pub trait HsmChannel: Send + fmt::Debug {
    /// Channel identifier
    fn id(&self) -> ChannelId;

    /// Diagnostic description
    fn info(&self) -> ChannelInfo;

    /// Exchange one command. The response borrows a driver buffer that the next call reuses.
    fn exchange(&mut self, command: &[u8]) -> DriverResult<Option<&[u8]>>;

    /// Close the channel, handing it back to the driver
    fn close(&mut self) -> DriverResult<()>;
}
