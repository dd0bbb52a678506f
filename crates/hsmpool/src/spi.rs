//! Capabilities exposed to the host reader framework.

use std::fmt;

use bytes::Bytes;

use crate::error::{PoolResult, ReaderResult};

/// A contact reader with a card inserted, as seen by the host framework
pub trait CardReader: Send + fmt::Debug {
    /// Reader name, unique for the lifetime of the process
    fn name(&self) -> &str;

    /// Open the physical channel
    fn open_physical_channel(&mut self);

    /// Close the physical channel
    fn close_physical_channel(&mut self);

    /// Whether the physical channel is open
    fn is_physical_channel_open(&self) -> bool;

    /// Whether a card is present
    fn check_card_presence(&self) -> bool;

    /// Power-on data of the card
    fn power_on_data(&self) -> &[u8];

    /// Send one APDU and return the response, `None` meaning "no data"
    fn transmit_apdu(&mut self, apdu: &[u8]) -> ReaderResult<Option<Bytes>>;

    /// Whether the reader talks to a contactless medium
    fn is_contactless(&self) -> bool;

    /// Called when the host framework drops the reader
    fn on_unregister(&mut self);
}

/// A pool handing out readers by group reference
pub trait PoolPlugin: Send + Sync {
    /// Reader type produced by the pool
    type Reader: CardReader;

    /// Pool name
    fn name(&self) -> &str;

    /// Available group references, ascending
    fn reader_group_references(&self) -> Vec<String>;

    /// Allocate a reader serving `group_reference`
    fn allocate_reader(&self, group_reference: Option<&str>) -> PoolResult<Self::Reader>;

    /// Release a reader obtained from [`allocate_reader`](Self::allocate_reader).
    ///
    /// A missing reader is logged and ignored.
    fn release_reader(&self, reader: Option<&mut Self::Reader>) -> PoolResult<()>;

    /// Called when the host framework drops the pool
    fn on_unregister(&self);
}
