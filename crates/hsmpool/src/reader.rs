//! Virtual reader wrapping one allocated channel.
//!
//! The reader owns the channel handle outright. The channel counts as open from the moment
//! allocation succeeded until [`HsmPool::release_reader`](crate::HsmPool) (or drop) closes it;
//! the open/close physical channel calls of [`CardReader`] do not change that state.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hsmpool_driver::{ChannelId, HsmChannel, KeyGroup};
use tracing::{trace, warn};

use crate::atr::VirtualAtr;
use crate::error::{ReaderError, ReaderResult};
use crate::index::{UnitEntry, UnitId};
use crate::spi::CardReader;

/// Reader backed by one channel on one unit
#[derive(Debug)]
pub struct HsmReader {
    name: String,
    unit: UnitId,
    channel_id: ChannelId,
    key_group: KeyGroup,
    allocated_at: DateTime<Utc>,
    atr: VirtualAtr,
    channel: Option<Box<dyn HsmChannel>>,
}

impl HsmReader {
    pub(crate) fn new(unit: &UnitEntry, key_group: KeyGroup, channel: Box<dyn HsmChannel>) -> Self {
        let allocated_at = Utc::now();
        let channel_id = channel.id();
        let name = format!(
            "{} Ch. #{} {}",
            unit.display_name(),
            channel_id,
            allocated_at.timestamp_millis()
        );
        let atr = VirtualAtr::new(unit.info());
        trace!(
            "Creation of a HSM SAM reader. CHANNEL = {}, VIRTUAL ATR = {}",
            channel.info(),
            atr
        );

        Self {
            name,
            unit: unit.id(),
            channel_id,
            key_group,
            allocated_at,
            atr,
            channel: Some(channel),
        }
    }

    /// Unit the channel was opened on
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Driver channel identifier
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Group the channel was opened for
    pub fn key_group(&self) -> KeyGroup {
        self.key_group
    }

    /// Allocation time
    pub fn allocated_at(&self) -> DateTime<Utc> {
        self.allocated_at
    }

    /// Virtual power-on data
    pub fn atr(&self) -> &VirtualAtr {
        &self.atr
    }

    /// Close the underlying channel. Only the first call reaches the driver; the reader is
    /// unusable afterwards whether or not the close succeeded.
    pub(crate) fn free_channel(&mut self) -> ReaderResult<()> {
        trace!("Free reader channel request.");
        let Some(mut channel) = self.channel.take() else {
            trace!("Reader {} has no channel left to free.", self.name);
            return Ok(());
        };
        channel.close().map_err(|source| ReaderError::ChannelIo {
            reader: self.name.clone(),
            operation: "close",
            source,
        })
    }
}

impl CardReader for HsmReader {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_physical_channel(&mut self) {
        trace!("Open physical channel requested.");
    }

    fn close_physical_channel(&mut self) {
        trace!("Close physical channel requested.");
    }

    fn is_physical_channel_open(&self) -> bool {
        self.channel.is_some()
    }

    fn check_card_presence(&self) -> bool {
        trace!("Check card presence requested.");
        true
    }

    fn power_on_data(&self) -> &[u8] {
        trace!("Get power on requested. ATR = {}", self.atr);
        self.atr.as_bytes()
    }

    fn transmit_apdu(&mut self, apdu: &[u8]) -> ReaderResult<Option<Bytes>> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(ReaderError::ChannelReleased {
                reader: self.name.clone(),
            });
        };
        trace!("APDU_REQ = {}", hex::encode_upper(apdu));

        match channel.exchange(apdu) {
            Ok(Some(response)) => {
                trace!("APDU_RSP = {}", hex::encode_upper(response));
                Ok(Some(Bytes::copy_from_slice(response)))
            }
            Ok(None) => {
                trace!("APDU_RSP = <none>");
                Ok(None)
            }
            Err(source) => Err(ReaderError::ChannelIo {
                reader: self.name.clone(),
                operation: "exchange",
                source,
            }),
        }
    }

    fn is_contactless(&self) -> bool {
        false
    }

    fn on_unregister(&mut self) {}
}

impl Drop for HsmReader {
    fn drop(&mut self) {
        if self.channel.is_some() {
            warn!("Reader {} dropped without release, closing its channel", self.name);
            if let Err(e) = self.free_channel() {
                warn!("Forced close of {} failed: {}", self.name, e);
            }
        }
    }
}
