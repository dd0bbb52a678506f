//! In-process simulated driver.
//!
//! Models a rack of units with real channel accounting (a unit never has more than
//! `channels_total` channels open), a command/response table per unit and fault injection on
//! every driver call. Units are plain `serde` records so they can be described in a
//! configuration file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::{HsmChannel, HsmDevice, HsmSystem};
use crate::error::{DriverError, DriverResult, codes};
use crate::types::{ChannelId, ChannelInfo, KeyGroup, KeyInfo, UnitInfo};

/// Response returned when a command has no entry in the response table
pub const DEFAULT_RESPONSE: &str = "9000";

fn default_version() -> u8 {
    1
}

fn default_channels() -> u16 {
    4
}

fn default_response() -> String {
    DEFAULT_RESPONSE.to_string()
}

/// Description of one simulated unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedUnit {
    /// Serial number
    pub serial_number: u32,
    /// Firmware version
    #[serde(default = "default_version")]
    pub version: u8,
    /// Key structure version
    #[serde(default)]
    pub structure_version: u8,
    /// Channel capacity
    #[serde(default = "default_channels")]
    pub channels_total: u16,
    /// Key inventory
    #[serde(default)]
    pub keys: Vec<KeyInfo>,
    /// Groups present in the inventory that nevertheless refuse to open a channel
    #[serde(default)]
    pub unavailable_groups: Vec<KeyGroup>,
    /// Command (hex) to response (hex) table
    #[serde(default)]
    pub responses: BTreeMap<String, String>,
    /// Response (hex) for commands missing from the table
    #[serde(default = "default_response")]
    pub default_response: String,
    /// Time an open call blocks before answering
    #[serde(default)]
    pub open_delay_ms: u64,
    #[serde(skip)]
    faults: UnitFaults,
}

/// Injected failures for one unit
#[derive(Debug, Clone, Default)]
struct UnitFaults {
    missing_info: bool,
    info: Option<DriverError>,
    keys: Option<DriverError>,
    open: Option<DriverError>,
    open_returns_none: bool,
    exchange: Option<DriverError>,
    null_response: bool,
    close: Option<DriverError>,
}

impl SimulatedUnit {
    /// Unit with default identity, four channels and no keys
    #[must_use]
    pub fn new(serial_number: u32) -> Self {
        Self {
            serial_number,
            version: default_version(),
            structure_version: 0,
            channels_total: default_channels(),
            keys: Vec::new(),
            unavailable_groups: Vec::new(),
            responses: BTreeMap::new(),
            default_response: default_response(),
            open_delay_ms: 0,
            faults: UnitFaults::default(),
        }
    }

    /// Set the firmware version
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Set the key structure version
    pub fn structure_version(mut self, structure_version: u8) -> Self {
        self.structure_version = structure_version;
        self
    }

    /// Set the channel capacity
    pub fn channels(mut self, channels_total: u16) -> Self {
        self.channels_total = channels_total;
        self
    }

    /// Add one key to the inventory
    pub fn key(mut self, key: KeyInfo) -> Self {
        self.keys.push(key);
        self
    }

    /// Add one key per listed group
    pub fn keys_in_groups(mut self, groups: &[u32]) -> Self {
        for group in groups {
            let index = u16::try_from(self.keys.len()).unwrap_or(u16::MAX);
            self.keys.push(KeyInfo {
                index,
                ..KeyInfo::in_group(*group)
            });
        }
        self
    }

    /// Keep `group` in the inventory but refuse channels for it
    pub fn unavailable_group(mut self, group: u32) -> Self {
        self.unavailable_groups.push(KeyGroup(group));
        self
    }

    /// Answer `command` with `response` (both hex)
    pub fn respond(mut self, command: &str, response: &str) -> Self {
        self.responses
            .insert(command.to_ascii_uppercase(), response.to_ascii_uppercase());
        self
    }

    /// Block every open call for `delay`
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Identity query answers `Ok(None)`
    pub fn fail_info_missing(mut self) -> Self {
        self.faults.missing_info = true;
        self
    }

    /// Identity query fails with `code`
    pub fn fail_info(mut self, code: u32) -> Self {
        self.faults.info = Some(DriverError::new(code, "simulated identity failure"));
        self
    }

    /// Key inventory scan fails with `code`
    pub fn fail_keys(mut self, code: u32) -> Self {
        self.faults.keys = Some(DriverError::new(code, "simulated key scan failure"));
        self
    }

    /// Every open call fails with `code`
    pub fn fail_open(mut self, code: u32) -> Self {
        self.faults.open = Some(DriverError::new(code, "simulated open failure"));
        self
    }

    /// Every open call reports success without a channel
    pub fn fail_open_without_channel(mut self) -> Self {
        self.faults.open_returns_none = true;
        self
    }

    /// Every exchange fails with `code`
    pub fn fail_exchange(mut self, code: u32) -> Self {
        self.faults.exchange = Some(DriverError::new(code, "simulated exchange failure"));
        self
    }

    /// Every exchange answers with no data
    pub fn null_responses(mut self) -> Self {
        self.faults.null_response = true;
        self
    }

    /// Every close fails with `code`
    pub fn fail_close(mut self, code: u32) -> Self {
        self.faults.close = Some(DriverError::new(code, "simulated close failure"));
        self
    }

    fn info_record(&self) -> UnitInfo {
        UnitInfo {
            serial_number: self.serial_number,
            version: self.version,
            structure_version: self.structure_version,
            channels_total: self.channels_total,
        }
    }

    fn holds(&self, group: KeyGroup) -> bool {
        self.keys.iter().any(|key| key.key_group == group)
            && !self.unavailable_groups.contains(&group)
    }

    fn response_for(&self, command: &[u8]) -> DriverResult<Vec<u8>> {
        let key = hex::encode_upper(command);
        // Configuration sources may lowercase table keys.
        let response = self
            .responses
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(&key))
            .map_or(&self.default_response, |(_, response)| response);
        hex::decode(response).map_err(|e| {
            DriverError::new(
                codes::GENERIC,
                format!("bad simulated response for {key}: {e}"),
            )
        })
    }
}

#[derive(Debug, Default)]
struct Counters {
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    exchange_calls: AtomicUsize,
}

/// State shared between a device and the channels it opened
#[derive(Debug)]
struct DeviceState {
    unit: SimulatedUnit,
    open_channels: Mutex<BTreeSet<u32>>,
    counters: Counters,
}

impl DeviceState {
    fn reserve_channel(&self) -> DriverResult<ChannelId> {
        let mut open = self.open_channels.lock();
        let free = (0..u32::from(self.unit.channels_total)).find(|id| !open.contains(id));
        match free {
            Some(id) => {
                open.insert(id);
                Ok(ChannelId(id))
            }
            None => Err(DriverError::new(
                codes::NO_CHANNEL,
                format!("all {} channels in use", self.unit.channels_total),
            )),
        }
    }

    fn release_channel(&self, id: ChannelId) -> DriverResult<()> {
        if self.open_channels.lock().remove(&id.0) {
            Ok(())
        } else {
            Err(DriverError::new(
                codes::CHANNEL_CLOSED,
                format!("channel {id} is not open"),
            ))
        }
    }
}

/// Runtime side of a simulated unit, handed out as `Arc<dyn HsmDevice>`
#[derive(Debug)]
pub struct SimulatedDevice {
    state: Arc<DeviceState>,
}

impl SimulatedDevice {
    fn new(unit: SimulatedUnit) -> Self {
        Self {
            state: Arc::new(DeviceState {
                unit,
                open_channels: Mutex::new(BTreeSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Serial number of the unit
    pub fn serial_number(&self) -> u32 {
        self.state.unit.serial_number
    }

    /// Number of `open_channel` calls received
    pub fn open_calls(&self) -> usize {
        self.state.counters.open_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls received
    pub fn close_calls(&self) -> usize {
        self.state.counters.close_calls.load(Ordering::SeqCst)
    }

    /// Number of `exchange` calls received
    pub fn exchange_calls(&self) -> usize {
        self.state.counters.exchange_calls.load(Ordering::SeqCst)
    }

    /// Channels currently open on the unit
    pub fn open_channel_count(&self) -> usize {
        self.state.open_channels.lock().len()
    }
}

impl fmt::Display for SimulatedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIM-HSM[{:08X}]", self.state.unit.serial_number)
    }
}

impl HsmDevice for SimulatedDevice {
    fn info(&self) -> DriverResult<Option<UnitInfo>> {
        let unit = &self.state.unit;
        if let Some(err) = &unit.faults.info {
            return Err(err.clone());
        }
        if unit.faults.missing_info {
            return Ok(None);
        }
        Ok(Some(unit.info_record()))
    }

    fn keys(&self) -> DriverResult<Vec<KeyInfo>> {
        let unit = &self.state.unit;
        match &unit.faults.keys {
            Some(err) => Err(err.clone()),
            None => Ok(unit.keys.clone()),
        }
    }

    fn open_channel(&self, key_group: KeyGroup) -> DriverResult<Option<Box<dyn HsmChannel>>> {
        let unit = &self.state.unit;
        self.state.counters.open_calls.fetch_add(1, Ordering::SeqCst);
        if unit.open_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(unit.open_delay_ms));
        }

        if let Some(err) = &unit.faults.open {
            return Err(err.clone());
        }
        if unit.faults.open_returns_none {
            return Ok(None);
        }
        if !unit.holds(key_group) {
            return Err(DriverError::key_group_unavailable(format!(
                "key group {key_group} not available on {self}"
            )));
        }

        let id = self.state.reserve_channel()?;
        trace!("{} opened channel {} for group {}", self, id, key_group);
        Ok(Some(Box::new(SimulatedChannel {
            id,
            key_group,
            device: Arc::clone(&self.state),
            buffer: Vec::new(),
            closed: false,
        })))
    }
}

/// Channel opened by a [`SimulatedDevice`]
#[derive(Debug)]
pub struct SimulatedChannel {
    id: ChannelId,
    key_group: KeyGroup,
    device: Arc<DeviceState>,
    buffer: Vec<u8>,
    closed: bool,
}

impl HsmChannel for SimulatedChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id,
            key_group: self.key_group,
            unit_serial: self.device.unit.serial_number,
        }
    }

    fn exchange(&mut self, command: &[u8]) -> DriverResult<Option<&[u8]>> {
        self.device
            .counters
            .exchange_calls
            .fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(DriverError::new(
                codes::CHANNEL_CLOSED,
                format!("channel {} is closed", self.id),
            ));
        }
        let unit = &self.device.unit;
        if let Some(err) = &unit.faults.exchange {
            return Err(err.clone());
        }
        if unit.faults.null_response {
            return Ok(None);
        }

        let response = unit.response_for(command)?;
        self.buffer.clear();
        self.buffer.extend_from_slice(&response);
        Ok(Some(self.buffer.as_slice()))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.device
            .counters
            .close_calls
            .fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.device.unit.faults.close {
            return Err(err.clone());
        }
        self.device.release_channel(self.id)?;
        self.closed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SystemFaults {
    initialize: Option<DriverError>,
    units: Option<DriverError>,
    free: Option<DriverError>,
}

/// Simulated system-level handle
#[derive(Debug)]
pub struct SimulatedSystem {
    devices: Vec<Arc<SimulatedDevice>>,
    initialized: Mutex<bool>,
    faults: SystemFaults,
    initialize_calls: AtomicUsize,
    free_calls: AtomicUsize,
}

impl SimulatedSystem {
    /// System exposing `units` in the given order
    #[must_use]
    pub fn new(units: impl IntoIterator<Item = SimulatedUnit>) -> Self {
        Self {
            devices: units
                .into_iter()
                .map(|unit| Arc::new(SimulatedDevice::new(unit)))
                .collect(),
            initialized: Mutex::new(false),
            faults: SystemFaults::default(),
            initialize_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
        }
    }

    /// `initialize` fails with `code`
    pub fn fail_initialize(mut self, code: u32) -> Self {
        self.faults.initialize = Some(DriverError::new(code, "simulated initialize failure"));
        self
    }

    /// `units` fails with `code`
    pub fn fail_units(mut self, code: u32) -> Self {
        self.faults.units = Some(DriverError::new(code, "simulated enumeration failure"));
        self
    }

    /// `free` fails with `code`
    pub fn fail_free(mut self, code: u32) -> Self {
        self.faults.free = Some(DriverError::new(code, "simulated free failure"));
        self
    }

    /// Device with the given serial number
    pub fn device(&self, serial_number: u32) -> Option<Arc<SimulatedDevice>> {
        self.devices
            .iter()
            .find(|device| device.serial_number() == serial_number)
            .cloned()
    }

    /// Whether the system handle is currently initialized
    pub fn is_initialized(&self) -> bool {
        *self.initialized.lock()
    }

    /// Number of `initialize` calls received
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Number of `free` calls received
    pub fn free_calls(&self) -> usize {
        self.free_calls.load(Ordering::SeqCst)
    }

    /// Total `open_channel` calls across all units
    pub fn total_open_calls(&self) -> usize {
        self.devices.iter().map(|device| device.open_calls()).sum()
    }
}

impl HsmSystem for SimulatedSystem {
    fn initialize(&self) -> DriverResult<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.faults.initialize {
            return Err(err.clone());
        }
        *self.initialized.lock() = true;
        Ok(())
    }

    fn free(&self) -> DriverResult<()> {
        self.free_calls.fetch_add(1, Ordering::SeqCst);
        *self.initialized.lock() = false;
        match &self.faults.free {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn units(&self) -> DriverResult<Vec<Arc<dyn HsmDevice>>> {
        if !self.is_initialized() {
            return Err(DriverError::new(
                codes::NOT_INITIALIZED,
                "system not initialized",
            ));
        }
        if let Some(err) = &self.faults.units {
            return Err(err.clone());
        }
        Ok(self
            .devices
            .iter()
            .map(|device| Arc::clone(device) as Arc<dyn HsmDevice>)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_accounting() {
        let system = SimulatedSystem::new([SimulatedUnit::new(1).channels(1).keys_in_groups(&[2])]);
        let device = system.device(1).unwrap();

        let mut first = device.open_channel(KeyGroup(2)).unwrap().unwrap();
        let err = device.open_channel(KeyGroup(2)).unwrap_err();
        assert_eq!(err.code, codes::NO_CHANNEL);

        first.close().unwrap();
        assert_eq!(device.open_channel_count(), 0);
        assert!(device.open_channel(KeyGroup(2)).unwrap().is_some());
    }

    #[test]
    fn test_unknown_group_is_key_group_error() {
        let system = SimulatedSystem::new([SimulatedUnit::new(1).keys_in_groups(&[2])]);
        let device = system.device(1).unwrap();
        let err = device.open_channel(KeyGroup(9)).unwrap_err();
        assert!(err.is_key_group_unavailable());
    }

    #[test]
    fn test_response_table() {
        let system = SimulatedSystem::new([SimulatedUnit::new(1)
            .keys_in_groups(&[0])
            .respond("00a4", "6a82")]);
        let device = system.device(1).unwrap();
        let mut channel = device.open_channel(KeyGroup(0)).unwrap().unwrap();

        assert_eq!(
            channel.exchange(&[0x00, 0xA4]).unwrap(),
            Some(&[0x6A, 0x82][..])
        );
        assert_eq!(channel.exchange(&[0x80]).unwrap(), Some(&[0x90, 0x00][..]));
    }
}
