//! Resource pool manager.
//!
//! Construction is the whole initialization: [`HsmPoolBuilder::build`] starts the driver,
//! enumerates every unit and indexes its key groups. A builder that failed leaves no pool
//! behind, so a pool value is always ready to allocate.
//!
//! Allocation reads the immutable index without locking and calls the driver (which may
//! block) outside of any lock. The pool keeps no reference to the readers it hands out: a
//! reader that is never released keeps its channel until it is dropped.

use std::collections::BTreeSet;
use std::sync::Arc;

use hsmpool_driver::{DriverErrorKind, HsmDevice, HsmSystem, KeyGroup, KeyInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::index::{KeyGroupIndex, UnitEntry};
use crate::reader::HsmReader;
use crate::spi::{CardReader, PoolPlugin};

/// Allocation counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Readers handed out
    pub allocations: u64,
    /// Allocation requests that failed
    pub failed_allocations: u64,
    /// Allocations served by a unit other than the first candidate
    pub fallbacks: u64,
    /// Channels closed through release
    pub releases: u64,
    /// Releases whose close failed
    pub failed_releases: u64,
}

/// Builder running the pool initialization
#[derive(Debug)]
pub struct HsmPoolBuilder {
    system: Arc<dyn HsmSystem>,
    config: PoolConfig,
}

impl HsmPoolBuilder {
    /// Builder over a driver system handle
    pub fn new(system: Arc<dyn HsmSystem>) -> Self {
        Self {
            system,
            config: PoolConfig::default(),
        }
    }

    /// Use `config` instead of the default configuration
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Initialize the driver and index every unit.
    ///
    /// Any failure after the driver started frees the system handle before returning.
    pub fn build(self) -> PoolResult<HsmPool> {
        trace!("Initializing HSM client...");
        if let Err(e) = self.system.initialize() {
            try_free(self.system.as_ref());
            return Err(PoolError::initialization(
                "unable to initialize the HSM client",
                e,
            ));
        }

        let index = match scan_units(self.system.as_ref(), &self.config) {
            Ok(index) => index,
            Err(e) => {
                try_free(self.system.as_ref());
                return Err(e);
            }
        };
        debug!(
            "{} ready: {} unit(s), {} key group(s)",
            self.config.name,
            index.units().len(),
            index.len()
        );

        Ok(HsmPool {
            config: self.config,
            system: self.system,
            index: Arc::new(index),
            stats: RwLock::new(PoolStats::default()),
        })
    }
}

/// Frees the driver, logging instead of failing
fn try_free(system: &dyn HsmSystem) {
    debug!("Freeing the HSM...");
    if let Err(e) = system.free() {
        error!(
            "HSM Error: Could not free: result={:02X} ({})",
            e.code, e.message
        );
    }
}

fn scan_units(system: &dyn HsmSystem, config: &PoolConfig) -> PoolResult<KeyGroupIndex> {
    let units = system
        .units()
        .map_err(|e| PoolError::initialization("unable to get the list of units", e))?;
    trace!("Unit list size = {}", units.len());
    if units.is_empty() {
        return Err(PoolError::Initialization {
            reason: "no unit found, retry the pool construction".to_string(),
            source: None,
        });
    }

    let mut index = KeyGroupIndex::default();
    for device in units {
        let info = device
            .info()
            .map_err(|e| {
                PoolError::initialization(format!("unable to get the identity of {device}"), e)
            })?
            .ok_or_else(|| PoolError::Initialization {
                reason: format!("the driver returned no identity record for {device}"),
                source: None,
            })?;
        info!("{}", info);

        let keys = read_keys(device.as_ref(), config)?;
        let id = index.add_unit(device, info);
        for key in &keys {
            index.insert(key.key_group, id);
        }
    }
    Ok(index)
}

fn read_keys(device: &dyn HsmDevice, config: &PoolConfig) -> PoolResult<Vec<KeyInfo>> {
    debug!("Reading the keys of the HSM {}", device);
    let keys = device.keys().map_err(|e| {
        error!(
            "HSM Error: Could not get unit keys: result={:02X} ({})",
            e.code, e.message
        );
        PoolError::initialization(format!("unable to read the keys of {device}"), e)
    })?;

    if config.dump_key_inventory {
        debug!("{}", KeyInfo::HEADER);
        for key in &keys {
            debug!("{}", key);
        }
        debug!("     Total: {} keys", keys.len());
    }
    Ok(keys)
}

/// Pool of units exposed as virtual readers
#[derive(Debug)]
pub struct HsmPool {
    config: PoolConfig,
    system: Arc<dyn HsmSystem>,
    index: Arc<KeyGroupIndex>,
    stats: RwLock<PoolStats>,
}

impl HsmPool {
    /// Builder over a driver system handle
    pub fn builder(system: Arc<dyn HsmSystem>) -> HsmPoolBuilder {
        HsmPoolBuilder::new(system)
    }

    /// Configuration in use
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Key-group index built at start-up
    pub fn index(&self) -> &KeyGroupIndex {
        &self.index
    }

    /// Indexed units, in enumeration order
    pub fn units(&self) -> &[UnitEntry] {
        self.index.units()
    }

    /// Indexed key groups, numerically ascending
    pub fn available_groups(&self) -> Vec<KeyGroup> {
        self.index.groups().collect()
    }

    /// Snapshot of the allocation counters
    pub fn stats(&self) -> PoolStats {
        self.stats.read().clone()
    }

    /// Resolve a caller's group reference
    pub fn parse_group_reference(&self, reference: Option<&str>) -> PoolResult<KeyGroup> {
        match reference {
            None => Ok(self.config.default_key_group),
            Some(raw) => raw.parse().map_err(|_| PoolError::InvalidArgument {
                reference: raw.to_string(),
            }),
        }
    }

    /// Release the system-level driver handle.
    ///
    /// Readers still outstanding must not be used afterwards.
    pub fn shutdown(self) -> PoolResult<()> {
        debug!("Freeing the HSM...");
        self.system
            .free()
            .map_err(|source| PoolError::Shutdown { source })
    }

    fn allocate(&self, reference: Option<&str>) -> PoolResult<HsmReader> {
        let group = self.parse_group_reference(reference)?;
        let candidates = self.index.candidates(group);
        if candidates.is_empty() {
            return Err(PoolError::ResourceUnavailable { group });
        }

        for (position, unit) in candidates.into_iter().enumerate() {
            match unit.device().open_channel(group) {
                Ok(Some(channel)) => {
                    let reader = HsmReader::new(unit, group, channel);
                    self.update_stats(|stats| {
                        stats.allocations += 1;
                        if position > 0 {
                            stats.fallbacks += 1;
                        }
                    });
                    return Ok(reader);
                }
                Ok(None) => {
                    error!(
                        "Unable to allocate a new channel for unit {}: no channel returned",
                        unit.display_name()
                    );
                    return Err(PoolError::Allocation {
                        unit: unit.display_name().to_string(),
                        group,
                        reason: "no channel available at the moment".to_string(),
                        source: None,
                    });
                }
                Err(e) => match e.kind() {
                    DriverErrorKind::KeyGroupUnavailable => {
                        debug!(
                            "Key group {} unavailable on {}, trying the next unit",
                            group,
                            unit.display_name()
                        );
                    }
                    _ => {
                        error!(
                            "Unable to allocate a new channel for unit {}. result={:02X} ({})",
                            unit.display_name(),
                            e.code,
                            e.message
                        );
                        return Err(PoolError::Allocation {
                            unit: unit.display_name().to_string(),
                            group,
                            reason: e.kind().to_string(),
                            source: Some(e),
                        });
                    }
                },
            }
        }
        Err(PoolError::ResourceUnavailable { group })
    }

    fn update_stats<F>(&self, updater: F)
    where
        F: FnOnce(&mut PoolStats),
    {
        let mut stats = self.stats.write();
        updater(&mut stats);
    }
}

impl PoolPlugin for HsmPool {
    type Reader = HsmReader;

    fn name(&self) -> &str {
        &self.config.name
    }

    fn reader_group_references(&self) -> Vec<String> {
        self.index
            .groups()
            .map(|group| group.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn allocate_reader(&self, group_reference: Option<&str>) -> PoolResult<HsmReader> {
        trace!(
            "Reader allocation requested. GROUP_REFERENCE = {:?}",
            group_reference
        );
        match self.allocate(group_reference) {
            Ok(reader) => {
                trace!("Reader {} allocated.", reader.name());
                Ok(reader)
            }
            Err(e) => {
                self.update_stats(|stats| stats.failed_allocations += 1);
                Err(e)
            }
        }
    }

    fn release_reader(&self, reader: Option<&mut HsmReader>) -> PoolResult<()> {
        let Some(reader) = reader else {
            error!("Reader not released. reader object is null.");
            return Ok(());
        };
        trace!("Reader release request READER_NAME = {}.", reader.name());
        if !reader.is_physical_channel_open() {
            trace!("Reader {} already released.", reader.name());
            return Ok(());
        }

        match reader.free_channel() {
            Ok(()) => {
                self.update_stats(|stats| stats.releases += 1);
                trace!("Reader {} released.", reader.name());
                Ok(())
            }
            Err(source) => {
                self.update_stats(|stats| stats.failed_releases += 1);
                Err(PoolError::Release {
                    reader: reader.name().to_string(),
                    source,
                })
            }
        }
    }

    fn on_unregister(&self) {
        trace!("{} unregistered.", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmpool_driver::codes;
    use hsmpool_driver::sim::{SimulatedSystem, SimulatedUnit};

    fn pool_over(system: &Arc<SimulatedSystem>) -> HsmPool {
        HsmPool::builder(Arc::clone(system) as Arc<dyn HsmSystem>)
            .build()
            .unwrap()
    }

    #[test]
    fn test_parse_group_reference() {
        let system = Arc::new(SimulatedSystem::new([
            SimulatedUnit::new(1).keys_in_groups(&[0])
        ]));
        let pool = pool_over(&system);

        assert_eq!(pool.parse_group_reference(None).unwrap(), KeyGroup(0));
        assert_eq!(pool.parse_group_reference(Some("42")).unwrap(), KeyGroup(42));
        for bad in ["", "abc", "-1", "1.5", "4294967296"] {
            let err = pool.parse_group_reference(Some(bad)).unwrap_err();
            assert!(matches!(err, PoolError::InvalidArgument { ref reference } if reference == bad));
        }
    }

    #[test]
    fn test_default_group_from_config() {
        let system = Arc::new(SimulatedSystem::new([
            SimulatedUnit::new(1).keys_in_groups(&[7])
        ]));
        let config = PoolConfig {
            default_key_group: KeyGroup(7),
            ..PoolConfig::default()
        };
        let pool = HsmPool::builder(Arc::clone(&system) as Arc<dyn HsmSystem>)
            .config(config)
            .build()
            .unwrap();

        let mut reader = pool.allocate_reader(None).unwrap();
        assert_eq!(reader.key_group(), KeyGroup(7));
        pool.release_reader(Some(&mut reader)).unwrap();
    }

    #[test]
    fn test_stats_track_fallbacks_and_failures() {
        let system = Arc::new(SimulatedSystem::new([
            SimulatedUnit::new(1).keys_in_groups(&[3]).unavailable_group(3),
            SimulatedUnit::new(2).keys_in_groups(&[3]),
        ]));
        let pool = pool_over(&system);

        let mut reader = pool.allocate_reader(Some("3")).unwrap();
        assert!(pool.allocate_reader(Some("9")).is_err());
        pool.release_reader(Some(&mut reader)).unwrap();
        pool.release_reader(Some(&mut reader)).unwrap();

        assert_eq!(
            pool.stats(),
            PoolStats {
                allocations: 1,
                failed_allocations: 1,
                fallbacks: 1,
                releases: 1,
                failed_releases: 0,
            }
        );
    }

    #[test]
    fn test_non_group_error_aborts_allocation() {
        let system = Arc::new(SimulatedSystem::new([
            SimulatedUnit::new(1).keys_in_groups(&[3]).fail_open(codes::IO),
            SimulatedUnit::new(2).keys_in_groups(&[3]),
        ]));
        let pool = pool_over(&system);

        let err = pool.allocate_reader(Some("3")).unwrap_err();
        assert!(matches!(err, PoolError::Allocation { .. }));
        assert_eq!(err.driver_code(), Some(codes::IO));
        assert_eq!(system.device(2).unwrap().open_calls(), 0);
    }

    #[test]
    fn test_shutdown_frees_system() {
        let system = Arc::new(SimulatedSystem::new([
            SimulatedUnit::new(1).keys_in_groups(&[0])
        ]));
        let pool = pool_over(&system);
        assert!(system.is_initialized());

        pool.shutdown().unwrap();
        assert!(!system.is_initialized());
        assert_eq!(system.free_calls(), 1);
    }
}
