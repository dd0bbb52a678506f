//! Key-group index.
//!
//! Built once, single-threaded, while the pool initializes; afterwards it is only ever read
//! through a shared `Arc`, so lookups take no lock. Units are identified by the position they
//! were enumerated at ([`UnitId`]), never by driver object identity.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hsmpool_driver::{HsmDevice, KeyGroup, UnitInfo};

/// Stable identifier of an indexed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(usize);

impl UnitId {
    /// Enumeration position of the unit
    #[must_use]
    pub const fn position(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One indexed unit
#[derive(Debug, Clone)]
pub struct UnitEntry {
    id: UnitId,
    info: UnitInfo,
    display_name: String,
    device: Arc<dyn HsmDevice>,
}

impl UnitEntry {
    /// Identifier of the unit
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Identity record queried at start-up
    pub fn info(&self) -> &UnitInfo {
        &self.info
    }

    /// Display name reported by the driver
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn device(&self) -> &dyn HsmDevice {
        self.device.as_ref()
    }
}

/// Key group to candidate units, in enumeration order
#[derive(Debug, Default)]
pub struct KeyGroupIndex {
    units: Vec<UnitEntry>,
    groups: BTreeMap<KeyGroup, Vec<UnitId>>,
}

impl KeyGroupIndex {
    pub(crate) fn add_unit(&mut self, device: Arc<dyn HsmDevice>, info: UnitInfo) -> UnitId {
        let id = UnitId(self.units.len());
        self.units.push(UnitEntry {
            id,
            info,
            display_name: device.to_string(),
            device,
        });
        id
    }

    /// Record that `unit` holds a key of `group`. Returns `false` if it was already recorded.
    pub(crate) fn insert(&mut self, group: KeyGroup, unit: UnitId) -> bool {
        let candidates = self.groups.entry(group).or_default();
        if candidates.contains(&unit) {
            return false;
        }
        candidates.push(unit);
        true
    }

    /// Indexed groups, ascending
    pub fn groups(&self) -> impl Iterator<Item = KeyGroup> + '_ {
        self.groups.keys().copied()
    }

    /// Number of indexed groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group is indexed
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Candidate units for `group` in the order they were indexed
    pub fn candidates(&self, group: KeyGroup) -> Vec<&UnitEntry> {
        self.groups
            .get(&group)
            .map(|ids| ids.iter().map(|id| &self.units[id.0]).collect())
            .unwrap_or_default()
    }

    /// Every indexed unit, in enumeration order
    pub fn units(&self) -> &[UnitEntry] {
        &self.units
    }

    /// Look up a unit
    pub fn unit(&self, id: UnitId) -> Option<&UnitEntry> {
        self.units.get(id.0)
    }

    /// Group to candidate serial numbers, for diagnostics and comparisons
    pub fn snapshot(&self) -> BTreeMap<KeyGroup, Vec<u32>> {
        self.groups
            .iter()
            .map(|(group, ids)| {
                let serials = ids
                    .iter()
                    .map(|id| self.units[id.0].info.serial_number)
                    .collect();
                (*group, serials)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmpool_driver::HsmSystem;
    use hsmpool_driver::sim::{SimulatedSystem, SimulatedUnit};
    use proptest::prelude::*;

    fn devices(count: u32) -> Vec<(Arc<dyn HsmDevice>, UnitInfo)> {
        let system = SimulatedSystem::new((0..count).map(SimulatedUnit::new));
        system.initialize().unwrap();
        system
            .units()
            .unwrap()
            .into_iter()
            .map(|device| {
                let info = device.info().unwrap().unwrap();
                (device, info)
            })
            .collect()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = KeyGroupIndex::default();
        let (device, info) = devices(1).remove(0);
        let id = index.add_unit(device, info);

        assert!(index.insert(KeyGroup(2), id));
        assert!(!index.insert(KeyGroup(2), id));
        assert_eq!(index.candidates(KeyGroup(2)).len(), 1);
        assert!(index.candidates(KeyGroup(3)).is_empty());
    }

    #[test]
    fn test_candidates_keep_insertion_order() {
        let mut index = KeyGroupIndex::default();
        let ids: Vec<UnitId> = devices(3)
            .into_iter()
            .map(|(device, info)| index.add_unit(device, info))
            .collect();

        index.insert(KeyGroup(1), ids[2]);
        index.insert(KeyGroup(1), ids[0]);
        index.insert(KeyGroup(1), ids[1]);

        let order: Vec<UnitId> = index
            .candidates(KeyGroup(1))
            .iter()
            .map(|unit| unit.id())
            .collect();
        assert_eq!(order, vec![ids[2], ids[0], ids[1]]);
        assert_eq!(index.snapshot()[&KeyGroup(1)], vec![2, 0, 1]);
    }

    proptest! {
        #[test]
        fn prop_each_unit_once_per_group(
            inventory in prop::collection::vec(prop::collection::vec(0u32..6, 0..12), 1..5)
        ) {
            let mut index = KeyGroupIndex::default();
            let units = devices(u32::try_from(inventory.len()).unwrap());
            for ((device, info), keys) in units.into_iter().zip(&inventory) {
                let id = index.add_unit(device, info);
                for group in keys {
                    index.insert(KeyGroup(*group), id);
                }
            }

            for group in index.groups() {
                let mut ids: Vec<UnitId> =
                    index.candidates(group).iter().map(|unit| unit.id()).collect();
                let total = ids.len();
                ids.dedup();
                prop_assert_eq!(ids.len(), total);
                prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
                for id in ids {
                    prop_assert!(inventory[id.position()].contains(&group.get()));
                }
            }

            let expected: std::collections::BTreeSet<u32> =
                inventory.iter().flatten().copied().collect();
            let indexed: std::collections::BTreeSet<u32> =
                index.groups().map(KeyGroup::get).collect();
            prop_assert_eq!(indexed, expected);
        }
    }
}
