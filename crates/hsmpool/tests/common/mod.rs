//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hsmpool::{HsmPool, PoolConfig};
use hsmpool_driver::HsmSystem;
use hsmpool_driver::sim::{SimulatedSystem, SimulatedUnit};

pub const UNIT_A: u32 = 0x0A0B_0C0D;
pub const UNIT_B: u32 = 0x1122_3344;
pub const UNIT_C: u32 = 0x5566_7788;

/// Three units sharing group 1, with groups 2, 10 and 20 spread between them
pub fn rack() -> Vec<SimulatedUnit> {
    vec![
        SimulatedUnit::new(UNIT_A).version(3).keys_in_groups(&[0, 1, 2]),
        SimulatedUnit::new(UNIT_B).version(4).keys_in_groups(&[1, 10]),
        SimulatedUnit::new(UNIT_C).version(5).keys_in_groups(&[1, 20]),
    ]
}

pub fn system(units: impl IntoIterator<Item = SimulatedUnit>) -> Arc<SimulatedSystem> {
    Arc::new(SimulatedSystem::new(units))
}

pub fn pool(system: &Arc<SimulatedSystem>) -> HsmPool {
    pool_with(system, PoolConfig::default())
}

pub fn pool_with(system: &Arc<SimulatedSystem>, config: PoolConfig) -> HsmPool {
    HsmPool::builder(Arc::clone(system) as Arc<dyn HsmSystem>)
        .config(config)
        .build()
        .expect("pool should build over the simulated rack")
}

/// Unit whose channel open blocks for `delay`
pub fn slow_unit(serial_number: u32, groups: &[u32], delay: Duration) -> SimulatedUnit {
    SimulatedUnit::new(serial_number)
        .channels(64)
        .keys_in_groups(groups)
        .open_delay(delay)
}
