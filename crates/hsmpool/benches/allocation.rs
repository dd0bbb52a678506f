//! Allocation and exchange benchmarks over the simulated driver
//!
//! The simulated driver answers from memory, so these numbers measure the pool's own
//! overhead (index lookup, reader construction, release bookkeeping).

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hsmpool::{CardReader, HsmPool, PoolPlugin};
use hsmpool_driver::HsmSystem;
use hsmpool_driver::sim::{SimulatedSystem, SimulatedUnit};

fn build_pool(units: u32) -> HsmPool {
    let system: Arc<dyn HsmSystem> = Arc::new(SimulatedSystem::new((0..units).map(|serial| {
        let unit = SimulatedUnit::new(serial).channels(16).keys_in_groups(&[1]);
        // Only the last unit can serve group 1.
        if serial + 1 < units {
            unit.unavailable_group(1)
        } else {
            unit
        }
    })));
    HsmPool::builder(system)
        .config(hsmpool::PoolConfigBuilder::new().dump_key_inventory(false).build())
        .build()
        .unwrap()
}

fn bench_allocate_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_release");
    for units in [1_u32, 4, 16] {
        let pool = build_pool(units);
        group.bench_with_input(BenchmarkId::from_parameter(units), &pool, |b, pool| {
            b.iter(|| {
                let mut reader = pool.allocate_reader(black_box(Some("1"))).unwrap();
                pool.release_reader(Some(&mut reader)).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_transmit(c: &mut Criterion) {
    let pool = build_pool(1);
    let mut reader = pool.allocate_reader(Some("1")).unwrap();
    let apdu = [0x00, 0x84, 0x00, 0x00, 0x08];

    c.bench_function("transmit_apdu", |b| {
        b.iter(|| reader.transmit_apdu(black_box(&apdu)).unwrap());
    });
    pool.release_reader(Some(&mut reader)).unwrap();
}

fn bench_group_references(c: &mut Criterion) {
    let system: Arc<dyn HsmSystem> = Arc::new(SimulatedSystem::new(
        (0..8).map(|serial| SimulatedUnit::new(serial).keys_in_groups(&[serial, serial + 100])),
    ));
    let pool = HsmPool::builder(system).build().unwrap();

    c.bench_function("reader_group_references", |b| {
        b.iter(|| black_box(pool.reader_group_references()));
    });
}

criterion_group!(
    benches,
    bench_allocate_release,
    bench_transmit,
    bench_group_references
);
criterion_main!(benches);
