//! # hsmpool
//!
//! Exposes a rack of hardware security modules as a pool of virtual contact smart-card
//! readers. Each allocated reader is backed by one channel opened on a unit that holds the
//! requested key group; APDUs sent to the reader are exchanged over that channel.
//!
//! ## Lifecycle
//!
//! ```text
//! HsmPoolBuilder ──build()──▶ HsmPool ──allocate_reader()──▶ HsmReader
//!        │                        ▲                              │
//!        └── Err(PoolError) ──    └──── release_reader() ◀───────┘
//! ```
//!
//! - [`HsmPoolBuilder::build`] initializes the driver, enumerates the units and builds the
//!   key-group index. On failure the driver is freed and no pool exists.
//! - [`HsmPool`] is `Send + Sync`; allocation and release may run from any number of threads.
//! - [`HsmPool::shutdown`] frees the driver.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use hsmpool::{CardReader, HsmPool, PoolPlugin};
//! use hsmpool_driver::sim::{SimulatedSystem, SimulatedUnit};
//!
//! let system = Arc::new(SimulatedSystem::new([
//!     SimulatedUnit::new(0x0102_0304).keys_in_groups(&[1, 2]),
//! ]));
//! let pool = HsmPool::builder(system).build()?;
//!
//! let mut reader = pool.allocate_reader(Some("2"))?;
//! let response = reader.transmit_apdu(&[0x00, 0x84, 0x00, 0x00, 0x08])?;
//! assert_eq!(response.as_deref(), Some(&[0x90, 0x00][..]));
//! pool.release_reader(Some(&mut reader))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod atr;
pub mod config;
pub mod error;
pub mod index;
pub mod pool;
pub mod reader;
pub mod spi;

pub use atr::VirtualAtr;
pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{PoolError, PoolResult, ReaderError, ReaderResult};
pub use index::{KeyGroupIndex, UnitEntry, UnitId};
pub use pool::{HsmPool, HsmPoolBuilder, PoolStats};
pub use reader::HsmReader;
pub use spi::{CardReader, PoolPlugin};

/// Name under which the pool registers itself
pub const PLUGIN_NAME: &str = "HsmPoolPlugin";
