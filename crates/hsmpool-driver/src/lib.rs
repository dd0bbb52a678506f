//! # hsmpool driver boundary
//!
//! Synchronous interface to a vendor driver that manages a rack of hardware security modules
//! ("units"). The pool in the `hsmpool` crate consumes only what is declared here:
//!
//! - [`HsmSystem`]: system-level handle (initialize / free / enumerate units)
//! - [`HsmDevice`]: one unit (identity record, key inventory, channel open)
//! - [`HsmChannel`]: one open channel (binary exchange, close)
//! - [`DriverError`]: result code + message, classified by [`DriverErrorKind`]
//!
//! ## Features
//!
//! - `sim` - an in-process [`sim::SimulatedSystem`] with channel accounting and fault
//!   injection, used by tests, benches and the command-line demo

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod device;
pub mod error;
pub mod types;

#[cfg(feature = "sim")]
#[cfg_attr(docsrs, doc(cfg(feature = "sim")))]
pub mod sim;

pub use device::{HsmChannel, HsmDevice, HsmSystem};
pub use error::{DriverError, DriverErrorKind, DriverResult, codes};
pub use types::{ChannelId, ChannelInfo, KeyGroup, KeyInfo, UnitInfo};
