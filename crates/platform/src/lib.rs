//! Hardware Abstraction Layer (HAL) for the staged direct-charge core
//!
//! This crate provides trait-based abstractions for the power-path hardware,
//! enabling development and testing of the charge control loop without
//! physical converters or a live adapter.
//!
//! # Architecture Layers
//!
//! ```text
//! Task Layer (firmware crate — control loop, watchdog keepalive)
//!         ↓
//! Control Core (charge crate — staging tables, threshold calculator)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (Embassy HAL + I2C converters)
//! ```
//!
//! # Abstractions
//!
//! - [`ChargePump`] - one charge-pump/boost converter front end (1 or 2 instances)
//! - [`AdapterPort`] - voltage-raise negotiation with the external adapter
//! - [`Watchdog`] - keepalive capability proving the control loop is alive
//! - [`sc8551`] - register-level driver for the SC8551-class charge pump
//! - [`husb238a`] - register-level driver for the PD/PPS sink controller
//!
//! # Units
//!
//! All interfaces use integer fixed-point units: millivolts (`mv`),
//! milliamps (`ma`), milliohms (`mohm`), and tenths of a degree Celsius
//! (`dc`, e.g. `253` = 25.3 °C). No floating point anywhere on the power path.
//!
//! # Features
//!
//! - `std`: Enable standard library support (for testing, exposes [`mocks`])
//! - `hardware`: Physical hardware implementations
//! - `defmt`: Enable defmt logging

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::print_stdout)]
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors — callers decide
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(async_fn_in_trait)] // Embassy no_std: single-threaded, Send bounds not needed

pub mod adapter;
pub mod converter;
pub mod husb238a;
pub mod sc8551;
pub mod watchdog;

#[cfg(any(test, feature = "std"))]
pub mod mocks;

// Re-export the capability traits and their value types.
pub use adapter::{AdapterCapability, AdapterPort, ChargerType, NegotiationError};
pub use converter::{ChargePump, ConverterFaultFlags, ConverterId, ConverterTelemetry};
pub use watchdog::Watchdog;
