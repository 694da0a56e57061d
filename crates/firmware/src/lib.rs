//! Staged direct-charge firmware
//!
//! Embassy task layer tying the pure control core (`charge`) to real
//! hardware (`platform`): the control-loop task, the watchdog keepalive
//! task, the bounded fault inbox, and the board's built-in staging profile.
//!
//! # Architecture
//!
//! ```text
//! Entry point (main.rs, hardware only)
//!         ↓ spawns
//! Tasks (tasks::control, tasks::watchdog)
//!         ↓ drive
//! Control core (charge: staging, threshold, session, coordination)
//!         ↓ through
//! Capability traits (platform: AdapterPort, ChargePump, Watchdog)
//! ```
//!
//! Everything above the entry point is host-testable: the tasks are generic
//! over the `platform` traits and run under `tokio` + the embassy-time std
//! driver against `platform::mocks`.
//!
//! # Features
//!
//! - `hardware` - Build for the STM32G4 target (embassy-executor, defmt-rtt)
//! - `std` - Enable the standard library (host testing)

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
// Upgrade relevant warns to deny; keep pedantic as warn (too noisy for firmware)
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Critical correctness: deny these
#![deny(clippy::await_holding_lock)] // holding a blocking Mutex across .await is a bug
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(async_fn_in_trait)]
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_lossless)]

pub mod profile;
pub mod tasks;

pub use tasks::control::{Command, ControlLoop, COMMAND_DEPTH, FAULT_INBOX_DEPTH, REPORT_DEPTH};
pub use tasks::watchdog::keepalive;
