//! Staged direct-charge control core.
//!
//! Pure, `no_std`, allocation-free control logic for the high-power charge
//! path: staging tables and their validation, the per-tick threshold
//! calculator, the charge-session state machine, the dual-converter
//! coordination policy, and fault classification.
//!
//! This crate deliberately has **no** I/O — it does not talk to converters,
//! negotiate with adapters, or sleep. Those concerns are handled by the
//! firmware tasks, which feed telemetry in and carry setpoints out. This
//! separation makes the control math trivially testable on the host.
//!
//! # Data flow
//!
//! ```text
//! firmware control task
//!     │  telemetry snapshot (all converters, start of tick)
//!     ▼
//! threshold::next_setpoint ── staging tables ──► (voltage, current) ceiling
//!     │
//!     ▼
//! coordination::split + monitors ──► per-converter commands, derates
//!     │
//!     ▼
//! session (stage machine, fault latch, termination bookkeeping)
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod coordination;
pub mod fault;
pub mod retry;
pub mod session;
pub mod staging;
pub mod threshold;

pub use coordination::{CoordinationLimits, CoordinationMonitor, CoordinationVerdict};
pub use fault::{Disposition, FaultArbiter, FaultEvent, FaultKind, FaultReport, Severity};
pub use retry::Retry;
pub use session::{ChargeSession, SessionSnapshot, Stage, StopReason};
pub use staging::{
    BrandId, ChargePolicy, ConfigError, GroupIndex, ResistanceBand, StageGroup, StagingConfig,
    TempBand, TimeBudget, ValidatedStaging, VoltPoint,
};
pub use threshold::{CeilingBreakdown, Setpoint, ThresholdInput, ThresholdOutcome};
