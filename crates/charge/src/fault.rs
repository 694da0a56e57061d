//! Fault taxonomy, classification, and advisory escalation.
//!
//! Faults arrive asynchronously (converter interrupt, telemetry
//! out-of-range) relative to the control loop's tick cadence; the firmware
//! queues them into a bounded inbox drained at the start of every tick. This
//! module is the pure part: given a [`FaultEvent`], decide what it means.
//!
//! Two severities exist. **Fatal** kinds end the session immediately: all
//! converters are disabled and the session latches `FAULT` until the adapter
//! is removed or an explicit reset is issued. **Advisory** kinds are counted;
//! register-access errors escalate to fatal after a configured run of
//! consecutive failures, current-ratio imbalance never does (it derates
//! instead, see [`coordination`](crate::coordination)).

use platform::{ConverterFaultFlags, ConverterId};

/// Everything that can go wrong on the staged-charge path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// Bus (input) over-voltage on a converter.
    BusOverVoltage,
    /// Bus (input) over-current on a converter.
    BusOverCurrent,
    /// Battery-path over-voltage.
    BatteryOverVoltage,
    /// Battery-path over-current.
    BatteryOverCurrent,
    /// Converter die over-temperature.
    ConverterOverTemperature,
    /// Battery thermistor over-temperature.
    BatteryOverTemperature,
    /// Measured battery temperature outside every staging band.
    TemperatureRangeExhausted,
    /// Cable or connector short on the power path.
    CableShort,
    /// Initial commanded-vs-measured path verification failed.
    PathVerificationFailed,
    /// Adapter refused or timed out the voltage handshake past the budget.
    NegotiationFailed,
    /// Transient register (I2C) access failure.
    RegisterAccess,
    /// Measured per-path current deviated from its commanded share.
    CurrentImbalance,
}

/// How a fault kind is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    /// Ends the session now; no automatic retry within the same session.
    Fatal,
    /// Counted and tolerated; may derate or escalate.
    Advisory,
}

impl FaultKind {
    /// Static severity of this kind.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            FaultKind::BusOverVoltage
            | FaultKind::BusOverCurrent
            | FaultKind::BatteryOverVoltage
            | FaultKind::BatteryOverCurrent
            | FaultKind::ConverterOverTemperature
            | FaultKind::BatteryOverTemperature
            | FaultKind::TemperatureRangeExhausted
            | FaultKind::CableShort
            | FaultKind::PathVerificationFailed
            | FaultKind::NegotiationFailed => Severity::Fatal,
            FaultKind::RegisterAccess | FaultKind::CurrentImbalance => Severity::Advisory,
        }
    }
}

/// One fault occurrence, produced by a fault source and consumed exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultEvent {
    /// Classified kind.
    pub kind: FaultKind,
    /// Converter instance that raised it, if any (adapter faults carry none).
    pub converter: Option<ConverterId>,
    /// Raw fault-register snapshot at the time of the event, for diagnostics.
    pub raw_flags: u8,
}

/// Diagnostic report surfaced outward exactly once per underlying event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultReport {
    /// Classified kind.
    pub kind: FaultKind,
    /// Offending converter instance, if any.
    pub converter: Option<ConverterId>,
    /// Raw fault-register snapshot.
    pub raw_flags: u8,
}

/// Map sticky converter fault flags to the highest-priority fault kind.
///
/// Returns `None` when no flag (or only the advisory REG_ACCESS flag with
/// others clear) warrants a classified event on its own.
#[must_use]
pub fn classify_flags(flags: ConverterFaultFlags) -> Option<FaultKind> {
    // Priority order mirrors the hardware's shutdown priority: shorts and
    // over-voltage first, thermal last.
    if flags.contains(ConverterFaultFlags::CABLE_SHORT) {
        Some(FaultKind::CableShort)
    } else if flags.contains(ConverterFaultFlags::BUS_OVP) {
        Some(FaultKind::BusOverVoltage)
    } else if flags.contains(ConverterFaultFlags::BAT_OVP) {
        Some(FaultKind::BatteryOverVoltage)
    } else if flags.contains(ConverterFaultFlags::BUS_OCP) {
        Some(FaultKind::BusOverCurrent)
    } else if flags.contains(ConverterFaultFlags::BAT_OCP) {
        Some(FaultKind::BatteryOverCurrent)
    } else if flags.contains(ConverterFaultFlags::DIE_OTP) {
        Some(FaultKind::ConverterOverTemperature)
    } else if flags.contains(ConverterFaultFlags::BAT_OTP) {
        Some(FaultKind::BatteryOverTemperature)
    } else if flags.contains(ConverterFaultFlags::REG_ACCESS) {
        Some(FaultKind::RegisterAccess)
    } else {
        None
    }
}

/// What the arbiter decided about one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// Fatal now: stop the session.
    Fatal(FaultKind),
    /// Advisory: record it, keep charging.
    Advisory(FaultKind),
    /// An advisory run crossed the escalation threshold: treat as fatal.
    Escalated(FaultKind),
}

/// Advisory-fault escalation bookkeeping for one session.
#[derive(Debug, Default)]
pub struct FaultArbiter {
    register_access_run: u8,
}

impl FaultArbiter {
    /// Fresh arbiter with no advisory history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one event against the escalation threshold.
    pub fn assess(&mut self, event: &FaultEvent, escalation_threshold: u8) -> Disposition {
        match event.kind.severity() {
            Severity::Fatal => Disposition::Fatal(event.kind),
            Severity::Advisory => match event.kind {
                FaultKind::RegisterAccess => {
                    self.register_access_run = self.register_access_run.saturating_add(1);
                    if self.register_access_run >= escalation_threshold {
                        Disposition::Escalated(FaultKind::RegisterAccess)
                    } else {
                        Disposition::Advisory(FaultKind::RegisterAccess)
                    }
                }
                // Imbalance derates via the coordination policy; it never
                // escalates to a session stop on its own.
                _ => Disposition::Advisory(event.kind),
            },
        }
    }

    /// A tick completed without advisory faults: consecutive runs reset.
    pub fn note_clean_tick(&mut self) {
        self.register_access_run = 0;
    }
}
