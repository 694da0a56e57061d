//! Threshold calculator: pure per-tick setpoint computation.
//!
//! `next_setpoint` walks the staging tables with this tick's telemetry and
//! produces the next allowed (voltage, current) pair. It is deterministic,
//! side-effect free, and does no I/O — required for host testability and for
//! the snapshot-before-compute ordering guarantee (the calculator only ever
//! sees telemetry sampled before it ran).
//!
//! # Ceiling terms
//!
//! The allowed current is the minimum of all applicable ceilings:
//!
//! 1. **Voltage**: highest breakpoint at or below measured Vbat. Exact ties
//!    against the threshold the previous tick already resolved downward stay
//!    at the lower (more conservative) row, so a cell resting exactly on a
//!    breakpoint cannot oscillate between rows.
//! 2. **Temperature**: band containing measured Tbat. Exhaustion of the band
//!    table is *not* clamped: the prior current is returned unchanged and a
//!    pending fault is flagged for the control loop's next transition.
//! 3. **Resistance**: band containing the estimated path resistance, skipped
//!    entirely under the `ignore_path_resistance` override. Readings past the
//!    last band clamp to the last (lowest) ceiling — high resistance derates,
//!    it does not fault.
//! 4. **Elapsed time**: decaying budget bounding worst-case thermal soak
//!    independent of temperature sensing.
//! 5. **External cap**: user- or thermal-policy override supplied by the
//!    caller.
//!
//! A latched coordination derate is subtracted *after* the minimum, so it
//! lowers whichever ceiling is currently binding instead of competing with
//! the table terms.
//!
//! The commanded voltage comes from the voltage table alone; each row
//! regulates toward the *next* breakpoint (the last row toward its own,
//! i.e. the float voltage), and the other tables only constrain current. The per-tick current delta is clamped
//! symmetrically to the policy step size; the fault path bypasses this
//! module entirely (current drops to zero without stepping).

use crate::staging::{ChargePolicy, StageGroup};

/// A commanded (voltage, current) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Setpoint {
    /// Battery-side target voltage in millivolts.
    pub voltage_mv: u32,
    /// Total battery-side current in milliamps.
    pub current_ma: u32,
}

/// Everything one calculator invocation needs.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdInput {
    /// Measured battery voltage, millivolts.
    pub vbat_mv: u32,
    /// Measured battery temperature, tenths of a degree Celsius.
    pub tbat_dc: i16,
    /// Estimated cable/connector/board path resistance, milliohms.
    pub path_res_mohm: u32,
    /// Cumulative charging time this session, seconds.
    pub elapsed_s: u32,
    /// Prior tick's setpoint (step clamping and fallback).
    pub prior: Setpoint,
    /// Voltage-table row the prior tick selected, if any.
    pub prior_volt_index: Option<usize>,
    /// Single-converter path: use the conservative per-row ceiling.
    pub single_path: bool,
    /// Skip the resistance term entirely.
    pub ignore_path_resistance: bool,
    /// External cap on current (user/thermal override), mA.
    pub external_cap_ma: Option<u32>,
    /// Latched coordination derate, subtracted from the binding ceiling, mA.
    pub derate_ma: u32,
}

/// Per-term ceilings, for diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CeilingBreakdown {
    /// Voltage-table term, mA.
    pub voltage_ma: u32,
    /// Temperature-table term, mA.
    pub temperature_ma: u32,
    /// Resistance-table term (voltage term when overridden), mA.
    pub resistance_ma: u32,
    /// Elapsed-time term, mA (`u32::MAX` when no budget row applies).
    pub time_ma: u32,
    /// External cap term, mA (`u32::MAX` when absent).
    pub external_ma: u32,
}

impl CeilingBreakdown {
    /// The binding ceiling: minimum of all terms.
    #[must_use]
    pub fn binding_ma(&self) -> u32 {
        self.voltage_ma
            .min(self.temperature_ma)
            .min(self.resistance_ma)
            .min(self.time_ma)
            .min(self.external_ma)
    }
}

/// Result of one calculator invocation.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdOutcome {
    /// Next setpoint to command.
    pub setpoint: Setpoint,
    /// Voltage-table row the setpoint voltage came from.
    pub volt_index: usize,
    /// Per-term ceilings behind [`ThresholdOutcome::setpoint`].
    pub ceilings: CeilingBreakdown,
    /// Temperature band table had no entry for the measured Tbat; the
    /// session must transition to FAULT on the next control-loop tick.
    pub pending_temperature_fault: bool,
}

/// Walk the voltage table: highest breakpoint at or below `vbat_mv`, with
/// downward hysteresis on exact threshold ties (see module docs).
fn walk_volt(group: &StageGroup, vbat_mv: u32, prior_index: Option<usize>) -> usize {
    let mut index = 0;
    for (i, point) in group.volt.iter().enumerate() {
        if point.vbat_mv <= vbat_mv {
            index = i;
        } else {
            break;
        }
    }
    // Exact tie on a threshold the prior tick resolved below: stay below.
    if let Some(prev) = prior_index {
        if let Some(point) = group.volt.get(index) {
            if point.vbat_mv == vbat_mv && prev.saturating_add(1) == index {
                return prev;
            }
        }
    }
    index
}

/// Compute the next allowed setpoint. Pure; see module docs for the rules.
#[must_use]
pub fn next_setpoint(
    group: &StageGroup,
    policy: &ChargePolicy,
    input: &ThresholdInput,
) -> ThresholdOutcome {
    // Step 1: voltage-derived ceiling and the session's regulation target.
    // Each row charges toward the next breakpoint; the last row regulates at
    // its own threshold (the float voltage).
    let volt_index = walk_volt(group, input.vbat_mv, input.prior_volt_index);
    let row = group.volt.get(volt_index).copied().unwrap_or_default();
    let voltage_ma = if input.single_path {
        row.ceiling_low_ma
    } else {
        row.ceiling_high_ma
    };
    let regulation_mv = group
        .volt
        .get(volt_index.saturating_add(1))
        .or_else(|| group.volt.last())
        .map_or(0, |r| r.vbat_mv);

    // Step 2: temperature-derived ceiling. Band exhaustion is a pending
    // fault, never a silent clamp: return the prior setpoint untouched.
    let temp_band = group
        .temperature
        .iter()
        .find(|b| input.tbat_dc >= b.min_dc && input.tbat_dc < b.max_dc);
    let Some(temp_band) = temp_band else {
        return ThresholdOutcome {
            setpoint: input.prior,
            volt_index,
            ceilings: CeilingBreakdown {
                voltage_ma,
                temperature_ma: input.prior.current_ma,
                resistance_ma: voltage_ma,
                time_ma: u32::MAX,
                external_ma: u32::MAX,
            },
            pending_temperature_fault: true,
        };
    };
    let temperature_ma = temp_band.ceiling_ma;

    // Step 3: resistance-derived ceiling, or the voltage term when the
    // override is set. Past-the-last-band readings clamp to the last band.
    let resistance_ma = if input.ignore_path_resistance {
        voltage_ma
    } else {
        group
            .resistance
            .iter()
            .find(|b| input.path_res_mohm >= b.min_mohm && input.path_res_mohm < b.max_mohm)
            .map(|b| b.ceiling_ma)
            .or_else(|| {
                if group
                    .resistance
                    .first()
                    .is_some_and(|b| input.path_res_mohm < b.min_mohm)
                {
                    group.resistance.first().map(|b| b.ceiling_ma)
                } else {
                    group.resistance.last().map(|b| b.ceiling_ma)
                }
            })
            .unwrap_or(voltage_ma)
    };

    // Step 4: elapsed-time budget — highest threshold already passed.
    let time_ma = group
        .time
        .iter()
        .filter(|b| input.elapsed_s >= b.after_s)
        .next_back()
        .map_or(u32::MAX, |b| b.ceiling_ma);

    // Step 5: external cap (user/thermal override).
    let external_ma = input.external_cap_ma.unwrap_or(u32::MAX);

    let ceilings = CeilingBreakdown {
        voltage_ma,
        temperature_ma,
        resistance_ma,
        time_ma,
        external_ma,
    };

    // Steps 6 + 7: voltage from the voltage table alone; current stepped
    // toward the binding ceiling less any latched derate, clamped
    // symmetrically per tick.
    let target_ma = ceilings.binding_ma().saturating_sub(input.derate_ma);
    let prior_ma = input.prior.current_ma;
    let stepped_ma = if target_ma > prior_ma {
        prior_ma.saturating_add(policy.max_step_ma).min(target_ma)
    } else {
        prior_ma
            .saturating_sub(policy.max_step_ma)
            .max(target_ma)
    };

    ThresholdOutcome {
        setpoint: Setpoint {
            voltage_mv: regulation_mv,
            current_ma: stepped_ma,
        },
        volt_index,
        ceilings,
        pending_temperature_fault: false,
    }
}
