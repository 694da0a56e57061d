//! Dual-converter coordination policy.
//!
//! When two charge pumps run in parallel the commanded current is split by a
//! configured ratio, and the measured behavior of the two paths is compared
//! every tick. Deviations must persist for a configured number of
//! *consecutive* ticks before anything trips — never an instantaneous
//! one-shot, so single-sample sensor noise cannot derate a healthy session.
//!
//! Three quantities are tracked with the same rule: per-converter output
//! current vs. its expected share, battery-voltage disagreement between the
//! two instances, and die-temperature disagreement. Each tracker that trips
//! latches one derate quantum; only the current tracker additionally raises a
//! [`CURRENT_IMBALANCE`](crate::fault::FaultKind::CurrentImbalance) fault
//! (degraded, not stop-charging).

use crate::fault::FaultKind;
use platform::ConverterTelemetry;

/// Limits governing the dual-path split and its supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinationLimits {
    /// Percentage of the total current commanded to the primary converter.
    pub primary_share_pct: u8,
    /// Allowed deviation of measured vs. commanded per-path current, mA.
    pub imbalance_tolerance_ma: u32,
    /// Allowed battery-voltage disagreement between the two paths, mV.
    pub vbat_tolerance_mv: u32,
    /// Allowed die-temperature disagreement between the two paths, 0.1 °C.
    pub die_temp_tolerance_dc: i16,
    /// Consecutive out-of-tolerance ticks before a tracker trips.
    pub trip_ticks: u8,
    /// Ceiling reduction latched per tripped tracker, mA.
    pub derate_ma: u32,
}

impl Default for CoordinationLimits {
    fn default() -> Self {
        Self {
            primary_share_pct: 50,
            imbalance_tolerance_ma: 300,
            vbat_tolerance_mv: 80,
            die_temp_tolerance_dc: 150,
            trip_ticks: 3,
            derate_ma: 500,
        }
    }
}

/// Split a total current across (primary, secondary) by the configured share.
///
/// Conservation is exact: the two halves always sum to `total_ma`.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // share <= 99 enforced by validation
pub fn split_current(total_ma: u32, primary_share_pct: u8) -> (u32, u32) {
    let primary = total_ma * u32::from(primary_share_pct) / 100;
    (primary, total_ma - primary)
}

/// Consecutive-tick deviation tracker with a latch.
#[derive(Debug, Clone, Copy, Default)]
struct TripCounter {
    run: u8,
    latched: bool,
}

impl TripCounter {
    /// Feed one tick's observation. Returns `true` on the tick the counter
    /// first reaches the trip count.
    fn observe(&mut self, exceeded: bool, trip_ticks: u8) -> bool {
        if !exceeded {
            self.run = 0;
            return false;
        }
        if self.latched {
            return false;
        }
        self.run = self.run.saturating_add(1);
        if self.run >= trip_ticks {
            self.latched = true;
            true
        } else {
            false
        }
    }
}

/// What one tick of coordination supervision concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinationVerdict {
    /// Total ceiling reduction currently latched, in milliamps.
    pub derate_ma: u32,
    /// Raised on the single tick the current tracker trips.
    pub fault: Option<FaultKind>,
}

/// Per-session supervision state for the dual-converter policy.
#[derive(Debug, Default)]
pub struct CoordinationMonitor {
    current: TripCounter,
    vbat: TripCounter,
    die_temp: TripCounter,
}

impl CoordinationMonitor {
    /// Fresh monitor with no deviation history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latched derate total for the given limits, in milliamps.
    #[must_use]
    pub fn derate_ma(&self, limits: &CoordinationLimits) -> u32 {
        let tripped = [&self.current, &self.vbat, &self.die_temp]
            .iter()
            .filter(|t| t.latched)
            .count() as u32;
        tripped.saturating_mul(limits.derate_ma)
    }

    /// Feed one tick's commanded split and measured telemetry.
    pub fn observe(
        &mut self,
        limits: &CoordinationLimits,
        commanded: (u32, u32),
        primary: &ConverterTelemetry,
        secondary: &ConverterTelemetry,
    ) -> CoordinationVerdict {
        let current_dev = primary
            .ibat_ma
            .abs_diff(commanded.0)
            .max(secondary.ibat_ma.abs_diff(commanded.1));
        let newly_tripped = self.current.observe(
            current_dev > limits.imbalance_tolerance_ma,
            limits.trip_ticks,
        );

        let vbat_dev = primary.vbat_mv.abs_diff(secondary.vbat_mv);
        self.vbat
            .observe(vbat_dev > limits.vbat_tolerance_mv, limits.trip_ticks);

        let temp_dev = primary.die_temp_dc.abs_diff(secondary.die_temp_dc);
        self.die_temp.observe(
            temp_dev > limits.die_temp_tolerance_dc.unsigned_abs(),
            limits.trip_ticks,
        );

        CoordinationVerdict {
            derate_ma: self.derate_ma(limits),
            fault: newly_tripped.then_some(FaultKind::CurrentImbalance),
        }
    }

    /// Forget all deviation history (session teardown).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use super::*;

    fn telem(vbat_mv: u32, ibat_ma: u32, die_temp_dc: i16) -> ConverterTelemetry {
        ConverterTelemetry {
            vbat_mv,
            ibat_ma,
            die_temp_dc,
            ..ConverterTelemetry::default()
        }
    }

    #[test]
    fn split_conserves_total_for_any_share() {
        for share in 1..=99u8 {
            for total in [0u32, 1, 999, 3000, 6001] {
                let (a, b) = split_current(total, share);
                assert_eq!(a + b, total, "share {share}% total {total}");
            }
        }
    }

    #[test]
    fn uneven_split_favors_primary_by_ratio() {
        let (a, b) = split_current(3000, 60);
        assert_eq!((a, b), (1800, 1200));
    }

    // Commanded 1500 mA each, secondary measures 1000 mA, tolerance 300 mA,
    // trip count 3: fault raised exactly at tick 3, never again after.
    #[test]
    fn imbalance_trips_on_third_consecutive_tick() {
        let limits = CoordinationLimits {
            imbalance_tolerance_ma: 300,
            trip_ticks: 3,
            derate_ma: 500,
            ..CoordinationLimits::default()
        };
        let mut monitor = CoordinationMonitor::new();
        let good = telem(4100, 1500, 300);
        let lagging = telem(4100, 1000, 300);

        for tick in 1..=5 {
            let verdict = monitor.observe(&limits, (1500, 1500), &good, &lagging);
            match tick {
                1 | 2 => {
                    assert_eq!(verdict.fault, None, "tick {tick}");
                    assert_eq!(verdict.derate_ma, 0, "tick {tick}");
                }
                3 => {
                    assert_eq!(verdict.fault, Some(FaultKind::CurrentImbalance));
                    assert_eq!(verdict.derate_ma, 500);
                }
                _ => {
                    // Latched: no duplicate fault, derate persists.
                    assert_eq!(verdict.fault, None, "tick {tick}");
                    assert_eq!(verdict.derate_ma, 500, "tick {tick}");
                }
            }
        }
    }

    #[test]
    fn noise_below_trip_count_never_trips() {
        let limits = CoordinationLimits::default();
        let mut monitor = CoordinationMonitor::new();
        let good = telem(4100, 1500, 300);
        let lagging = telem(4100, 900, 300);

        // Two bad ticks, one good tick, repeated: run never reaches 3.
        for _ in 0..10 {
            assert_eq!(
                monitor.observe(&limits, (1500, 1500), &good, &lagging).fault,
                None
            );
            assert_eq!(
                monitor.observe(&limits, (1500, 1500), &good, &lagging).fault,
                None
            );
            assert_eq!(
                monitor.observe(&limits, (1500, 1500), &good, &good).fault,
                None
            );
        }
    }

    #[test]
    fn vbat_and_temperature_divergence_derate_without_fault() {
        let limits = CoordinationLimits {
            vbat_tolerance_mv: 80,
            die_temp_tolerance_dc: 150,
            trip_ticks: 2,
            derate_ma: 400,
            ..CoordinationLimits::default()
        };
        let mut monitor = CoordinationMonitor::new();
        let a = telem(4200, 1500, 600);
        let b = telem(4000, 1500, 300); // 200 mV and 30 °C apart

        let first = monitor.observe(&limits, (1500, 1500), &a, &b);
        assert_eq!(first.derate_ma, 0);
        let second = monitor.observe(&limits, (1500, 1500), &a, &b);
        // Both trackers latched, no CURRENT_IMBALANCE fault.
        assert_eq!(second.derate_ma, 800);
        assert_eq!(second.fault, None);
    }

    #[test]
    fn reset_clears_latches() {
        let limits = CoordinationLimits {
            trip_ticks: 1,
            ..CoordinationLimits::default()
        };
        let mut monitor = CoordinationMonitor::new();
        let good = telem(4100, 1500, 300);
        let bad = telem(4100, 0, 300);
        monitor.observe(&limits, (1500, 1500), &good, &bad);
        assert!(monitor.derate_ma(&limits) > 0);
        monitor.reset();
        assert_eq!(monitor.derate_ma(&limits), 0);
    }
}
