//! Staging configuration: immutable, loaded-once setpoint tables.
//!
//! A [`StagingConfig`] holds one or more [`StageGroup`]s (independently tuned
//! table sets, typically one per battery supplier), the dual-converter
//! coordination limits, and the per-product policy scalars. It is validated
//! exactly once via [`StagingConfig::validate`]; only a [`ValidatedStaging`]
//! can start a session, so a malformed table can never reach the control
//! loop.
//!
//! # Units
//!
//! Millivolts / milliamps / milliohms / tenths of a degree Celsius / seconds,
//! matching the platform crate. All ranges are half-open `[min, max)`.

use crate::coordination::CoordinationLimits;
use heapless::Vec;
use thiserror_no_std::Error;

/// Capacity of the voltage breakpoint table per group.
pub const MAX_VOLT_POINTS: usize = 8;
/// Capacity of the resistance band table per group.
pub const MAX_RES_BANDS: usize = 6;
/// Capacity of the temperature band table per group.
pub const MAX_TEMP_BANDS: usize = 8;
/// Capacity of the elapsed-time budget table per group.
pub const MAX_TIME_BUDGETS: usize = 6;
/// Capacity of the brand match list per group.
pub const MAX_BRANDS: usize = 4;
/// Maximum number of staging groups.
pub const MAX_GROUPS: usize = 4;

/// Battery supplier/brand identifier reported by the fuel gauge glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrandId(pub u8);

/// Index of a resolved staging group, frozen for a session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GroupIndex(usize);

impl GroupIndex {
    /// The underlying table index.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// One voltage breakpoint row: at or above `vbat_mv`, current is capped at
/// `ceiling_high_ma` (dual-converter path) or `ceiling_low_ma` (single path).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltPoint {
    /// Battery-voltage threshold in millivolts.
    pub vbat_mv: u32,
    /// Current ceiling with both converters active, in milliamps.
    pub ceiling_high_ma: u32,
    /// Current ceiling with a single converter active, in milliamps.
    pub ceiling_low_ma: u32,
}

/// One estimated-path-resistance band `[min_mohm, max_mohm)` with its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResistanceBand {
    /// Inclusive lower bound in milliohms.
    pub min_mohm: u32,
    /// Exclusive upper bound in milliohms.
    pub max_mohm: u32,
    /// Current ceiling inside this band, in milliamps.
    pub ceiling_ma: u32,
}

/// One battery-temperature band `[min_dc, max_dc)` with its ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TempBand {
    /// Inclusive lower bound in tenths of a degree Celsius.
    pub min_dc: i16,
    /// Exclusive upper bound in tenths of a degree Celsius.
    pub max_dc: i16,
    /// Current ceiling inside this band, in milliamps.
    pub ceiling_ma: u32,
}

/// One elapsed-time budget row: once the session has run for `after_s`
/// seconds, current is capped at `ceiling_ma`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimeBudget {
    /// Elapsed charging time threshold in seconds.
    pub after_s: u32,
    /// Current ceiling once past the threshold, in milliamps.
    pub ceiling_ma: u32,
}

/// One independently tuned staging table set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    /// Battery brands this group applies to.
    pub brands: Vec<BrandId, MAX_BRANDS>,
    /// Inclusive lower bound on the at-insertion battery temperature.
    pub insertion_min_dc: i16,
    /// Exclusive upper bound on the at-insertion battery temperature.
    pub insertion_max_dc: i16,
    /// Voltage breakpoints, non-decreasing voltage, non-increasing ceilings.
    pub volt: Vec<VoltPoint, MAX_VOLT_POINTS>,
    /// Resistance bands, ascending, non-overlapping, non-increasing ceilings.
    pub resistance: Vec<ResistanceBand, MAX_RES_BANDS>,
    /// Temperature bands, gap-free coverage of the expected range.
    pub temperature: Vec<TempBand, MAX_TEMP_BANDS>,
    /// Elapsed-time budgets, strictly increasing thresholds. May be empty.
    pub time: Vec<TimeBudget, MAX_TIME_BUDGETS>,
}

impl StageGroup {
    /// Largest current this group can ever allow (first voltage row's dual
    /// ceiling). Used to pick the most conservative fallback group.
    #[must_use]
    pub fn peak_ceiling_ma(&self) -> u32 {
        self.volt.first().map_or(0, |p| p.ceiling_high_ma)
    }
}

/// Per-product policy scalars supplied by the configuration loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargePolicy {
    /// Maximum per-tick current step in milliamps, both directions.
    pub max_step_ma: u32,
    /// Termination current threshold (iTerm) in milliamps.
    pub term_current_ma: u32,
    /// Consecutive below-iTerm ticks required to terminate.
    pub term_ticks: u8,
    /// Half-width of the termination voltage band in millivolts.
    pub voltage_band_mv: u32,
    /// Adapter-voltage error tolerance before renegotiating, in millivolts.
    pub renegotiate_tolerance_mv: u32,
    /// Voltage-raise retry budget (attempts, not re-tries).
    pub negotiation_retries: u8,
    /// Backoff between negotiation attempts, in milliseconds.
    pub negotiation_backoff_ms: u64,
    /// Consecutive advisory register-access faults before escalating fatal.
    pub advisory_escalation: u8,
    /// Control-loop tick period in milliseconds.
    pub tick_ms: u64,
    /// Adapter-to-battery voltage ratio of the pump topology (2 for 2:1).
    pub pump_ratio: u32,
}

impl Default for ChargePolicy {
    fn default() -> Self {
        Self {
            max_step_ma: 300,
            term_current_ma: 500,
            term_ticks: 3,
            voltage_band_mv: 50,
            renegotiate_tolerance_mv: 200,
            negotiation_retries: 3,
            negotiation_backoff_ms: 50,
            advisory_escalation: 3,
            tick_ms: 500,
            pump_ratio: 2,
        }
    }
}

/// Configuration error detected at load time.
///
/// These are configuration defects, not runtime faults: the core refuses to
/// start a session rather than run with an unvalidated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// No staging groups defined.
    #[error("no staging groups defined")]
    NoGroups,
    /// A required table is empty in the given group.
    #[error("empty table in group {group}")]
    EmptyTable {
        /// Offending group index.
        group: usize,
    },
    /// Voltage thresholds decrease, or a ceiling increases, at the given row.
    #[error("voltage table not monotonic in group {group} at row {row}")]
    VoltageNotMonotonic {
        /// Offending group index.
        group: usize,
        /// First row violating the invariant.
        row: usize,
    },
    /// A voltage row's single-path ceiling exceeds its dual-path ceiling.
    #[error("voltage ceilings inverted in group {group} at row {row}")]
    VoltageCeilingInverted {
        /// Offending group index.
        group: usize,
        /// Offending row.
        row: usize,
    },
    /// Resistance bands overlap, are unsorted, or ceilings increase.
    #[error("resistance bands invalid in group {group} at row {row}")]
    ResistanceBandsInvalid {
        /// Offending group index.
        group: usize,
        /// First row violating the invariant.
        row: usize,
    },
    /// Temperature bands leave a gap or are inverted at the given row.
    #[error("temperature coverage gap in group {group} at row {row}")]
    TemperatureGap {
        /// Offending group index.
        group: usize,
        /// First row violating the invariant.
        row: usize,
    },
    /// Elapsed-time thresholds not strictly increasing, or ceilings increase.
    #[error("time budgets invalid in group {group} at row {row}")]
    TimeBudgetsInvalid {
        /// Offending group index.
        group: usize,
        /// First row violating the invariant.
        row: usize,
    },
    /// Coordination split share outside `1..=99` percent.
    #[error("invalid primary split share {share}%")]
    InvalidShare {
        /// Configured share.
        share: u8,
    },
    /// A zero policy scalar that must be positive.
    #[error("invalid policy scalar")]
    InvalidPolicy,
}

/// The full loaded-once staging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    /// Independently tuned table groups, at least one.
    pub groups: Vec<StageGroup, MAX_GROUPS>,
    /// Dual-converter coordination limits.
    pub coordination: CoordinationLimits,
    /// Per-product policy scalars.
    pub policy: ChargePolicy,
}

impl StagingConfig {
    /// Validate every invariant and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found; the configuration must not be
    /// used for charging in that case.
    pub fn validate(self) -> Result<ValidatedStaging, ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        for (gi, group) in self.groups.iter().enumerate() {
            Self::validate_group(gi, group)?;
        }
        let share = self.coordination.primary_share_pct;
        if share == 0 || share >= 100 {
            return Err(ConfigError::InvalidShare { share });
        }
        if self.coordination.trip_ticks == 0
            || self.policy.max_step_ma == 0
            || self.policy.negotiation_retries == 0
            || self.policy.term_ticks == 0
            || self.policy.pump_ratio == 0
            || self.policy.tick_ms == 0
        {
            return Err(ConfigError::InvalidPolicy);
        }
        Ok(ValidatedStaging { config: self })
    }

    #[allow(clippy::indexing_slicing)] // windows(2) yields exactly two elements
    fn validate_group(gi: usize, group: &StageGroup) -> Result<(), ConfigError> {
        if group.volt.is_empty() || group.temperature.is_empty() || group.resistance.is_empty() {
            return Err(ConfigError::EmptyTable { group: gi });
        }
        for (row, pair) in group.volt.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            if b.vbat_mv < a.vbat_mv
                || b.ceiling_high_ma > a.ceiling_high_ma
                || b.ceiling_low_ma > a.ceiling_low_ma
            {
                return Err(ConfigError::VoltageNotMonotonic { group: gi, row });
            }
        }
        for (row, p) in group.volt.iter().enumerate() {
            if p.ceiling_low_ma > p.ceiling_high_ma {
                return Err(ConfigError::VoltageCeilingInverted { group: gi, row });
            }
        }
        for (row, band) in group.resistance.iter().enumerate() {
            if band.min_mohm >= band.max_mohm {
                return Err(ConfigError::ResistanceBandsInvalid { group: gi, row });
            }
        }
        for (row, pair) in group.resistance.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            if b.min_mohm < a.max_mohm || b.ceiling_ma > a.ceiling_ma {
                return Err(ConfigError::ResistanceBandsInvalid { group: gi, row });
            }
        }
        for (row, band) in group.temperature.iter().enumerate() {
            if band.min_dc >= band.max_dc {
                return Err(ConfigError::TemperatureGap { group: gi, row });
            }
        }
        // Gap-free coverage: each band starts exactly where the previous ends.
        for (row, pair) in group.temperature.windows(2).enumerate() {
            if pair[1].min_dc != pair[0].max_dc {
                return Err(ConfigError::TemperatureGap { group: gi, row });
            }
        }
        for (row, pair) in group.time.windows(2).enumerate() {
            let (a, b) = (&pair[0], &pair[1]);
            if b.after_s <= a.after_s || b.ceiling_ma > a.ceiling_ma {
                return Err(ConfigError::TimeBudgetsInvalid { group: gi, row });
            }
        }
        Ok(())
    }
}

/// A staging configuration that has passed [`StagingConfig::validate`].
///
/// Immutable and lock-free to read from any number of concurrent readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStaging {
    config: StagingConfig,
}

impl ValidatedStaging {
    /// Resolve the staging group for a session at adapter insertion.
    ///
    /// Resolution happens once per session and is frozen afterwards, even if
    /// the reported brand later changes. Fails closed: when no group matches,
    /// the most conservative (lowest peak ceiling) group is selected rather
    /// than refusing to charge.
    #[must_use]
    pub fn resolve(&self, brand: BrandId, insertion_temp_dc: i16) -> GroupIndex {
        let matched = self.config.groups.iter().position(|g| {
            g.brands.contains(&brand)
                && insertion_temp_dc >= g.insertion_min_dc
                && insertion_temp_dc < g.insertion_max_dc
        });
        match matched {
            Some(idx) => GroupIndex(idx),
            None => {
                let idx = self
                    .config
                    .groups
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, g)| g.peak_ceiling_ma())
                    .map_or(0, |(i, _)| i);
                GroupIndex(idx)
            }
        }
    }

    /// The staging group behind a resolved index.
    ///
    /// Out-of-range indices (impossible for indices produced by
    /// [`ValidatedStaging::resolve`]) fall back to the first group.
    #[must_use]
    pub fn group(&self, index: GroupIndex) -> &StageGroup {
        #[allow(clippy::indexing_slicing)] // validate() rejects empty group lists
        self.config
            .groups
            .get(index.0)
            .unwrap_or_else(|| &self.config.groups[0])
    }

    /// Dual-converter coordination limits.
    #[must_use]
    pub fn coordination(&self) -> &CoordinationLimits {
        &self.config.coordination
    }

    /// Per-product policy scalars.
    #[must_use]
    pub fn policy(&self) -> &ChargePolicy {
        &self.config.policy
    }
}
