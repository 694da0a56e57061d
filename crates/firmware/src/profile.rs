//! Built-in staging profile for the reference board.
//!
//! A conservative two-group profile for a single-cell 4.4 V pack behind a
//! pair of 2:1 charge pumps. Group 0 covers the qualified battery brands;
//! group 1 is the fail-closed fallback every unknown pack resolves to. A
//! product build replaces these numbers with the cell vendor's qualification
//! data; the table *shape* invariants are enforced by
//! [`StagingConfig::validate`] either way.

use charge::staging::{
    BrandId, ChargePolicy, ConfigError, ResistanceBand, StageGroup, StagingConfig, TempBand,
    TimeBudget, ValidatedStaging, VoltPoint,
};
use charge::CoordinationLimits;

/// Qualified battery brands for the full-rate group.
pub const QUALIFIED_BRANDS: [BrandId; 2] = [BrandId(1), BrandId(2)];

fn full_rate_group() -> StageGroup {
    StageGroup {
        brands: QUALIFIED_BRANDS.iter().copied().collect(),
        insertion_min_dc: 0,
        insertion_max_dc: 450,
        volt: [
            VoltPoint { vbat_mv: 3000, ceiling_high_ma: 6000, ceiling_low_ma: 3000 },
            VoltPoint { vbat_mv: 4200, ceiling_high_ma: 4000, ceiling_low_ma: 2000 },
            VoltPoint { vbat_mv: 4350, ceiling_high_ma: 2000, ceiling_low_ma: 1000 },
            VoltPoint { vbat_mv: 4400, ceiling_high_ma: 1000, ceiling_low_ma: 500 },
        ]
        .into_iter()
        .collect(),
        resistance: [
            ResistanceBand { min_mohm: 0, max_mohm: 150, ceiling_ma: 6000 },
            ResistanceBand { min_mohm: 150, max_mohm: 300, ceiling_ma: 4000 },
            ResistanceBand { min_mohm: 300, max_mohm: 500, ceiling_ma: 2500 },
            ResistanceBand { min_mohm: 500, max_mohm: 800, ceiling_ma: 1000 },
        ]
        .into_iter()
        .collect(),
        // Coverage ends at 45.0 °C; hotter than that is a fault, not a derate.
        temperature: [
            TempBand { min_dc: -100, max_dc: 100, ceiling_ma: 1000 },
            TempBand { min_dc: 100, max_dc: 150, ceiling_ma: 2500 },
            TempBand { min_dc: 150, max_dc: 400, ceiling_ma: 6000 },
            TempBand { min_dc: 400, max_dc: 450, ceiling_ma: 3000 },
        ]
        .into_iter()
        .collect(),
        time: [
            TimeBudget { after_s: 1800, ceiling_ma: 4500 },
            TimeBudget { after_s: 3600, ceiling_ma: 3000 },
            TimeBudget { after_s: 5400, ceiling_ma: 2000 },
        ]
        .into_iter()
        .collect(),
    }
}

/// Unknown packs get half the current and a narrower thermal window.
fn fallback_group() -> StageGroup {
    StageGroup {
        brands: heapless::Vec::new(),
        insertion_min_dc: 50,
        insertion_max_dc: 400,
        volt: [
            VoltPoint { vbat_mv: 3000, ceiling_high_ma: 3000, ceiling_low_ma: 1500 },
            VoltPoint { vbat_mv: 4200, ceiling_high_ma: 2000, ceiling_low_ma: 1000 },
            VoltPoint { vbat_mv: 4350, ceiling_high_ma: 1000, ceiling_low_ma: 500 },
        ]
        .into_iter()
        .collect(),
        resistance: [
            ResistanceBand { min_mohm: 0, max_mohm: 300, ceiling_ma: 3000 },
            ResistanceBand { min_mohm: 300, max_mohm: 800, ceiling_ma: 1000 },
        ]
        .into_iter()
        .collect(),
        temperature: [
            TempBand { min_dc: 50, max_dc: 150, ceiling_ma: 1000 },
            TempBand { min_dc: 150, max_dc: 400, ceiling_ma: 3000 },
        ]
        .into_iter()
        .collect(),
        time: [TimeBudget { after_s: 3600, ceiling_ma: 1500 }]
            .into_iter()
            .collect(),
    }
}

/// Build and validate the board's default staging configuration.
pub fn default_staging() -> Result<ValidatedStaging, ConfigError> {
    StagingConfig {
        groups: [full_rate_group(), fallback_group()].into_iter().collect(),
        coordination: CoordinationLimits::default(),
        policy: ChargePolicy::default(),
    }
    .validate()
}
