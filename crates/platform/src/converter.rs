//! Charge-pump converter capability interface.
//!
//! One [`ChargePump`] instance abstracts one physical DC/DC front end
//! (SC8551, BQ25970, or similar). The control loop and fault handler depend
//! only on this trait; per-chip register drivers implement it.
//!
//! The staged-charge path runs one or two instances in parallel. Telemetry is
//! pull-only: the control loop snapshots [`ConverterTelemetry`] for every
//! active instance at the start of each tick, before any ceiling computation.

use bitflags::bitflags;

/// Identifies one physical converter path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConverterId {
    /// Main charge pump, always populated.
    Primary,
    /// Second parallel pump on dual-path products.
    Secondary,
}

impl ConverterId {
    /// Stable small index for per-converter bookkeeping arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            ConverterId::Primary => 0,
            ConverterId::Secondary => 1,
        }
    }
}

/// One telemetry snapshot read from a converter.
///
/// All fields are sampled in a single hardware transaction so they are
/// mutually consistent. A snapshot is valid only for the tick it was read in;
/// reusing a stale snapshot is a correctness bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConverterTelemetry {
    /// Input (bus) voltage in millivolts.
    pub vbus_mv: u32,
    /// Input (bus) current in milliamps.
    pub ibus_ma: u32,
    /// Battery-side voltage in millivolts.
    pub vbat_mv: u32,
    /// Battery-side output current in milliamps.
    pub ibat_ma: u32,
    /// Converter die temperature in tenths of a degree Celsius.
    pub die_temp_dc: i16,
    /// Battery thermistor temperature in tenths of a degree Celsius.
    pub tbat_dc: i16,
}

bitflags! {
    /// Sticky converter fault flags, cleared only by [`ChargePump::clear_fault`].
    ///
    /// Layout mirrors the SC8551 FLT register; vendor drivers map their own
    /// fault registers onto these bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConverterFaultFlags: u8 {
        /// Bus over-voltage protection tripped.
        const BUS_OVP     = 1 << 7;
        /// Bus over-current protection tripped.
        const BUS_OCP     = 1 << 6;
        /// Battery over-voltage protection tripped.
        const BAT_OVP     = 1 << 5;
        /// Battery over-current protection tripped.
        const BAT_OCP     = 1 << 4;
        /// Converter die over-temperature.
        const DIE_OTP     = 1 << 3;
        /// Battery thermistor over-temperature.
        const BAT_OTP     = 1 << 2;
        /// Cable or connector short detected on the power path.
        const CABLE_SHORT = 1 << 1;
        /// Register access (I2C) failure latched by the driver.
        const REG_ACCESS  = 1 << 0;
    }
}

impl ConverterFaultFlags {
    /// Flags that are immediately fatal to the charge session.
    pub const FATAL: ConverterFaultFlags = ConverterFaultFlags::BUS_OVP
        .union(ConverterFaultFlags::BUS_OCP)
        .union(ConverterFaultFlags::BAT_OVP)
        .union(ConverterFaultFlags::BAT_OCP)
        .union(ConverterFaultFlags::DIE_OTP)
        .union(ConverterFaultFlags::BAT_OTP)
        .union(ConverterFaultFlags::CABLE_SHORT);

    /// Returns `true` if any fatal flag is set.
    #[must_use]
    pub const fn has_fatal(self) -> bool {
        !self.intersection(Self::FATAL).is_empty()
    }
}

/// Capability interface over one physical charge-pump converter.
///
/// All methods are bounded-time hardware transactions. Implementations must
/// keep fault flags sticky: once raised, [`ChargePump::fault_flags`] reports
/// them on every read until [`ChargePump::clear_fault`].
pub trait ChargePump {
    /// Hardware transport error (I2C bus error, device timeout).
    type Error: core::fmt::Debug;

    /// Enable the power stage.
    async fn enable(&mut self) -> Result<(), Self::Error>;

    /// Disable the power stage. Must be safe to call repeatedly.
    async fn disable(&mut self) -> Result<(), Self::Error>;

    /// Returns `true` if the power stage is currently enabled.
    fn is_enabled(&self) -> bool;

    /// Read a fresh, mutually-consistent telemetry snapshot.
    async fn read_telemetry(&mut self) -> Result<ConverterTelemetry, Self::Error>;

    /// Command the battery-side output current limit in milliamps.
    async fn command_current(&mut self, limit_ma: u32) -> Result<(), Self::Error>;

    /// Read the sticky fault flags.
    async fn fault_flags(&mut self) -> Result<ConverterFaultFlags, Self::Error>;

    /// Clear all sticky fault flags.
    async fn clear_fault(&mut self) -> Result<(), Self::Error>;
}

impl<T: ChargePump + ?Sized> ChargePump for &mut T {
    type Error = T::Error;

    async fn enable(&mut self) -> Result<(), Self::Error> {
        T::enable(self).await
    }

    async fn disable(&mut self) -> Result<(), Self::Error> {
        T::disable(self).await
    }

    fn is_enabled(&self) -> bool {
        T::is_enabled(self)
    }

    async fn read_telemetry(&mut self) -> Result<ConverterTelemetry, Self::Error> {
        T::read_telemetry(self).await
    }

    async fn command_current(&mut self, limit_ma: u32) -> Result<(), Self::Error> {
        T::command_current(self, limit_ma).await
    }

    async fn fault_flags(&mut self) -> Result<ConverterFaultFlags, Self::Error> {
        T::fault_flags(self).await
    }

    async fn clear_fault(&mut self) -> Result<(), Self::Error> {
        T::clear_fault(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_ids_have_distinct_indices() {
        assert_eq!(ConverterId::Primary.index(), 0);
        assert_eq!(ConverterId::Secondary.index(), 1);
    }

    #[test]
    fn fatal_mask_excludes_advisory_flags() {
        assert!(!ConverterFaultFlags::FATAL.contains(ConverterFaultFlags::REG_ACCESS));
    }

    #[test]
    fn has_fatal_on_any_protection_flag() {
        assert!(ConverterFaultFlags::BUS_OVP.has_fatal());
        assert!(ConverterFaultFlags::CABLE_SHORT.has_fatal());
        assert!(!ConverterFaultFlags::REG_ACCESS.has_fatal());
        assert!(!ConverterFaultFlags::empty().has_fatal());
    }

    #[test]
    fn fault_flags_do_not_overlap() {
        let all = [
            ConverterFaultFlags::BUS_OVP,
            ConverterFaultFlags::BUS_OCP,
            ConverterFaultFlags::BAT_OVP,
            ConverterFaultFlags::BAT_OCP,
            ConverterFaultFlags::DIE_OTP,
            ConverterFaultFlags::BAT_OTP,
            ConverterFaultFlags::CABLE_SHORT,
            ConverterFaultFlags::REG_ACCESS,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert!(a.intersection(*b).is_empty());
            }
        }
    }
}
