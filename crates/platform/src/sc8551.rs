//! SC8551-class charge-pump converter driver (I2C).
//!
//! Register map and ADC scale factors follow the SC8551 2:1 switched-capacitor
//! charge pump family. The exact bit layout is not contractual for the control
//! core — everything above this module goes through [`ChargePump`].

use crate::converter::{ChargePump, ConverterFaultFlags, ConverterTelemetry};

/// 7-bit I2C device address (ADDR pin low).
pub const SC8551_I2C_ADDR: u8 = 0x66;

/// REG00: Converter control (CHG_EN, REG_RST, FREQ_SHIFT).
pub const REG00_CONTROL: u8 = 0x00;
/// REG01: Battery over-voltage protection threshold.
pub const REG01_BAT_OVP: u8 = 0x01;
/// REG02: Battery over-current protection threshold.
pub const REG02_BAT_OCP: u8 = 0x02;
/// REG03: Bus over-voltage protection threshold.
pub const REG03_BUS_OVP: u8 = 0x03;
/// REG04: Bus over-current protection threshold.
pub const REG04_BUS_OCP: u8 = 0x04;
/// REG05: Battery-side current limit (IBAT_LIM, 50 mA/LSB).
pub const REG05_IBAT_LIMIT: u8 = 0x05;
/// REG06: Watchdog control / kick (WD_TIMEOUT, WD_RST).
pub const REG06_WATCHDOG: u8 = 0x06;
/// REG0A: Fault flag register (sticky until FLT_CLR).
pub const REG0A_FLT: u8 = 0x0A;
/// REG0B: ADC control (ADC_EN, ADC_RATE).
pub const REG0B_ADC_CTRL: u8 = 0x0B;
/// REG0D: ADC result base — VBUS[15:8], then VBUS[7:0], IBUS, VBAT, IBAT,
/// TDIE as consecutive big-endian 16-bit words.
pub const REG0D_ADC_BASE: u8 = 0x0D;

/// REG00 bit: enable the power stage.
pub const CONTROL_CHG_EN: u8 = 1 << 7;
/// REG00 bit: soft-reset all registers to defaults.
pub const CONTROL_REG_RST: u8 = 1 << 6;
/// REG06 bit: reset the I2C watchdog countdown.
pub const WATCHDOG_WD_RST: u8 = 1 << 7;
/// REG06 field: 5 s watchdog timeout.
pub const WATCHDOG_5S: u8 = 0b10;
/// REG0A write value: clear all sticky fault flags.
pub const FLT_CLEAR_ALL: u8 = 0xFF;
/// REG0B value: continuous ADC conversion enabled.
pub const ADC_CTRL_EN_CONT: u8 = 1 << 7;

/// REG0A bit: bus over-voltage fault.
pub const FLT_BUS_OVP: u8 = 1 << 7;
/// REG0A bit: bus over-current fault.
pub const FLT_BUS_OCP: u8 = 1 << 6;
/// REG0A bit: battery over-voltage fault.
pub const FLT_BAT_OVP: u8 = 1 << 5;
/// REG0A bit: battery over-current fault.
pub const FLT_BAT_OCP: u8 = 1 << 4;
/// REG0A bit: die over-temperature fault.
pub const FLT_TDIE_OTP: u8 = 1 << 3;
/// REG0A bit: battery thermistor over-temperature fault.
pub const FLT_TSBAT_OTP: u8 = 1 << 2;
/// REG0A bit: VBUS-side cable/connector short.
pub const FLT_CABLE_SHORT: u8 = 1 << 1;

/// IBAT_LIM register LSB in milliamps.
pub const IBAT_LIMIT_LSB_MA: u32 = 50;
/// Maximum commandable battery current in milliamps (8-bit field).
pub const IBAT_LIMIT_MAX_MA: u32 = 255 * IBAT_LIMIT_LSB_MA;

/// Decode a raw 16-bit VBUS ADC word to millivolts (3.75 mV/LSB).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_vbus_mv(raw: u16) -> u32 {
    (raw as u32) * 375 / 100
}

/// Decode a raw 16-bit IBUS ADC word to milliamps (1.5625 mA/LSB).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_ibus_ma(raw: u16) -> u32 {
    (raw as u32) * 15625 / 10000
}

/// Decode a raw 16-bit VBAT ADC word to millivolts (1.25 mV/LSB).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_vbat_mv(raw: u16) -> u32 {
    (raw as u32) * 125 / 100
}

/// Decode a raw 16-bit IBAT ADC word to milliamps (3.125 mA/LSB).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_ibat_ma(raw: u16) -> u32 {
    (raw as u32) * 3125 / 1000
}

/// Decode a raw 16-bit TDIE ADC word to tenths of a degree Celsius
/// (0.5 °C/LSB, two's-complement).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_die_temp_dc(raw: u16) -> i16 {
    (raw as i16) * 5
}

/// Decode a raw 16-bit TSBAT ADC word to tenths of a degree Celsius.
/// Same 0.5 °C/LSB two's-complement encoding as TDIE.
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_bat_temp_dc(raw: u16) -> i16 {
    (raw as i16) * 5
}

/// Encode a battery current limit in milliamps to the IBAT_LIM register
/// value, rounding down and saturating at the field maximum.
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
#[allow(clippy::cast_possible_truncation)] // value clamped to 255 before the cast
pub const fn encode_ibat_limit(limit_ma: u32) -> u8 {
    let steps = limit_ma / IBAT_LIMIT_LSB_MA;
    if steps > 255 {
        255
    } else {
        steps as u8
    }
}

/// Map the raw REG0A fault byte onto the portable [`ConverterFaultFlags`].
#[must_use]
pub fn decode_fault_flags(raw: u8) -> ConverterFaultFlags {
    let mut flags = ConverterFaultFlags::empty();
    if raw & FLT_BUS_OVP != 0 {
        flags |= ConverterFaultFlags::BUS_OVP;
    }
    if raw & FLT_BUS_OCP != 0 {
        flags |= ConverterFaultFlags::BUS_OCP;
    }
    if raw & FLT_BAT_OVP != 0 {
        flags |= ConverterFaultFlags::BAT_OVP;
    }
    if raw & FLT_BAT_OCP != 0 {
        flags |= ConverterFaultFlags::BAT_OCP;
    }
    if raw & FLT_TDIE_OTP != 0 {
        flags |= ConverterFaultFlags::DIE_OTP;
    }
    if raw & FLT_TSBAT_OTP != 0 {
        flags |= ConverterFaultFlags::BAT_OTP;
    }
    if raw & FLT_CABLE_SHORT != 0 {
        flags |= ConverterFaultFlags::CABLE_SHORT;
    }
    flags
}

/// SC8551 device handle over an async I2C bus.
///
/// Owns the enable-state shadow; the control loop never reads REG00 back.
pub struct Sc8551<I> {
    i2c: I,
    addr: u8,
    enabled: bool,
}

impl<I> Sc8551<I>
where
    I: embedded_hal_async::i2c::I2c,
{
    /// Create a handle at the default device address.
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, SC8551_I2C_ADDR)
    }

    /// Create a handle at a non-default address (ADDR pin high variants).
    pub fn with_address(i2c: I, addr: u8) -> Self {
        Self {
            i2c,
            addr,
            enabled: false,
        }
    }

    /// Initialize the converter: soft reset, continuous ADC, 5 s I2C
    /// watchdog, power stage left disabled.
    pub async fn init(&mut self) -> Result<(), I::Error> {
        self.i2c
            .write(self.addr, &[REG00_CONTROL, CONTROL_REG_RST])
            .await?;
        self.i2c
            .write(self.addr, &[REG0B_ADC_CTRL, ADC_CTRL_EN_CONT])
            .await?;
        self.i2c
            .write(self.addr, &[REG06_WATCHDOG, WATCHDOG_5S])
            .await?;
        self.enabled = false;
        Ok(())
    }

    /// Reset the converter's I2C watchdog countdown.
    pub async fn kick_watchdog(&mut self) -> Result<(), I::Error> {
        self.i2c
            .write(self.addr, &[REG06_WATCHDOG, WATCHDOG_WD_RST | WATCHDOG_5S])
            .await
    }

    async fn read_adc_word(&mut self, reg: u8) -> Result<u16, I::Error> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(self.addr, &[reg], &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I> ChargePump for Sc8551<I>
where
    I: embedded_hal_async::i2c::I2c,
{
    type Error = I::Error;

    async fn enable(&mut self) -> Result<(), Self::Error> {
        self.i2c
            .write(self.addr, &[REG00_CONTROL, CONTROL_CHG_EN])
            .await?;
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), Self::Error> {
        self.i2c.write(self.addr, &[REG00_CONTROL, 0x00]).await?;
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn read_telemetry(&mut self) -> Result<ConverterTelemetry, Self::Error> {
        // Six consecutive big-endian words starting at REG0D.
        let vbus = self.read_adc_word(REG0D_ADC_BASE).await?;
        let ibus = self.read_adc_word(REG0D_ADC_BASE.wrapping_add(2)).await?;
        let vbat = self.read_adc_word(REG0D_ADC_BASE.wrapping_add(4)).await?;
        let ibat = self.read_adc_word(REG0D_ADC_BASE.wrapping_add(6)).await?;
        let tdie = self.read_adc_word(REG0D_ADC_BASE.wrapping_add(8)).await?;
        let tbat = self.read_adc_word(REG0D_ADC_BASE.wrapping_add(10)).await?;
        Ok(ConverterTelemetry {
            vbus_mv: decode_vbus_mv(vbus),
            ibus_ma: decode_ibus_ma(ibus),
            vbat_mv: decode_vbat_mv(vbat),
            ibat_ma: decode_ibat_ma(ibat),
            die_temp_dc: decode_die_temp_dc(tdie),
            tbat_dc: decode_bat_temp_dc(tbat),
        })
    }

    // Every commanded tick also kicks the converter's I2C watchdog: a
    // stalled control loop stops producing commands and the converter
    // disables itself within the watchdog timeout.
    async fn command_current(&mut self, limit_ma: u32) -> Result<(), Self::Error> {
        self.i2c
            .write(self.addr, &[REG05_IBAT_LIMIT, encode_ibat_limit(limit_ma)])
            .await?;
        self.kick_watchdog().await
    }

    async fn fault_flags(&mut self) -> Result<ConverterFaultFlags, Self::Error> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.addr, &[REG0A_FLT], &mut buf)
            .await?;
        Ok(decode_fault_flags(buf[0]))
    }

    async fn clear_fault(&mut self) -> Result<(), Self::Error> {
        self.i2c
            .write(self.addr, &[REG0A_FLT, FLT_CLEAR_ALL])
            .await
    }
}
