//! HUSB238A-class USB-PD PPS sink controller driver (I2C).
//!
//! Register map and unit scales follow the HUSB238A autonomous PD 3.0 sink
//! family: PPS operating points are programmed in the standard PD units of
//! 20 mV and 50 mA. The exact bit layout is not contractual for the control
//! core — everything above this module goes through [`AdapterPort`].

use embassy_time::{Duration, Timer};

use crate::adapter::{AdapterCapability, AdapterPort, NegotiationError};

/// 7-bit I2C device address (fixed).
pub const HUSB238A_I2C_ADDR: u8 = 0x08;

/// REG00: PD status (attach, contract, PPS mode).
pub const REG00_PD_STATUS: u8 = 0x00;
/// REG02: Outcome of the last RDO sent (see `RESPONSE_*`).
pub const REG02_RESPONSE: u8 = 0x02;
/// REG09: Command strobe register.
pub const REG09_GO_COMMAND: u8 = 0x09;
/// REG10: Highest PPS APDO voltage, 100 mV/LSB.
pub const REG10_APDO_MAX_V: u8 = 0x10;
/// REG11: Highest PPS APDO current, 50 mA/LSB.
pub const REG11_APDO_MAX_I: u8 = 0x11;
/// REG12: Requested PPS voltage, 20 mV/LSB, big-endian 16-bit.
pub const REG12_REQ_VOLTAGE: u8 = 0x12;
/// REG14: Requested PPS current, 50 mA/LSB.
pub const REG14_REQ_CURRENT: u8 = 0x14;
/// REG16: Measured VBUS at the sink connector, 20 mV/LSB, big-endian 16-bit.
pub const REG16_VBUS: u8 = 0x16;

/// REG00 bit: a source is attached.
pub const STATUS_ATTACHED: u8 = 1 << 7;
/// REG00 bit: an explicit PD contract is in place.
pub const STATUS_CONTRACT: u8 = 1 << 6;
/// REG00 bit: the source advertises a PPS APDO.
pub const STATUS_PPS_CAPABLE: u8 = 1 << 5;

/// REG09 value: send the programmed PPS request.
pub const GO_SEND_RDO: u8 = 0x01;

/// REG02 value: request still in flight.
pub const RESPONSE_PENDING: u8 = 0x00;
/// REG02 value: source accepted the operating point.
pub const RESPONSE_ACCEPT: u8 = 0x01;
/// REG02 value: source rejected the operating point.
pub const RESPONSE_REJECT: u8 = 0x02;

/// PPS voltage unit in millivolts.
pub const PPS_VOLTAGE_LSB_MV: u32 = 20;
/// PPS current unit in milliamps.
pub const PPS_CURRENT_LSB_MA: u32 = 50;
/// APDO maximum-voltage unit in millivolts.
pub const APDO_VOLTAGE_LSB_MV: u32 = 100;

/// Accept/reject poll attempts after sending a request.
const RESPONSE_POLLS: u8 = 4;
/// Delay between response polls. The PD spec's tSenderResponse is ~30 ms;
/// four polls at this interval cover it with margin.
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Encode a requested voltage in millivolts to the 20 mV PPS field,
/// rounding down.
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
#[allow(clippy::cast_possible_truncation)] // value clamped to the field width
pub const fn encode_pps_voltage(voltage_mv: u32) -> u16 {
    let steps = voltage_mv / PPS_VOLTAGE_LSB_MV;
    if steps > u16::MAX as u32 {
        u16::MAX
    } else {
        steps as u16
    }
}

/// Encode a requested current in milliamps to the 50 mA PPS field,
/// rounding down and saturating.
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
#[allow(clippy::cast_possible_truncation)] // value clamped to 255 before the cast
pub const fn encode_pps_current(current_ma: u32) -> u8 {
    let steps = current_ma / PPS_CURRENT_LSB_MA;
    if steps > 255 {
        255
    } else {
        steps as u8
    }
}

/// Decode the 16-bit VBUS readback to millivolts.
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)]
pub const fn decode_vbus_mv(raw: u16) -> u32 {
    (raw as u32) * PPS_VOLTAGE_LSB_MV
}

/// HUSB238A device handle over an async I2C bus.
pub struct Husb238a<I> {
    i2c: I,
    addr: u8,
}

impl<I> Husb238a<I>
where
    I: embedded_hal_async::i2c::I2c,
{
    /// Create a handle at the fixed device address.
    pub fn new(i2c: I) -> Self {
        Self {
            i2c,
            addr: HUSB238A_I2C_ADDR,
        }
    }

    async fn read_reg(&mut self, reg: u8) -> Result<u8, NegotiationError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.addr, &[reg], &mut buf)
            .await
            .map_err(|_| NegotiationError::LinkLost)?;
        Ok(buf[0])
    }

    async fn read_word(&mut self, reg: u8) -> Result<u16, NegotiationError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.addr, &[reg], &mut buf)
            .await
            .map_err(|_| NegotiationError::LinkLost)?;
        Ok(u16::from_be_bytes(buf))
    }

    async fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), NegotiationError> {
        self.i2c
            .write(self.addr, &[reg, value])
            .await
            .map_err(|_| NegotiationError::LinkLost)
    }
}

impl<I> AdapterPort for Husb238a<I>
where
    I: embedded_hal_async::i2c::I2c,
{
    async fn detect(&mut self) -> Result<AdapterCapability, NegotiationError> {
        let status = self.read_reg(REG00_PD_STATUS).await?;
        if status & STATUS_ATTACHED == 0 {
            return Err(NegotiationError::LinkLost);
        }
        // A source without an adjustable APDO cannot hold the pump ratio.
        if status & (STATUS_CONTRACT | STATUS_PPS_CAPABLE)
            != STATUS_CONTRACT | STATUS_PPS_CAPABLE
        {
            return Err(NegotiationError::Rejected);
        }
        let max_v = self.read_reg(REG10_APDO_MAX_V).await?;
        let max_i = self.read_reg(REG11_APDO_MAX_I).await?;
        Ok(AdapterCapability {
            max_voltage_mv: u32::from(max_v).saturating_mul(APDO_VOLTAGE_LSB_MV),
            max_current_ma: u32::from(max_i).saturating_mul(PPS_CURRENT_LSB_MA),
        })
    }

    async fn request_output(
        &mut self,
        voltage_mv: u32,
        current_ma: u32,
    ) -> Result<(), NegotiationError> {
        let volt = encode_pps_voltage(voltage_mv).to_be_bytes();
        self.i2c
            .write(self.addr, &[REG12_REQ_VOLTAGE, volt[0], volt[1]])
            .await
            .map_err(|_| NegotiationError::LinkLost)?;
        self.write_reg(REG14_REQ_CURRENT, encode_pps_current(current_ma))
            .await?;
        self.write_reg(REG09_GO_COMMAND, GO_SEND_RDO).await?;

        // Bounded wait for the source's Accept: never block the tick.
        for _ in 0..RESPONSE_POLLS {
            Timer::after(RESPONSE_POLL_INTERVAL).await;
            match self.read_reg(REG02_RESPONSE).await? {
                RESPONSE_ACCEPT => return Ok(()),
                RESPONSE_REJECT => return Err(NegotiationError::Rejected),
                _ => {}
            }
        }
        Err(NegotiationError::Timeout)
    }

    async fn output_voltage_mv(&mut self) -> Result<u32, NegotiationError> {
        Ok(decode_vbus_mv(self.read_word(REG16_VBUS).await?))
    }
}
