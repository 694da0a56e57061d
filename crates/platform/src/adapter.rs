//! Adapter negotiation facade.
//!
//! Abstracts the handshake that raises or lowers the external adapter's
//! output voltage. The wire protocol (USB-PD PPS, proprietary high-voltage
//! schemes) is opaque here; the control loop only needs "ask for this output,
//! tell me what you are actually delivering, and fail within a bounded time".

use thiserror_no_std::Error;

/// Charger-type classification produced by the (external) buck-charger glue.
///
/// The staged path is attempted only for [`ChargerType::Direct`]; everything
/// else stays on the standard buck path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerType {
    /// USB SDP (500 mA).
    Usb,
    /// USB CDP/DCP class port.
    UsbCharging,
    /// Standard adapter without an adjustable-voltage contract.
    Standard,
    /// Non-standard adapter; conservative current only.
    NonStandard,
    /// Adapter supporting the adjustable high-voltage direct-charge contract.
    Direct,
}

impl ChargerType {
    /// Returns `true` if the staged direct-charge path may be attempted.
    #[must_use]
    pub const fn supports_direct(self) -> bool {
        matches!(self, ChargerType::Direct)
    }
}

/// Capability advertised by the adapter after a successful detect handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdapterCapability {
    /// Maximum output voltage the adapter will accept, in millivolts.
    pub max_voltage_mv: u32,
    /// Maximum output current the adapter will source, in milliamps.
    pub max_current_ma: u32,
}

/// Negotiation failure. Retryable up to the session's retry budget; the
/// caller escalates to a fatal fault once the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationError {
    /// The adapter did not answer the request within the handshake timeout.
    #[error("adapter handshake timed out")]
    Timeout,
    /// The adapter answered but refused the requested operating point.
    #[error("adapter rejected the requested operating point")]
    Rejected,
    /// The adapter-side link reported a fault or dropped mid-handshake.
    #[error("adapter link lost")]
    LinkLost,
}

/// Capability interface over the adapter handshake.
///
/// All methods are bounded-time: implementations time out internally and
/// return [`NegotiationError::Timeout`] rather than blocking the tick.
pub trait AdapterPort {
    /// Probe for a direct-charge capable adapter and read its capability.
    async fn detect(&mut self) -> Result<AdapterCapability, NegotiationError>;

    /// Request a new output operating point (voltage raise or lower).
    async fn request_output(
        &mut self,
        voltage_mv: u32,
        current_ma: u32,
    ) -> Result<(), NegotiationError>;

    /// Read the voltage the adapter reports it is presently delivering.
    async fn output_voltage_mv(&mut self) -> Result<u32, NegotiationError>;
}

impl<T: AdapterPort + ?Sized> AdapterPort for &mut T {
    async fn detect(&mut self) -> Result<AdapterCapability, NegotiationError> {
        T::detect(self).await
    }

    async fn request_output(
        &mut self,
        voltage_mv: u32,
        current_ma: u32,
    ) -> Result<(), NegotiationError> {
        T::request_output(self, voltage_mv, current_ma).await
    }

    async fn output_voltage_mv(&mut self) -> Result<u32, NegotiationError> {
        T::output_voltage_mv(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_direct_adapters_take_the_staged_path() {
        assert!(ChargerType::Direct.supports_direct());
        assert!(!ChargerType::Usb.supports_direct());
        assert!(!ChargerType::UsbCharging.supports_direct());
        assert!(!ChargerType::Standard.supports_direct());
        assert!(!ChargerType::NonStandard.supports_direct());
    }
}
