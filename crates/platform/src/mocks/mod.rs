//! Mock implementations for testing
//!
//! This module provides mock implementations of the power-path traits
//! for use in unit and integration tests. Mocks are scriptable: tests
//! queue telemetry snapshots, inject negotiation timeouts, and latch
//! fault flags, then drive the control loop and inspect what was
//! commanded.

#![cfg(any(test, feature = "std"))]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::arithmetic_side_effects)] // test-support counters, all guarded

use crate::adapter::{AdapterCapability, AdapterPort, NegotiationError};
use crate::converter::{ChargePump, ConverterFaultFlags, ConverterId, ConverterTelemetry};
use crate::watchdog::Watchdog;

/// Error type shared by all mocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError;

/// Mock charge-pump converter.
///
/// Telemetry reads pop from a script queue when one is present, otherwise
/// return the standing snapshot. Commanded current limits are recorded.
pub struct MockConverter {
    /// Which physical path this mock stands in for.
    pub id: ConverterId,
    enabled: bool,
    telemetry: ConverterTelemetry,
    script: heapless::Deque<ConverterTelemetry, 64>,
    faults: ConverterFaultFlags,
    fault_script: heapless::Deque<ConverterFaultFlags, 16>,
    commanded: heapless::Vec<u32, 64>,
    fail_reads: u8,
}

impl MockConverter {
    /// Create a mock converter with a standing telemetry snapshot.
    pub fn new(id: ConverterId, telemetry: ConverterTelemetry) -> Self {
        Self {
            id,
            enabled: false,
            telemetry,
            script: heapless::Deque::new(),
            faults: ConverterFaultFlags::empty(),
            fault_script: heapless::Deque::new(),
            commanded: heapless::Vec::new(),
            fail_reads: 0,
        }
    }

    /// Replace the standing telemetry snapshot.
    pub fn set_telemetry(&mut self, telemetry: ConverterTelemetry) {
        self.telemetry = telemetry;
    }

    /// Queue a one-shot telemetry snapshot returned before the standing one.
    pub fn push_telemetry(&mut self, telemetry: ConverterTelemetry) {
        assert!(
            self.script.push_back(telemetry).is_ok(),
            "telemetry script full"
        );
    }

    /// Latch sticky fault flags, as a converter interrupt would.
    pub fn inject_fault(&mut self, flags: ConverterFaultFlags) {
        self.faults |= flags;
    }

    /// Queue flags to latch on a future poll: each [`ChargePump::fault_flags`]
    /// read pops one entry and ORs it into the sticky set first. Lets a test
    /// script a fault landing mid-session while the loop owns the mock.
    pub fn push_fault_flags(&mut self, flags: ConverterFaultFlags) {
        assert!(
            self.fault_script.push_back(flags).is_ok(),
            "fault script full"
        );
    }

    /// Make the next `n` telemetry reads fail with a bus error.
    pub fn fail_next_reads(&mut self, n: u8) {
        self.fail_reads = n;
    }

    /// All current limits commanded so far, oldest first.
    pub fn commanded(&self) -> &[u32] {
        &self.commanded
    }

    /// The most recently commanded current limit, if any.
    pub fn last_commanded(&self) -> Option<u32> {
        self.commanded.last().copied()
    }
}

impl ChargePump for MockConverter {
    type Error = MockBusError;

    async fn enable(&mut self) -> Result<(), Self::Error> {
        self.enabled = true;
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), Self::Error> {
        self.enabled = false;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn read_telemetry(&mut self) -> Result<ConverterTelemetry, Self::Error> {
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(MockBusError);
        }
        Ok(self.script.pop_front().unwrap_or(self.telemetry))
    }

    async fn command_current(&mut self, limit_ma: u32) -> Result<(), Self::Error> {
        assert!(self.commanded.push(limit_ma).is_ok(), "command log full");
        Ok(())
    }

    async fn fault_flags(&mut self) -> Result<ConverterFaultFlags, Self::Error> {
        if let Some(flags) = self.fault_script.pop_front() {
            self.faults |= flags;
        }
        Ok(self.faults)
    }

    async fn clear_fault(&mut self) -> Result<(), Self::Error> {
        self.faults = ConverterFaultFlags::empty();
        Ok(())
    }
}

/// Mock adapter port.
///
/// `request_output` fails with [`NegotiationError::Timeout`] while the
/// injected timeout budget is non-zero, then succeeds and tracks the
/// delivered voltage.
pub struct MockAdapter {
    capability: AdapterCapability,
    output_mv: u32,
    timeouts_remaining: u8,
    read_failures: u8,
    detached: bool,
    requests: heapless::Vec<(u32, u32), 64>,
}

impl MockAdapter {
    /// Create a mock adapter with the given advertised capability.
    pub fn new(capability: AdapterCapability) -> Self {
        Self {
            capability,
            output_mv: 5000,
            timeouts_remaining: 0,
            read_failures: 0,
            detached: false,
            requests: heapless::Vec::new(),
        }
    }

    /// Make the next `n` voltage requests time out.
    pub fn inject_timeouts(&mut self, n: u8) {
        self.timeouts_remaining = n;
    }

    /// Make the next `n` output-voltage readbacks fail with a link error.
    pub fn fail_voltage_reads(&mut self, n: u8) {
        self.read_failures = n;
    }

    /// Simulate physical adapter removal.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// All operating points requested so far, oldest first.
    pub fn requests(&self) -> &[(u32, u32)] {
        &self.requests
    }

    /// Voltage the mock is presently "delivering".
    pub fn delivered_mv(&self) -> u32 {
        self.output_mv
    }
}

impl AdapterPort for MockAdapter {
    async fn detect(&mut self) -> Result<AdapterCapability, NegotiationError> {
        if self.detached {
            Err(NegotiationError::LinkLost)
        } else {
            Ok(self.capability)
        }
    }

    async fn request_output(
        &mut self,
        voltage_mv: u32,
        current_ma: u32,
    ) -> Result<(), NegotiationError> {
        if self.detached {
            return Err(NegotiationError::LinkLost);
        }
        assert!(
            self.requests.push((voltage_mv, current_ma)).is_ok(),
            "request log full"
        );
        if self.timeouts_remaining > 0 {
            self.timeouts_remaining -= 1;
            return Err(NegotiationError::Timeout);
        }
        if voltage_mv > self.capability.max_voltage_mv {
            return Err(NegotiationError::Rejected);
        }
        self.output_mv = voltage_mv;
        Ok(())
    }

    async fn output_voltage_mv(&mut self) -> Result<u32, NegotiationError> {
        if self.detached {
            return Err(NegotiationError::LinkLost);
        }
        if self.read_failures > 0 {
            self.read_failures -= 1;
            return Err(NegotiationError::LinkLost);
        }
        Ok(self.output_mv)
    }
}

/// Mock watchdog counting pets.
#[derive(Default)]
pub struct MockWatchdog {
    pets: usize,
    timeout_ms: u64,
}

impl MockWatchdog {
    /// Create a mock watchdog with the given owner-enforced timeout.
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            pets: 0,
            timeout_ms,
        }
    }

    /// Number of pets received.
    pub fn pets(&self) -> usize {
        self.pets
    }
}

impl Watchdog for MockWatchdog {
    fn pet(&mut self) {
        self.pets += 1;
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}
