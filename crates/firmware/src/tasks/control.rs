//! Control-loop task: drives a charge session tick by tick.
//!
//! The loop owns every mutable piece of session state — the stage machine,
//! the coordination monitor, the fault arbiter — and everything else talks
//! to it through bounded channels: commands in, fault events in, diagnostic
//! reports out. There is no shared mutable session object; consumers get
//! value snapshots.
//!
//! # Tick ordering
//!
//! Within one `CHARGING` tick, strictly:
//!
//! 1. Drain the command and fault inboxes.
//! 2. Snapshot telemetry from every converter, before any computation.
//! 3. Poll and classify converter fault flags.
//! 4. Supervise the dual-path split against the previous tick's commands.
//! 5. Run the threshold calculator on the snapshot.
//! 6. Renegotiate the adapter voltage if it drifted out of tolerance.
//! 7. Split and command the new current, then evaluate termination.
//!
//! A fatal fault at any step disables all converters and latches the
//! session; the remainder of the tick is skipped and converters are never
//! re-enabled within the session.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};

use charge::fault::{classify_flags, Disposition, FaultArbiter, FaultEvent, FaultReport};
use charge::staging::{BrandId, ValidatedStaging};
use charge::threshold::{next_setpoint, Setpoint, ThresholdInput};
use charge::{retry, CoordinationMonitor, FaultKind, Retry};
use charge::{ChargeSession, SessionSnapshot, Stage, StopReason};
use platform::{
    AdapterCapability, AdapterPort, ChargePump, ChargerType, ConverterId, ConverterTelemetry,
};

/// Capacity of the fault inbox. Sized for the worst burst a single tick can
/// produce (both converters faulting on every tracked quantity at once).
pub const FAULT_INBOX_DEPTH: usize = 8;
/// Capacity of the command inbox.
pub const COMMAND_DEPTH: usize = 4;
/// Capacity of the outbound diagnostic report channel.
pub const REPORT_DEPTH: usize = 8;

/// Bounded inbox for asynchronous fault events.
pub type FaultInbox = Channel<CriticalSectionRawMutex, FaultEvent, FAULT_INBOX_DEPTH>;
/// Bounded inbox for control commands.
pub type CommandInbox = Channel<CriticalSectionRawMutex, Command, COMMAND_DEPTH>;
/// Outbound diagnostic reports, one per underlying fault event.
pub type ReportQueue = Channel<CriticalSectionRawMutex, FaultReport, REPORT_DEPTH>;

/// Commands accepted by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// Adapter inserted and classified; start a session if it qualifies.
    Start {
        /// Classification from the buck-charger glue.
        charger: ChargerType,
        /// Battery brand reported by the gauge glue.
        brand: BrandId,
    },
    /// Orderly stop requested by the host; converters off, no fault.
    Stop,
    /// Adapter physically removed; full reset including a latched fault.
    AdapterRemoved,
    /// Set or clear the user current cap, in milliamps.
    SetCurrentLimit(Option<u32>),
    /// Bypass or restore the path-resistance staging term.
    SetIgnorePathResistance(bool),
    /// Explicit recovery from a latched fault.
    ResetFaultAndRetry,
}

/// The staged direct-charge control loop.
///
/// Generic over the adapter and converter capabilities so the whole loop
/// runs on the host against `platform::mocks`. One or two converters;
/// with one, the conservative single-path ceilings apply and coordination
/// supervision is skipped.
pub struct ControlLoop<'ch, A, C>
where
    A: AdapterPort,
    C: ChargePump,
{
    adapter: A,
    primary: C,
    secondary: Option<C>,
    staging: ValidatedStaging,
    session: ChargeSession,
    monitor: CoordinationMonitor,
    arbiter: FaultArbiter,
    brand: BrandId,
    capability: Option<AdapterCapability>,
    requested_bus_mv: u32,
    last_split: Option<(u32, u32)>,
    elapsed_accum_ms: u64,
    faults: Receiver<'ch, CriticalSectionRawMutex, FaultEvent, FAULT_INBOX_DEPTH>,
    commands: Receiver<'ch, CriticalSectionRawMutex, Command, COMMAND_DEPTH>,
    reports: Sender<'ch, CriticalSectionRawMutex, FaultReport, REPORT_DEPTH>,
}

impl<'ch, A, C> ControlLoop<'ch, A, C>
where
    A: AdapterPort,
    C: ChargePump,
{
    /// Build a loop around its capabilities and channel endpoints.
    pub fn new(
        adapter: A,
        primary: C,
        secondary: Option<C>,
        staging: ValidatedStaging,
        faults: &'ch FaultInbox,
        commands: &'ch CommandInbox,
        reports: &'ch ReportQueue,
    ) -> Self {
        Self {
            adapter,
            primary,
            secondary,
            staging,
            session: ChargeSession::new(),
            monitor: CoordinationMonitor::new(),
            arbiter: FaultArbiter::new(),
            brand: BrandId(0),
            capability: None,
            requested_bus_mv: 0,
            last_split: None,
            elapsed_accum_ms: 0,
            faults: faults.receiver(),
            commands: commands.receiver(),
            reports: reports.sender(),
        }
    }

    /// Current session stage.
    pub fn stage(&self) -> Stage {
        self.session.stage()
    }

    /// Read-only copy of the session state for diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    /// Run forever: progress through the stages, pacing `CHARGING` at the
    /// policy tick period and blocking on commands while idle.
    pub async fn run(&mut self) -> ! {
        loop {
            self.step().await;
            match self.session.stage() {
                Stage::Charging => {
                    Timer::after(Duration::from_millis(self.staging.policy().tick_ms)).await;
                }
                Stage::Default | Stage::ChargeDone | Stage::Fault => {
                    // Nothing to do until someone tells us otherwise.
                    let cmd = self.commands.receive().await;
                    self.handle_command(cmd).await;
                }
                Stage::AdapterDetect | Stage::AdapterEnable => {}
            }
        }
    }

    /// One control-loop iteration: drain both inboxes, then do the current
    /// stage's work. Public so host tests can step the loop deterministically.
    pub async fn step(&mut self) {
        while let Ok(cmd) = self.commands.try_receive() {
            self.handle_command(cmd).await;
        }
        while let Ok(event) = self.faults.try_receive() {
            self.handle_event(event).await;
        }
        match self.session.stage() {
            Stage::Default | Stage::ChargeDone | Stage::Fault => {}
            Stage::AdapterDetect => self.detect().await,
            Stage::AdapterEnable => self.enable_path().await,
            Stage::Charging => self.tick().await,
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { charger, brand } => {
                // Only adjustable-voltage adapters take the staged path; the
                // buck charger keeps handling everything else.
                if charger.supports_direct() {
                    self.brand = brand;
                    self.session.start();
                }
            }
            Command::Stop => {
                self.disable_all().await;
                self.session.stop(StopReason::Requested);
                self.teardown_path_state();
            }
            Command::AdapterRemoved => {
                self.disable_all().await;
                self.session.reset();
                self.monitor.reset();
                self.arbiter = FaultArbiter::new();
                self.capability = None;
                self.teardown_path_state();
            }
            Command::SetCurrentLimit(limit) => self.session.set_user_limit_ma(limit),
            Command::SetIgnorePathResistance(ignore) => {
                self.session.set_ignore_path_resistance(ignore);
            }
            Command::ResetFaultAndRetry => {
                self.session.reset_fault_and_retry();
                self.monitor.reset();
                self.arbiter = FaultArbiter::new();
                self.teardown_path_state();
            }
        }
    }

    fn teardown_path_state(&mut self) {
        self.requested_bus_mv = 0;
        self.last_split = None;
        self.elapsed_accum_ms = 0;
    }

    /// Route one fault event: fatal latches, advisory is recorded, an
    /// escalated advisory run latches. Exactly one report per event that
    /// changes anything.
    async fn handle_event(&mut self, event: FaultEvent) {
        let escalation = self.staging.policy().advisory_escalation;
        let report = FaultReport {
            kind: event.kind,
            converter: event.converter,
            raw_flags: event.raw_flags,
        };
        match self.arbiter.assess(&event, escalation) {
            Disposition::Fatal(_) | Disposition::Escalated(_) => {
                self.disable_all().await;
                if self.session.force_fault(event) {
                    #[cfg(feature = "defmt")]
                    defmt::error!("fatal fault, session latched: {}", event.kind);
                    let _ = self.reports.try_send(report);
                }
            }
            Disposition::Advisory(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("advisory fault: {}", event.kind);
                let _ = self.reports.try_send(report);
            }
        }
    }

    async fn disable_all(&mut self) {
        // Disable errors are unrecoverable here; the converter watchdog
        // stops the path when the I2C write cannot.
        let _ = self.primary.disable().await;
        if let Some(secondary) = self.secondary.as_mut() {
            let _ = secondary.disable().await;
        }
    }

    /// Raise a converter bus error as an advisory register-access event.
    async fn bus_error(&mut self, converter: ConverterId) {
        self.handle_event(FaultEvent {
            kind: FaultKind::RegisterAccess,
            converter: Some(converter),
            raw_flags: 0,
        })
        .await;
    }

    /// `ADAPTER_DETECT`: probe capability, resolve the staging group.
    async fn detect(&mut self) {
        let capability = match self.adapter.detect().await {
            Ok(capability) => capability,
            Err(_) => {
                // Not a capable adapter after all; back to the buck path.
                self.session.stop(StopReason::AdapterRemoved);
                return;
            }
        };
        let insertion = match self.primary.read_telemetry().await {
            Ok(t) => t,
            Err(_) => {
                self.bus_error(ConverterId::Primary).await;
                return;
            }
        };
        self.capability = Some(capability);
        let group = self.staging.resolve(self.brand, insertion.tbat_dc);
        #[cfg(feature = "defmt")]
        defmt::info!(
            "adapter: {} mV / {} mA max, staging group {}",
            capability.max_voltage_mv,
            capability.max_current_ma,
            group.get()
        );
        self.session.on_adapter(group);
    }

    /// `ADAPTER_ENABLE`: negotiate the bus up, enable converters, verify the
    /// path actually follows the request.
    async fn enable_path(&mut self) {
        let Some(capability) = self.capability else {
            self.session.stop(StopReason::AdapterRemoved);
            return;
        };
        let policy = *self.staging.policy();

        let vbat = match self.primary.read_telemetry().await {
            Ok(t) => t.vbat_mv,
            Err(_) => {
                self.bus_error(ConverterId::Primary).await;
                return;
            }
        };
        let target_mv = vbat
            .saturating_mul(policy.pump_ratio)
            .min(capability.max_voltage_mv);

        let handshake = Retry::new(policy.negotiation_retries, policy.negotiation_backoff_ms);
        let negotiated = retry!(
            handshake,
            self.adapter
                .request_output(target_mv, capability.max_current_ma)
                .await
        );
        if negotiated.is_err() {
            self.handle_event(FaultEvent {
                kind: FaultKind::NegotiationFailed,
                converter: None,
                raw_flags: 0,
            })
            .await;
            return;
        }
        self.requested_bus_mv = target_mv;

        if self.enable_converters().await.is_err() {
            return;
        }

        // Path verification: the adapter must actually deliver what it
        // acknowledged before any real current is commanded. A readback
        // failure is a link problem, not a mismatched path.
        match self.adapter.output_voltage_mv().await {
            Ok(delivered)
                if delivered.abs_diff(target_mv) <= policy.renegotiate_tolerance_mv =>
            {
                self.session.mark_path_verified();
                self.session.on_negotiated();
                #[cfg(feature = "defmt")]
                defmt::info!("path verified, bus at {} mV, charging", delivered);
            }
            Ok(_) => {
                self.handle_event(FaultEvent {
                    kind: FaultKind::PathVerificationFailed,
                    converter: None,
                    raw_flags: 0,
                })
                .await;
            }
            Err(_) => self.adapter_fault().await,
        }
    }

    async fn enable_converters(&mut self) -> Result<(), ()> {
        // Flags are sticky across sessions; a leftover latch from a previous
        // fault would refault the first tick of a fresh session.
        if self.primary.clear_fault().await.is_err() || self.primary.enable().await.is_err() {
            self.bus_error(ConverterId::Primary).await;
            return Err(());
        }
        let secondary_ok = match self.secondary.as_mut() {
            Some(secondary) => {
                secondary.clear_fault().await.is_ok() && secondary.enable().await.is_ok()
            }
            None => true,
        };
        if !secondary_ok {
            self.bus_error(ConverterId::Secondary).await;
            return Err(());
        }
        Ok(())
    }

    /// One `CHARGING` tick. See the module docs for the strict ordering.
    async fn tick(&mut self) {
        let policy = *self.staging.policy();
        let limits = *self.staging.coordination();

        // Telemetry snapshot for the whole tick, before any computation.
        let primary_t = match self.primary.read_telemetry().await {
            Ok(t) => t,
            Err(_) => {
                self.bus_error(ConverterId::Primary).await;
                return;
            }
        };
        let secondary_t = match self.secondary.as_mut() {
            Some(secondary) => match secondary.read_telemetry().await {
                Ok(t) => Some(t),
                Err(_) => {
                    self.bus_error(ConverterId::Secondary).await;
                    return;
                }
            },
            None => None,
        };

        if self.poll_fault_flags().await.is_err() {
            return;
        }
        if self.session.stage() != Stage::Charging {
            return;
        }

        // Supervise the previous tick's split against what actually flowed.
        if let (Some(split), Some(secondary_t)) = (self.last_split, secondary_t) {
            let verdict = self.monitor.observe(&limits, split, &primary_t, &secondary_t);
            if let Some(kind) = verdict.fault {
                self.handle_event(FaultEvent {
                    kind,
                    converter: None,
                    raw_flags: 0,
                })
                .await;
            }
        }

        let group = self.session.group().unwrap_or_default();
        let outcome = {
            let prior = self.session.setpoint();
            let input = ThresholdInput {
                vbat_mv: primary_t.vbat_mv,
                tbat_dc: primary_t.tbat_dc,
                path_res_mohm: estimate_path_res_mohm(&primary_t, policy.pump_ratio),
                elapsed_s: self.session.elapsed_s(),
                prior,
                prior_volt_index: self.session.volt_index(),
                single_path: self.secondary.is_none(),
                ignore_path_resistance: self.session.ignore_path_resistance(),
                external_cap_ma: self.session.user_limit_ma(),
                derate_ma: self.monitor.derate_ma(&limits),
            };
            next_setpoint(self.staging.group(group), &policy, &input)
        };

        if outcome.pending_temperature_fault {
            self.handle_event(FaultEvent {
                kind: FaultKind::TemperatureRangeExhausted,
                converter: None,
                raw_flags: 0,
            })
            .await;
            return;
        }

        if self.renegotiate(&outcome.setpoint).await.is_err() {
            return;
        }

        if self.command_split(outcome.setpoint.current_ma).await.is_err() {
            return;
        }
        self.session
            .record_setpoint(outcome.setpoint, outcome.volt_index);
        self.advance_clock();

        // Termination: taper below iTerm while resting in the top band.
        let measured_ma = primary_t
            .ibat_ma
            .saturating_add(secondary_t.map_or(0, |t| t.ibat_ma));
        let target_mv = self
            .staging
            .group(group)
            .volt
            .last()
            .map_or(0, |row| row.vbat_mv);
        let in_band = primary_t.vbat_mv.saturating_add(policy.voltage_band_mv) >= target_mv;
        let below_iterm = in_band && measured_ma < policy.term_current_ma;
        if self.session.observe_termination(below_iterm, policy.term_ticks) {
            #[cfg(feature = "defmt")]
            defmt::info!("charge complete after {} s", self.session.elapsed_s());
            self.disable_all().await;
        }

        self.arbiter.note_clean_tick();
    }

    /// Poll the sticky fault registers on both converters and route anything
    /// they latched. `Err` means the registers could not be read; the stage
    /// check after this call catches anything fatal that was routed.
    async fn poll_fault_flags(&mut self) -> Result<(), ()> {
        let primary_flags = match self.primary.fault_flags().await {
            Ok(flags) => flags,
            Err(_) => {
                self.bus_error(ConverterId::Primary).await;
                return Err(());
            }
        };
        let mut latched = heapless::Vec::<FaultEvent, 2>::new();
        if let Some(kind) = classify_flags(primary_flags) {
            let _ = latched.push(FaultEvent {
                kind,
                converter: Some(ConverterId::Primary),
                raw_flags: primary_flags.bits(),
            });
        }
        if let Some(secondary) = self.secondary.as_mut() {
            let secondary_flags = match secondary.fault_flags().await {
                Ok(flags) => flags,
                Err(_) => {
                    self.bus_error(ConverterId::Secondary).await;
                    return Err(());
                }
            };
            if let Some(kind) = classify_flags(secondary_flags) {
                let _ = latched.push(FaultEvent {
                    kind,
                    converter: Some(ConverterId::Secondary),
                    raw_flags: secondary_flags.bits(),
                });
            }
        }
        for event in latched {
            self.handle_event(event).await;
        }
        Ok(())
    }

    /// Keep the adapter bus tracking the pump ratio as the cell voltage
    /// walks up the table. Non-`Ok` means a fatal fault was raised.
    async fn renegotiate(&mut self, setpoint: &Setpoint) -> Result<(), ()> {
        let policy = *self.staging.policy();
        let Some(capability) = self.capability else {
            return Ok(());
        };
        let want_mv = setpoint
            .voltage_mv
            .saturating_mul(policy.pump_ratio)
            .min(capability.max_voltage_mv);
        let delivered = match self.adapter.output_voltage_mv().await {
            Ok(mv) => mv,
            Err(_) => {
                self.adapter_fault().await;
                return Err(());
            }
        };
        // Renegotiate when the table walk moved the target, or the adapter
        // drifted away from what it last acknowledged.
        let drifted =
            delivered.abs_diff(self.requested_bus_mv) > policy.renegotiate_tolerance_mv;
        if want_mv == self.requested_bus_mv && !drifted {
            return Ok(());
        }
        let handshake = Retry::new(policy.negotiation_retries, policy.negotiation_backoff_ms);
        let renegotiated = retry!(
            handshake,
            self.adapter
                .request_output(want_mv, capability.max_current_ma)
                .await
        );
        match renegotiated {
            Ok(()) => {
                self.requested_bus_mv = want_mv;
                Ok(())
            }
            Err(_) => {
                self.adapter_fault().await;
                Err(())
            }
        }
    }

    async fn adapter_fault(&mut self) {
        self.handle_event(FaultEvent {
            kind: FaultKind::NegotiationFailed,
            converter: None,
            raw_flags: 0,
        })
        .await;
    }

    /// Split the total across the paths and command both converters.
    async fn command_split(&mut self, total_ma: u32) -> Result<(), ()> {
        let share = self.staging.coordination().primary_share_pct;
        if self.secondary.is_some() {
            let split = charge::coordination::split_current(total_ma, share);
            if self.primary.command_current(split.0).await.is_err() {
                self.bus_error(ConverterId::Primary).await;
                return Err(());
            }
            // The borrow of self.secondary ends before the error path needs self.
            let commanded = match self.secondary.as_mut() {
                Some(secondary) => secondary.command_current(split.1).await,
                None => Ok(()),
            };
            if commanded.is_err() {
                self.bus_error(ConverterId::Secondary).await;
                return Err(());
            }
            self.last_split = Some(split);
        } else {
            if self.primary.command_current(total_ma).await.is_err() {
                self.bus_error(ConverterId::Primary).await;
                return Err(());
            }
            self.last_split = None;
        }
        Ok(())
    }

    #[allow(clippy::arithmetic_side_effects)] // constant non-zero divisor
    fn advance_clock(&mut self) {
        self.elapsed_accum_ms = self
            .elapsed_accum_ms
            .saturating_add(self.staging.policy().tick_ms);
        let whole_s = (self.elapsed_accum_ms / 1000) as u32;
        if whole_s > 0 {
            self.elapsed_accum_ms %= 1000;
            self.session.advance_elapsed(whole_s);
        }
    }
}

/// Estimate the battery-path series resistance from one snapshot.
///
/// With an ideal 2:1 pump the battery-side source sits at `vbus / ratio`;
/// the drop to the measured cell voltage across the measured current is the
/// cable + connector + board resistance. Zero current (or a pump reporting
/// below the cell) reads as zero rather than a spurious derate.
#[allow(clippy::arithmetic_side_effects)] // divisors guarded non-zero above each use
fn estimate_path_res_mohm(t: &ConverterTelemetry, pump_ratio: u32) -> u32 {
    if t.ibat_ma == 0 || pump_ratio == 0 {
        return 0;
    }
    let source_mv = t.vbus_mv / pump_ratio.max(1);
    let drop_mv = source_mv.saturating_sub(t.vbat_mv);
    drop_mv.saturating_mul(1000) / t.ibat_ma.max(1)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use super::*;

    #[test]
    fn path_resistance_estimate_from_snapshot() {
        // 9.0 V bus / 2 = 4.5 V source, 4.35 V cell, 3 A → 50 mΩ.
        let t = ConverterTelemetry {
            vbus_mv: 9000,
            vbat_mv: 4350,
            ibat_ma: 3000,
            ..ConverterTelemetry::default()
        };
        assert_eq!(estimate_path_res_mohm(&t, 2), 50);
    }

    #[test]
    fn path_resistance_estimate_is_zero_at_rest() {
        let t = ConverterTelemetry {
            vbus_mv: 9000,
            vbat_mv: 4400,
            ibat_ma: 0,
            ..ConverterTelemetry::default()
        };
        assert_eq!(estimate_path_res_mohm(&t, 2), 0);
    }

    #[test]
    fn path_resistance_estimate_clamps_inverted_readings() {
        // Bus sagging below 2× cell must not underflow.
        let t = ConverterTelemetry {
            vbus_mv: 8000,
            vbat_mv: 4400,
            ibat_ma: 2000,
            ..ConverterTelemetry::default()
        };
        assert_eq!(estimate_path_res_mohm(&t, 2), 0);
    }
}
