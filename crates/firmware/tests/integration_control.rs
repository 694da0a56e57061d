//! End-to-end control-loop tests against the platform mocks.
//!
//! Each test builds a small staging configuration, wires a [`ControlLoop`]
//! to scripted mocks through real channels, and steps it deterministically.
//! Mocks are passed by `&mut` so their command and request logs can be
//! inspected after the loop is dropped.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use charge::coordination::CoordinationLimits;
use charge::fault::{FaultEvent, FaultKind};
use charge::staging::{
    BrandId, ChargePolicy, ResistanceBand, StageGroup, StagingConfig, TempBand, ValidatedStaging,
    VoltPoint,
};
use charge::Stage;
use firmware::tasks::control::{
    Command, CommandInbox, ControlLoop, FaultInbox, ReportQueue,
};
use platform::mocks::{MockAdapter, MockConverter};
use platform::{
    AdapterCapability, ChargePump, ChargerType, ConverterFaultFlags, ConverterId,
    ConverterTelemetry,
};

/// Two-row staging table: ramp at 6 A until 4.35 V, then taper at 2 A.
/// Negotiation backoff is 1 ms so retry tests run in real time.
fn staging(imbalance_tolerance_ma: u32) -> ValidatedStaging {
    StagingConfig {
        groups: [StageGroup {
            brands: [BrandId(1)].into_iter().collect(),
            insertion_min_dc: 0,
            insertion_max_dc: 450,
            volt: [
                VoltPoint {
                    vbat_mv: 3000,
                    ceiling_high_ma: 6000,
                    ceiling_low_ma: 3000,
                },
                VoltPoint {
                    vbat_mv: 4350,
                    ceiling_high_ma: 2000,
                    ceiling_low_ma: 1000,
                },
            ]
            .into_iter()
            .collect(),
            resistance: [ResistanceBand {
                min_mohm: 0,
                max_mohm: 800,
                ceiling_ma: 6000,
            }]
            .into_iter()
            .collect(),
            temperature: [TempBand {
                min_dc: 0,
                max_dc: 450,
                ceiling_ma: 6000,
            }]
            .into_iter()
            .collect(),
            time: heapless::Vec::new(),
        }]
        .into_iter()
        .collect(),
        coordination: CoordinationLimits {
            imbalance_tolerance_ma,
            ..CoordinationLimits::default()
        },
        policy: ChargePolicy {
            max_step_ma: 6000, // full ramp in one tick
            negotiation_backoff_ms: 1,
            ..ChargePolicy::default()
        },
    }
    .validate()
    .unwrap()
}

fn capability() -> AdapterCapability {
    AdapterCapability {
        max_voltage_mv: 11_000,
        max_current_ma: 6_000,
    }
}

/// Standing snapshot for a cell in the bulk phase, split flowing evenly.
fn bulk() -> ConverterTelemetry {
    ConverterTelemetry {
        vbus_mv: 8000,
        ibus_ma: 1500,
        vbat_mv: 4000,
        ibat_ma: 3000,
        die_temp_dc: 300,
        tbat_dc: 250,
    }
}

/// Snapshot of a nearly full cell tapering below iTerm.
fn tapered() -> ConverterTelemetry {
    ConverterTelemetry {
        vbus_mv: 8700,
        ibus_ma: 100,
        vbat_mv: 4340,
        ibat_ma: 200,
        die_temp_dc: 300,
        tbat_dc: 250,
    }
}

fn start() -> Command {
    Command::Start {
        charger: ChargerType::Direct,
        brand: BrandId(1),
    }
}

// Full session: DEFAULT → ADAPTER_DETECT → ADAPTER_ENABLE → CHARGING →
// CHARGE_DONE, with the bus renegotiated as the table walk moves the
// regulation target and termination after three below-iTerm ticks.
#[tokio::test]
async fn session_runs_to_charge_done() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());
    // Reads land in order: detect, enable, then one per tick. The first
    // three ticks see the bulk cell, the last three the tapering cell.
    for _ in 0..3 {
        primary.push_telemetry(bulk());
    }
    secondary.push_telemetry(bulk());
    for _ in 0..3 {
        primary.push_telemetry(tapered());
        secondary.push_telemetry(tapered());
    }

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        assert_eq!(ctl.stage(), Stage::Default);

        COMMANDS.try_send(start()).unwrap();
        ctl.step().await; // detect + group resolution
        assert_eq!(ctl.stage(), Stage::AdapterEnable);
        ctl.step().await; // negotiate, enable, verify
        assert_eq!(ctl.stage(), Stage::Charging);
        assert!(ctl.snapshot().fault.is_none());

        ctl.step().await; // tick: ramp to 6 A, renegotiate toward 4.35 V
        assert_eq!(ctl.snapshot().setpoint.current_ma, 6000);
        for _ in 0..3 {
            ctl.step().await; // tapering ticks
        }
        assert_eq!(ctl.stage(), Stage::ChargeDone);
        // Termination zeroes the commanded setpoint.
        assert_eq!(ctl.snapshot().setpoint.current_ma, 0);
    }

    // Initial negotiation at 2× Vbat, then one renegotiation as the walk
    // targeted the top row; both within adapter capability.
    assert_eq!(adapter.requests(), &[(8000, 6000), (8700, 6000)]);
    assert_eq!(adapter.delivered_mv(), 8700);
    assert!(!primary.is_enabled());
    assert!(!secondary.is_enabled());
    // Even 50/50 split of the 6 A total on every commanding tick.
    assert!(primary.commanded().iter().all(|&ma| ma == 3000));
    assert_eq!(primary.commanded(), secondary.commanded());
    // A clean session emits no fault reports.
    assert!(REPORTS.try_receive().is_err());
}

// Adapter ignores every voltage request: the handshake retries up to the
// configured budget with backoff, then the session latches NEGOTIATION_FAILED.
#[tokio::test]
async fn negotiation_exhaustion_latches_fault() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    adapter.inject_timeouts(3);
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::AdapterEnable);
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Fault);
        assert_eq!(
            ctl.snapshot().fault,
            Some(FaultKind::NegotiationFailed)
        );

        // Explicit recovery returns to DEFAULT, ready for a fresh start.
        COMMANDS.try_send(Command::ResetFaultAndRetry).unwrap();
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Default);
    }

    // Exactly the configured number of attempts, no more.
    assert_eq!(adapter.requests().len(), 3);
    assert!(adapter.requests().iter().all(|&r| r == (8000, 6000)));
    // Converters were never enabled and never commanded.
    assert!(!primary.is_enabled());
    assert!(primary.commanded().is_empty());
    assert!(secondary.commanded().is_empty());

    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::NegotiationFailed);
    assert!(REPORTS.try_receive().is_err(), "one report per latch");
}

// A fatal event latches the session once; a second event during the same
// session is history-only and produces no duplicate report.
#[tokio::test]
async fn fatal_fault_latch_is_idempotent() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);

        let event = FaultEvent {
            kind: FaultKind::BusOverVoltage,
            converter: Some(ConverterId::Primary),
            raw_flags: 0x02,
        };
        FAULTS.try_send(event).unwrap();
        FAULTS.try_send(event).unwrap();
        ctl.step().await;

        assert_eq!(ctl.stage(), Stage::Fault);
        assert_eq!(ctl.snapshot().fault, Some(FaultKind::BusOverVoltage));
    }

    assert!(!primary.is_enabled());
    assert!(!secondary.is_enabled());
    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::BusOverVoltage);
    assert_eq!(report.converter, Some(ConverterId::Primary));
    assert!(REPORTS.try_receive().is_err(), "duplicate event not re-reported");
}

// Sustained split deviation: three consecutive out-of-tolerance ticks raise
// one advisory CURRENT_IMBALANCE and latch a derate; the session keeps
// charging at the reduced ceiling.
#[tokio::test]
async fn sustained_imbalance_derates_without_stopping() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());
    // Detect, enable, and the first tick read a balanced path; from the
    // second tick on the primary hogs 400 mA of the secondary's share.
    for _ in 0..3 {
        primary.push_telemetry(bulk());
    }
    secondary.push_telemetry(bulk());
    for _ in 0..4 {
        primary.push_telemetry(ConverterTelemetry {
            vbus_mv: 8700,
            ibat_ma: 3400,
            ..bulk()
        });
        secondary.push_telemetry(ConverterTelemetry {
            vbus_mv: 8700,
            ibat_ma: 2600,
            ..bulk()
        });
    }

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(300),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);

        // Tick 1 ramps and commands the even split; ticks 2-4 observe the
        // deviation; the trip lands on tick 4 and derates tick 4's command.
        for _ in 0..4 {
            ctl.step().await;
        }
        assert_eq!(ctl.stage(), Stage::Charging, "advisory must not stop");
        assert_eq!(ctl.snapshot().setpoint.current_ma, 5500);

        // One more tick: latch holds, no duplicate fault, derate persists.
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);
    }

    assert_eq!(primary.commanded(), &[3000, 3000, 3000, 2750, 2750]);
    assert_eq!(secondary.commanded(), &[3000, 3000, 3000, 2750, 2750]);
    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::CurrentImbalance);
    assert!(REPORTS.try_receive().is_err(), "trip reports exactly once");
}

// The latched derate must bind wherever the voltage walk sits: a session in
// the 2 A taper row trips the imbalance monitor and the next command drops to
// ceiling minus derate, not to some value above the row ceiling.
#[tokio::test]
async fn imbalance_derate_binds_in_the_taper_row() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    // Cell already past the 4.35 V breakpoint; the primary draws 1400 mA of
    // a 1000 mA share on every tick while the secondary starves.
    let mut primary = MockConverter::new(
        ConverterId::Primary,
        ConverterTelemetry {
            vbus_mv: 8700,
            ibus_ma: 700,
            vbat_mv: 4360,
            ibat_ma: 1400,
            die_temp_dc: 300,
            tbat_dc: 250,
        },
    );
    let mut secondary = MockConverter::new(
        ConverterId::Secondary,
        ConverterTelemetry {
            vbus_mv: 8700,
            ibus_ma: 300,
            vbat_mv: 4360,
            ibat_ma: 600,
            die_temp_dc: 300,
            tbat_dc: 250,
        },
    );

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(300),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);

        // Tick 1 commands the 2 A row ceiling; ticks 2-4 observe the skewed
        // split and the trip on tick 4 derates tick 4's command.
        for _ in 0..4 {
            ctl.step().await;
        }
        assert_eq!(ctl.stage(), Stage::Charging, "advisory must not stop");
        assert_eq!(ctl.snapshot().setpoint.current_ma, 1500);
    }

    assert_eq!(primary.commanded(), &[1000, 1000, 1000, 750]);
    assert_eq!(secondary.commanded(), &[1000, 1000, 1000, 750]);
    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::CurrentImbalance);
    assert!(REPORTS.try_receive().is_err(), "trip reports exactly once");
}

// Converter fault flags are sticky across sessions: after a latched fault and
// an explicit recovery, the next session's enable clears them instead of
// refaulting on the first tick's poll.
#[tokio::test]
async fn recovery_clears_sticky_flags_from_the_faulted_session() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());
    // The chip latches BUS_OVP on the first charging tick's poll; the flag
    // then stays set until someone clears it.
    primary.push_fault_flags(ConverterFaultFlags::BUS_OVP);

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        ctl.step().await; // first tick polls the latched flag
        assert_eq!(ctl.stage(), Stage::Fault);
        assert_eq!(ctl.snapshot().fault, Some(FaultKind::BusOverVoltage));

        COMMANDS.try_send(Command::ResetFaultAndRetry).unwrap();
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Default);

        // Fresh session over the same hardware: the stale flag must not
        // refault the loop.
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);
        assert!(ctl.snapshot().fault.is_none());
        assert_eq!(ctl.snapshot().setpoint.current_ma, 6000);
    }

    // Only the recovered session got far enough to command current.
    assert_eq!(primary.commanded(), &[3000]);
    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::BusOverVoltage);
    assert!(REPORTS.try_receive().is_err(), "one report per latch");
}

// A failed voltage readback during path verification is a link problem and
// faults as NEGOTIATION_FAILED, not as a mismatched power path.
#[tokio::test]
async fn voltage_readback_failure_faults_as_negotiation() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    adapter.fail_voltage_reads(1);
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await; // negotiate ok, enable, readback fails
        assert_eq!(ctl.stage(), Stage::Fault);
        assert_eq!(ctl.snapshot().fault, Some(FaultKind::NegotiationFailed));
    }

    assert!(!primary.is_enabled());
    assert!(!secondary.is_enabled());
    assert_eq!(adapter.requests().len(), 1, "handshake itself succeeded");
    let report = REPORTS.try_receive().unwrap();
    assert_eq!(report.kind, FaultKind::NegotiationFailed);
}

// Single-converter build: conservative per-row ceilings apply and the whole
// total goes to the primary path.
#[tokio::test]
async fn single_path_uses_conservative_ceiling() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());

    {
        let mut ctl: ControlLoop<'_, _, &mut MockConverter> = ControlLoop::new(
            &mut adapter,
            &mut primary,
            None,
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.stage(), Stage::Charging);
        ctl.step().await;
        assert_eq!(ctl.snapshot().setpoint.current_ma, 3000);
    }

    assert_eq!(primary.last_commanded(), Some(3000));
}

// The user current cap participates in the ceiling minimum and clearing it
// restores the staged ceiling.
#[tokio::test]
async fn user_limit_caps_and_restores() {
    static FAULTS: FaultInbox = FaultInbox::new();
    static COMMANDS: CommandInbox = CommandInbox::new();
    static REPORTS: ReportQueue = ReportQueue::new();

    let mut adapter = MockAdapter::new(capability());
    let mut primary = MockConverter::new(ConverterId::Primary, bulk());
    let mut secondary = MockConverter::new(ConverterId::Secondary, bulk());

    {
        let mut ctl = ControlLoop::new(
            &mut adapter,
            &mut primary,
            Some(&mut secondary),
            staging(10_000),
            &FAULTS,
            &COMMANDS,
            &REPORTS,
        );
        COMMANDS.try_send(start()).unwrap();
        COMMANDS.try_send(Command::SetCurrentLimit(Some(2000))).unwrap();
        ctl.step().await;
        ctl.step().await;
        ctl.step().await;
        assert_eq!(ctl.snapshot().setpoint.current_ma, 2000);

        COMMANDS.try_send(Command::SetCurrentLimit(None)).unwrap();
        ctl.step().await;
        assert_eq!(ctl.snapshot().setpoint.current_ma, 6000);
    }

    assert_eq!(primary.commanded(), &[1000, 3000]);
}
