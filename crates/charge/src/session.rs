//! Charge-session state machine and per-session bookkeeping.
//!
//! One [`ChargeSession`] lives for the duration of an adapter insertion. It
//! owns the stage progression, the fault latch, termination counting, the
//! elapsed-time clock, and the user-facing override knobs. All transitions
//! are explicit methods; the control task is the only writer and snapshots
//! are copied out for everyone else, replacing any shared mutable state.
//!
//! # Stage progression
//!
//! ```text
//! DEFAULT ──start──► ADAPTER_DETECT ──resolve──► ADAPTER_ENABLE
//!                                                      │ negotiated
//!                                                      ▼
//!              CHARGE_DONE ◄──termination── CHARGING ──┤
//!                                                      │ fatal fault
//!                                                      ▼
//!                                                    FAULT (latched)
//! ```
//!
//! `FAULT` is latched: only adapter removal ([`ChargeSession::reset`]) or an
//! explicit [`ChargeSession::reset_fault_and_retry`] leaves it. Repeated
//! fatal faults while latched are recorded in the history ring but change
//! nothing else, so fault entry is idempotent.

use heapless::Deque;

use crate::fault::{FaultEvent, FaultKind};
use crate::staging::GroupIndex;
use crate::threshold::Setpoint;

/// Depth of the per-session fault history ring.
pub const FAULT_HISTORY_DEPTH: usize = 8;

/// Lifecycle stage of a charge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// Idle; no adapter, or session stopped.
    #[default]
    Default,
    /// Adapter inserted; identifying type and capability.
    AdapterDetect,
    /// Direct-capable adapter found; negotiating the bus voltage up.
    AdapterEnable,
    /// Converters enabled; control loop ticking.
    Charging,
    /// Terminated normally; converters off, session history retained.
    ChargeDone,
    /// Latched after a fatal fault; converters off.
    Fault,
}

/// Why a session left `CHARGING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopReason {
    /// Termination criterion met (taper below iTerm in the top band).
    Complete,
    /// Adapter physically removed.
    AdapterRemoved,
    /// Host or user requested a stop.
    Requested,
    /// Fatal fault latched the session.
    Fault(FaultKind),
}

/// Read-only copy of session state, safe to hand to any consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionSnapshot {
    /// Current lifecycle stage.
    pub stage: Stage,
    /// Last commanded setpoint.
    pub setpoint: Setpoint,
    /// Seconds spent in `CHARGING` this session.
    pub elapsed_s: u32,
    /// First latched fatal fault, if any.
    pub fault: Option<FaultKind>,
    /// User current cap, if set.
    pub user_limit_ma: Option<u32>,
    /// Path-resistance override flag.
    pub ignore_path_resistance: bool,
}

/// State for one adapter-insertion-to-removal charging session.
#[derive(Debug, Default)]
pub struct ChargeSession {
    stage: Stage,
    group: Option<GroupIndex>,
    setpoint: Setpoint,
    volt_index: Option<usize>,
    elapsed_s: u32,
    term_run: u8,
    last_stop: Option<StopReason>,
    latched: Option<FaultEvent>,
    history: Deque<FaultKind, FAULT_HISTORY_DEPTH>,
    user_limit_ma: Option<u32>,
    ignore_path_resistance: bool,
    path_verified: bool,
}

impl ChargeSession {
    /// Fresh idle session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Staging group resolved for this session, once detection finished.
    #[must_use]
    pub fn group(&self) -> Option<GroupIndex> {
        self.group
    }

    /// Last commanded setpoint.
    #[must_use]
    pub fn setpoint(&self) -> Setpoint {
        self.setpoint
    }

    /// Voltage-table row the last setpoint used (threshold hysteresis).
    #[must_use]
    pub fn volt_index(&self) -> Option<usize> {
        self.volt_index
    }

    /// Seconds spent charging this session.
    #[must_use]
    pub fn elapsed_s(&self) -> u32 {
        self.elapsed_s
    }

    /// First latched fatal fault, if the session is in `FAULT`.
    #[must_use]
    pub fn fault(&self) -> Option<FaultEvent> {
        self.latched
    }

    /// Every fault latched since the last full reset, oldest first.
    pub fn fault_history(&self) -> impl Iterator<Item = &FaultKind> {
        self.history.iter()
    }

    /// Why the last session left `CHARGING`, if one has ended.
    #[must_use]
    pub fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    /// User current cap, if set.
    #[must_use]
    pub fn user_limit_ma(&self) -> Option<u32> {
        self.user_limit_ma
    }

    /// Set or clear the user current cap. Takes effect next tick.
    pub fn set_user_limit_ma(&mut self, limit: Option<u32>) {
        self.user_limit_ma = limit;
    }

    /// Whether the resistance staging term is bypassed.
    #[must_use]
    pub fn ignore_path_resistance(&self) -> bool {
        self.ignore_path_resistance
    }

    /// Bypass (or restore) the resistance staging term.
    pub fn set_ignore_path_resistance(&mut self, ignore: bool) {
        self.ignore_path_resistance = ignore;
    }

    /// Whether the initial path verification has passed this session.
    #[must_use]
    pub fn path_verified(&self) -> bool {
        self.path_verified
    }

    /// Record a passed initial path verification.
    pub fn mark_path_verified(&mut self) {
        self.path_verified = true;
    }

    /// Adapter inserted: `DEFAULT → ADAPTER_DETECT`. No-op elsewhere.
    pub fn start(&mut self) {
        if self.stage == Stage::Default {
            self.stage = Stage::AdapterDetect;
        }
    }

    /// Detection resolved a staging group: `ADAPTER_DETECT → ADAPTER_ENABLE`.
    pub fn on_adapter(&mut self, group: GroupIndex) {
        if self.stage == Stage::AdapterDetect {
            self.group = Some(group);
            self.stage = Stage::AdapterEnable;
        }
    }

    /// Bus voltage negotiated and converters enabled: start charging.
    pub fn on_negotiated(&mut self) {
        if self.stage == Stage::AdapterEnable {
            self.stage = Stage::Charging;
        }
    }

    /// Record the setpoint commanded this tick.
    pub fn record_setpoint(&mut self, setpoint: Setpoint, volt_index: usize) {
        self.setpoint = setpoint;
        self.volt_index = Some(volt_index);
    }

    /// Advance the charging clock by one tick's worth of seconds.
    pub fn advance_elapsed(&mut self, delta_s: u32) {
        if self.stage == Stage::Charging {
            self.elapsed_s = self.elapsed_s.saturating_add(delta_s);
        }
    }

    /// Feed one tick's termination observation. Returns `true` when the
    /// required run of consecutive below-iTerm ticks completes and the
    /// session moves to `CHARGE_DONE`.
    pub fn observe_termination(&mut self, below_iterm: bool, term_ticks: u8) -> bool {
        if self.stage != Stage::Charging {
            return false;
        }
        if below_iterm {
            self.term_run = self.term_run.saturating_add(1);
            if self.term_run >= term_ticks {
                self.stage = Stage::ChargeDone;
                self.setpoint = Setpoint::default();
                self.last_stop = Some(StopReason::Complete);
                return true;
            }
        } else {
            self.term_run = 0;
        }
        false
    }

    /// Latch a fatal fault. Returns `true` only on the transition into
    /// `FAULT`; repeat calls record history and return `false`, and a
    /// session that never started (`DEFAULT`) ignores faults entirely.
    pub fn force_fault(&mut self, event: FaultEvent) -> bool {
        if self.stage == Stage::Default {
            return false;
        }
        if self.history.is_full() {
            let _ = self.history.pop_front();
        }
        let _ = self.history.push_back(event.kind);
        if self.stage == Stage::Fault {
            return false;
        }
        self.stage = Stage::Fault;
        self.latched = Some(event);
        self.setpoint = Setpoint::default();
        self.last_stop = Some(StopReason::Fault(event.kind));
        true
    }

    /// Orderly stop from any active stage back to `DEFAULT` bookkeeping
    /// (stage only; history and overrides survive until [`reset`]).
    ///
    /// [`reset`]: ChargeSession::reset
    pub fn stop(&mut self, reason: StopReason) {
        if self.stage != Stage::Fault {
            self.stage = Stage::Default;
            self.setpoint = Setpoint::default();
            self.volt_index = None;
            self.term_run = 0;
            self.last_stop = Some(reason);
        }
    }

    /// Adapter removed: return everything to power-on defaults. The fault
    /// latch, history, elapsed clock, and overrides all clear.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Explicit recovery from `FAULT`: clear the latch and return to
    /// `DEFAULT` so the next insertion (or a still-present adapter being
    /// re-detected) starts a clean session. History is retained for
    /// diagnostics. No-op outside `FAULT`.
    pub fn reset_fault_and_retry(&mut self) {
        if self.stage == Stage::Fault {
            self.stage = Stage::Default;
            self.latched = None;
            self.setpoint = Setpoint::default();
            self.volt_index = None;
            self.term_run = 0;
            self.elapsed_s = 0;
            self.path_verified = false;
        }
    }

    /// Copy out the externally-interesting state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            stage: self.stage,
            setpoint: self.setpoint,
            elapsed_s: self.elapsed_s,
            fault: self.latched.map(|e| e.kind),
            user_limit_ma: self.user_limit_ma,
            ignore_path_resistance: self.ignore_path_resistance,
        }
    }
}
