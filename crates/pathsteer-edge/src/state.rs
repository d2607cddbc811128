//! Steering state machine bookkeeping.
//!
//! Holds the engine-owned mutable status record and the protection-window
//! exit logic. Only the engine loop mutates this; the status publisher
//! reads a copy.
//!
//! ```text
//! NORMAL ──trigger──▶ PROTECT ──preroll+settle──▶ SWITCHING ──▶ HOLDING ──hold+clean──▶ NORMAL
//! ```

use pathsteer_common::status::{CommandAck, Mode, Recommendation, SteerState, TriggerReason};

use crate::uplink::Uplink;

/// RTT margin over baseline below which a protection tick counts as clean.
pub const CLEAN_RTT_MARGIN_MS: f64 = 30.0;

/// Loss fraction below which a protection tick counts as clean.
pub const CLEAN_LOSS_MAX: f64 = 0.02;

/// Engine-owned mutable status. The arbiter exclusively mutates
/// `active`/`state`/duplication fields; command ingress mutates the operator
/// lock and acks; everything else reads.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub mode: Mode,
    pub state: SteerState,
    pub active: Option<usize>,
    pub controller: u8,
    pub last_trigger: Option<TriggerReason>,
    pub trigger_detail: Option<String>,
    pub duplication_enabled: bool,
    pub duplication_engaged_at_ms: Option<u64>,
    pub protection_entered_at_ms: Option<u64>,
    /// Start of the current clean streak inside HOLDING.
    pub clean_since_ms: Option<u64>,
    pub switches_in_window: u32,
    pub flap_suppressed: bool,
    pub operator_force_locked: bool,
    pub global_risk: f64,
    pub recommendation: Recommendation,
    pub last_cmd: Option<CommandAck>,
    /// Operator `trigger` command awaiting the next tripwire evaluation.
    pub manual_trigger_pending: bool,
}

impl Default for EngineStatus {
    fn default() -> Self {
        EngineStatus {
            mode: Mode::Tripwire,
            state: SteerState::Normal,
            active: None,
            controller: 0,
            last_trigger: None,
            trigger_detail: None,
            duplication_enabled: false,
            duplication_engaged_at_ms: None,
            protection_entered_at_ms: None,
            clean_since_ms: None,
            switches_in_window: 0,
            flap_suppressed: false,
            operator_force_locked: false,
            global_risk: 0.0,
            recommendation: Recommendation::Normal,
            last_cmd: None,
            manual_trigger_pending: false,
        }
    }
}

impl EngineStatus {
    /// Record a tripwire fire: stamp the window start and reset the flap
    /// counter. Idempotent while already protecting — the caller only
    /// invokes this on the NORMAL/PREPARE → PROTECT edge.
    pub fn enter_protection(&mut self, reason: TriggerReason, detail: String, now_ms: u64) {
        self.state = SteerState::Protect;
        self.last_trigger = Some(reason);
        self.trigger_detail = Some(detail);
        self.protection_entered_at_ms = Some(now_ms);
        self.clean_since_ms = None;
        self.switches_in_window = 0;
        self.flap_suppressed = false;
    }

    /// PROTECT → SWITCHING gate: preroll elapsed and, when duplication is
    /// engaged, the settle period elapsed too. A failed duplication install
    /// leaves `duplication_engaged_at_ms` unset and does not hold the gate.
    pub fn preroll_complete(&self, now_ms: u64, preroll_ms: u64, settle_ms: u64) -> bool {
        let Some(entered) = self.protection_entered_at_ms else {
            return false;
        };
        if now_ms.saturating_sub(entered) < preroll_ms {
            return false;
        }
        match self.duplication_engaged_at_ms {
            Some(engaged) => now_ms.saturating_sub(engaged) >= settle_ms,
            None => true,
        }
    }

    /// Track the clean streak during HOLDING.
    pub fn track_clean(&mut self, clean: bool, now_ms: u64) {
        if clean {
            self.clean_since_ms.get_or_insert(now_ms);
        } else {
            self.clean_since_ms = None;
        }
    }

    /// HOLDING → NORMAL gate: minimum hold elapsed and an unbroken clean
    /// streak at least `clean_exit_ms` long.
    pub fn may_exit_protection(&self, now_ms: u64, min_hold_ms: u64, clean_exit_ms: u64) -> bool {
        let Some(entered) = self.protection_entered_at_ms else {
            return false;
        };
        if now_ms.saturating_sub(entered) < min_hold_ms {
            return false;
        }
        match self.clean_since_ms {
            Some(since) => now_ms.saturating_sub(since) >= clean_exit_ms,
            None => false,
        }
    }

    /// Leave the protection window. The caller handles duplication teardown
    /// (MIRROR mode keeps it on).
    pub fn exit_protection(&mut self) {
        self.state = SteerState::Normal;
        self.protection_entered_at_ms = None;
        self.duplication_engaged_at_ms = None;
        self.clean_since_ms = None;
    }

    /// Milliseconds until the minimum hold expires. Zero outside protection.
    pub fn hold_remaining_ms(&self, now_ms: u64, min_hold_ms: u64) -> u64 {
        match self.protection_entered_at_ms {
            Some(entered) => min_hold_ms.saturating_sub(now_ms.saturating_sub(entered)),
            None => 0,
        }
    }

    /// Milliseconds of clean running still required before exit.
    pub fn clean_remaining_ms(&self, now_ms: u64, clean_exit_ms: u64) -> u64 {
        if self.protection_entered_at_ms.is_none() {
            return 0;
        }
        match self.clean_since_ms {
            Some(since) => clean_exit_ms.saturating_sub(now_ms.saturating_sub(since)),
            None => clean_exit_ms,
        }
    }
}

/// A protection tick is "clean" when the active uplink shows no failures,
/// RTT near baseline, and negligible loss.
pub fn is_clean(uplink: &Uplink) -> bool {
    uplink.consecutive_failures == 0
        && uplink.rtt_current_ms < uplink.rtt_baseline_ms + CLEAN_RTT_MARGIN_MS
        && uplink.loss_fraction < CLEAN_LOSS_MAX
}
