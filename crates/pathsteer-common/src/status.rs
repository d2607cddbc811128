//! Status snapshot models.
//!
//! These types are the wire contract between the Edge engine (which writes
//! `status.json` at 10 Hz) and everything that reads it: the operator UI,
//! the training-data logger, and the integration tests. The engine owns the
//! mutable state; readers only ever see a complete serialized snapshot.

use serde::{Deserialize, Serialize};

/// Engine operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Observe-only: the tripwire is evaluated for telemetry but never actuates.
    Training,
    /// Normal operation: tripwire arms protection and the arbiter may switch.
    #[default]
    Tripwire,
    /// Duplication stays enabled even in NORMAL.
    Mirror,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Training => "training",
            Mode::Tripwire => "tripwire",
            Mode::Mirror => "mirror",
        }
    }
}

/// Steering state machine position.
///
/// ```text
/// NORMAL → PROTECT → SWITCHING → HOLDING → NORMAL
/// ```
///
/// `Prepare` is a reserved pass-through for a future predictive mode; the
/// tripwire treats it exactly like `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteerState {
    #[default]
    Normal,
    Prepare,
    Protect,
    Switching,
    Holding,
}

impl SteerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SteerState::Normal => "normal",
            SteerState::Prepare => "prepare",
            SteerState::Protect => "protect",
            SteerState::Switching => "switching",
            SteerState::Holding => "holding",
        }
    }
}

/// Why the tripwire fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// Short-window RTT mean stepped above baseline.
    RttStep,
    /// Consecutive probe misses on the active uplink.
    ProbeMiss,
    /// Active uplink no longer reachable.
    LinkDown,
    /// Cellular signal power below the hard floor.
    RsrpDrop,
    /// Dish reports an obstruction, current or imminent.
    StarlinkObstruction,
    /// Operator `trigger` command.
    Manual,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::RttStep => "rtt_step",
            TriggerReason::ProbeMiss => "probe_miss",
            TriggerReason::LinkDown => "link_down",
            TriggerReason::RsrpDrop => "rsrp_drop",
            TriggerReason::StarlinkObstruction => "starlink_obstruction",
            TriggerReason::Manual => "manual",
        }
    }
}

/// Risk-scorer recommendation for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    #[default]
    Normal,
    Prepare,
    Protect,
}

/// Physical flavor of an uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UplinkKind {
    Lte,
    Sat,
    Fiber,
}

impl UplinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UplinkKind::Lte => "lte",
            UplinkKind::Sat => "sat",
            UplinkKind::Fiber => "fiber",
        }
    }
}

/// Outcome of the most recently processed operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmdResult {
    Exec,
    Fail,
}

/// Acknowledgement of the last operator command, surfaced in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub last_cmd_id: String,
    pub result: CmdResult,
    pub detail: String,
}

/// GPS fix as read from the host's snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub speed_mph: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub fix: bool,
}

/// Cellular-specific telemetry for one uplink.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LteStatus {
    /// Signal power (RSRP) in dBm.
    pub signal_dbm: f64,
    /// Signal-to-noise ratio in dB.
    pub snr_db: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
}

/// Satellite-dish telemetry for one uplink.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SatStatus {
    pub online: bool,
    pub obstructed: bool,
    /// Fraction of the sky currently obstructed, 0.0–1.0.
    pub obstruction_fraction: f64,
    /// Latency reported by the dish itself, milliseconds.
    pub dish_latency_ms: f64,
    /// Seconds until the next predicted obstruction, if the dish knows one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obstruction_eta_s: Option<f64>,
}

/// Per-uplink slice of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkStatus {
    pub name: String,
    pub kind: UplinkKind,
    pub enabled: bool,
    pub reachable: bool,
    pub active: bool,
    /// Sticky operator force-fail in effect.
    pub operator_failed: bool,
    pub rtt_ms: f64,
    pub baseline_ms: f64,
    pub jitter_ms: f64,
    pub loss_fraction: f64,
    pub risk: f64,
    pub consec_fail: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<LteStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<SatStatus>,
}

/// The complete published snapshot.
///
/// Serialized atomically (write temp, fsync, rename) so readers observe
/// either the previous or the new snapshot, never a torn one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub run: String,
    pub ts_ms: u64,
    pub mode: Mode,
    pub state: SteerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_uplink: Option<String>,
    /// Which point-of-presence controller the edge currently prefers (0 or 1).
    pub controller: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<TriggerReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_detail: Option<String>,
    pub duplication_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplication_engaged_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_entered_at_ms: Option<u64>,
    /// Milliseconds until the minimum hold expires (0 outside protection).
    pub hold_remaining_ms: u64,
    /// Milliseconds of clean running still required before exit.
    pub clean_remaining_ms: u64,
    pub switches_in_window: u32,
    pub flap_suppressed: bool,
    pub operator_force_locked: bool,
    pub global_risk: f64,
    pub recommendation: Recommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cmd: Option<CommandAck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsFix>,
    pub uplinks: Vec<UplinkStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> StatusSnapshot {
        StatusSnapshot {
            run: "run_TESTTEST".into(),
            ts_ms: 1_700_000_000_000,
            mode: Mode::Tripwire,
            state: SteerState::Holding,
            active_uplink: Some("sl_a".into()),
            controller: 0,
            last_trigger: Some(TriggerReason::RttStep),
            trigger_detail: Some("step=132.4ms".into()),
            duplication_enabled: true,
            duplication_engaged_at_ms: Some(1_699_999_999_500),
            protection_entered_at_ms: Some(1_699_999_999_400),
            hold_remaining_ms: 2400,
            clean_remaining_ms: 2000,
            switches_in_window: 1,
            flap_suppressed: false,
            operator_force_locked: false,
            global_risk: 0.3,
            recommendation: Recommendation::Normal,
            last_cmd: None,
            gps: Some(GpsFix {
                lat: 36.1,
                lon: -115.2,
                speed_mph: 61.0,
                heading: 184.0,
                fix: true,
            }),
            uplinks: vec![UplinkStatus {
                name: "sl_a".into(),
                kind: UplinkKind::Sat,
                enabled: true,
                reachable: true,
                active: true,
                operator_failed: false,
                rtt_ms: 42.0,
                baseline_ms: 40.0,
                jitter_ms: 4.5,
                loss_fraction: 0.0,
                risk: 0.0,
                consec_fail: 0,
                last_probe_at_ms: Some(1_700_000_000_000),
                lte: None,
                sat: Some(SatStatus {
                    online: true,
                    obstructed: false,
                    obstruction_fraction: 0.01,
                    dish_latency_ms: 38.0,
                    obstruction_eta_s: None,
                }),
            }],
        }
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = sample_snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&TriggerReason::StarlinkObstruction).unwrap(),
            "\"starlink_obstruction\""
        );
        assert_eq!(serde_json::to_string(&Mode::Mirror).unwrap(), "\"mirror\"");
        assert_eq!(
            serde_json::to_string(&SteerState::Switching).unwrap(),
            "\"switching\""
        );
        assert_eq!(serde_json::to_string(&UplinkKind::Lte).unwrap(), "\"lte\"");
    }

    #[test]
    fn kind_specific_blocks_are_omitted_when_absent() {
        let snap = sample_snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("\"lte\""), "lte block should be omitted");
        assert!(json.contains("\"sat\""));
    }

    #[test]
    fn trigger_reason_strings_match_serde() {
        for (reason, s) in [
            (TriggerReason::RttStep, "rtt_step"),
            (TriggerReason::ProbeMiss, "probe_miss"),
            (TriggerReason::LinkDown, "link_down"),
            (TriggerReason::RsrpDrop, "rsrp_drop"),
            (TriggerReason::StarlinkObstruction, "starlink_obstruction"),
            (TriggerReason::Manual, "manual"),
        ] {
            assert_eq!(reason.as_str(), s);
            assert_eq!(
                serde_json::to_string(&reason).unwrap(),
                format!("\"{s}\"")
            );
        }
    }
}
