//! Fast-path degradation detector.
//!
//! Evaluated every loop iteration against the active uplink only. Any
//! firing transitions the state machine into PROTECT; re-fires while
//! already protecting are absorbed by the caller.

use pathsteer_common::status::TriggerReason;

use crate::config::EngineConfig;
use crate::uplink::Uplink;

/// Seconds-to-obstruction below which a predicted obstruction fires.
pub const OBSTRUCTION_ETA_S: f64 = 5.0;

/// A fired trigger with its human-readable detail.
#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub reason: TriggerReason,
    pub detail: String,
}

/// Evaluate all trigger conditions against the active uplink.
///
/// `manual_pending` is the operator `trigger` command, which outranks the
/// metric-driven checks. Returns the first condition that fires.
pub fn evaluate(cfg: &EngineConfig, active: &Uplink, manual_pending: bool) -> Option<Trip> {
    if manual_pending {
        return Some(Trip {
            reason: TriggerReason::Manual,
            detail: "operator".to_string(),
        });
    }

    if !active.reachable {
        return Some(Trip {
            reason: TriggerReason::LinkDown,
            detail: format!("uplink={}", active.name()),
        });
    }

    if active.consecutive_failures >= cfg.probe_miss_count {
        return Some(Trip {
            reason: TriggerReason::ProbeMiss,
            detail: format!("miss={}", active.consecutive_failures),
        });
    }

    if let Some(step) = rtt_step(cfg, active) {
        return Some(Trip {
            reason: TriggerReason::RttStep,
            detail: format!("step={step:.1}ms"),
        });
    }

    if let Some(lte) = &active.lte {
        if lte.signal_dbm < cfg.rsrp_drop_threshold_db || lte.snr_db < cfg.sinr_drop_threshold_db {
            return Some(Trip {
                reason: TriggerReason::RsrpDrop,
                detail: format!("rsrp={:.1}dBm snr={:.1}dB", lte.signal_dbm, lte.snr_db),
            });
        }
    }

    if let Some(sat) = &active.sat {
        if sat.obstructed {
            return Some(Trip {
                reason: TriggerReason::StarlinkObstruction,
                detail: format!("obstructed={:.0}%", sat.obstruction_fraction * 100.0),
            });
        }
        if let Some(eta) = sat.obstruction_eta_s {
            if eta < OBSTRUCTION_ETA_S {
                return Some(Trip {
                    reason: TriggerReason::StarlinkObstruction,
                    detail: format!("eta={eta:.1}s"),
                });
            }
        }
    }

    None
}

/// RTT step above baseline, if the short window has filled and crossed the
/// threshold. Returns the step size in ms.
fn rtt_step(cfg: &EngineConfig, uplink: &Uplink) -> Option<f64> {
    if uplink.rtt_baseline_ms <= 0.0 {
        return None;
    }
    let recent = uplink.history.recent_success_rtts(cfg.rtt_step_window);
    if recent.len() < cfg.rtt_step_window {
        return None;
    }
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let step = mean - uplink.rtt_baseline_ms;
    (step >= cfg.rtt_step_threshold_ms).then_some(step)
}
