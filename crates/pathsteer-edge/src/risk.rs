//! Per-uplink risk estimate.
//!
//! A simple clamped feature blend recomputed every 250 ms for every enabled
//! uplink. The scorer only writes `risk_now` and the published
//! recommendation; it never actuates.

use pathsteer_common::status::{Recommendation, UplinkKind};

use crate::uplink::Uplink;

/// Scorer cadence.
pub const RISK_INTERVAL_MS: u64 = 250;

/// Recommendation thresholds.
pub const PROTECT_THRESHOLD: f64 = 0.7;
pub const PREPARE_THRESHOLD: f64 = 0.4;

/// LTE signal power below which the cellular penalty applies.
const LTE_WEAK_SIGNAL_DBM: f64 = -110.0;

/// Current risk for one uplink, in [0, 1].
pub fn score(uplink: &Uplink) -> f64 {
    let mut risk = 0.0;

    if uplink.rtt_baseline_ms > 0.0 && uplink.rtt_current_ms > 1.5 * uplink.rtt_baseline_ms {
        risk += 0.3;
    }

    let loss = uplink.loss_fraction;
    if loss > 0.50 {
        risk += 0.5;
    } else if loss > 0.20 {
        risk += 0.4;
    } else if loss > 0.05 {
        risk += 0.3;
    }

    risk += 0.2 * uplink.consecutive_failures.min(5) as f64;

    match uplink.kind() {
        UplinkKind::Sat => {
            if let Some(sat) = &uplink.sat {
                risk += 0.01 * (sat.obstruction_fraction * 100.0);
            }
        }
        UplinkKind::Lte => {
            if let Some(lte) = &uplink.lte {
                if lte.signal_dbm < LTE_WEAK_SIGNAL_DBM {
                    risk += 0.4;
                }
            }
        }
        UplinkKind::Fiber => {}
    }

    risk.clamp(0.0, 1.0)
}

/// Map the active uplink's risk to the published recommendation.
pub fn recommendation(global_risk: f64) -> Recommendation {
    if global_risk >= PROTECT_THRESHOLD {
        Recommendation::Protect
    } else if global_risk >= PREPARE_THRESHOLD {
        Recommendation::Prepare
    } else {
        Recommendation::Normal
    }
}
