//! Per-uplink rolling statistics.
//!
//! Feeds on raw probe results and maintains the smoothed view the tripwire
//! and risk scorer read: current RTT, slow EMA baseline, loss fraction over
//! a short window, and the consecutive-failure counter that drives
//! reachability.

use crate::uplink::{ProbeRecord, Uplink};

/// Baseline EMA smoothing factor. Slow on purpose: the baseline should
/// reflect minutes of behavior, not the last burst.
pub const BASELINE_ALPHA: f64 = 0.05;

/// Jitter EWMA smoothing factor.
const JITTER_ALPHA: f64 = 0.2;

/// Probes considered for the loss fraction.
pub const LOSS_WINDOW: usize = 20;

/// Consecutive failures after which an uplink is declared unreachable.
pub const UNREACHABLE_AFTER: u32 = 5;

/// Reachability transition produced by a probe, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityChange {
    WentUnreachable,
    Recovered,
}

/// Fold one probe result into the uplink's stats.
///
/// Returns the reachability transition this probe caused, if any. A success
/// clears `consecutive_failures` and restores reachability unless the
/// operator has force-failed the uplink (the sticky flag wins).
pub fn record_probe(
    uplink: &mut Uplink,
    success: bool,
    rtt_ms: f64,
    at_ms: u64,
) -> Option<ReachabilityChange> {
    uplink.history.push(ProbeRecord {
        rtt_ms,
        success,
        at_ms,
    });
    uplink.last_probe_at_ms = Some(at_ms);

    let mut change = None;

    if success {
        let prev_rtt = uplink.rtt_current_ms;
        uplink.rtt_current_ms = rtt_ms;

        if uplink.rtt_baseline_ms == 0.0 {
            uplink.rtt_baseline_ms = rtt_ms;
        } else {
            uplink.rtt_baseline_ms =
                (1.0 - BASELINE_ALPHA) * uplink.rtt_baseline_ms + BASELINE_ALPHA * rtt_ms;
        }

        if prev_rtt > 0.0 {
            let instant_jitter = (rtt_ms - prev_rtt).abs();
            uplink.jitter_ms =
                (1.0 - JITTER_ALPHA) * uplink.jitter_ms + JITTER_ALPHA * instant_jitter;
        }

        uplink.consecutive_failures = 0;
        if !uplink.reachable && !uplink.operator_failed {
            uplink.reachable = true;
            change = Some(ReachabilityChange::Recovered);
        }
    } else {
        uplink.consecutive_failures = uplink.consecutive_failures.saturating_add(1);
        if uplink.consecutive_failures > UNREACHABLE_AFTER && uplink.reachable {
            uplink.reachable = false;
            change = Some(ReachabilityChange::WentUnreachable);
        }
    }

    uplink.loss_fraction = uplink.history.loss_fraction(LOSS_WINDOW);
    change
}
