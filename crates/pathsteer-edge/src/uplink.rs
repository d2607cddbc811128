//! Live uplink state and the probe history ring.
//!
//! The probe pool is the only writer of per-uplink metrics; the arbiter is
//! the only writer of `active`. Command ingress may set the sticky
//! `operator_failed` flag. Everything else reads.

use pathsteer_common::status::{LteStatus, SatStatus, UplinkKind, UplinkStatus};

use crate::config::UplinkConfig;

/// One probe result in the history ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeRecord {
    pub rtt_ms: f64,
    pub success: bool,
    pub at_ms: u64,
}

/// Fixed-capacity ring of recent probe results, modulo-indexed.
///
/// The ring is created empty at process start and never reused across
/// restarts; within its window it is append-only.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    slots: Vec<Option<ProbeRecord>>,
    head: usize,
    len: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        HistoryRing {
            slots: vec![None; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, record: ProbeRecord) {
        self.slots[self.head] = Some(record);
        self.head = (self.head + 1) % self.slots.len();
        self.len = (self.len + 1).min(self.slots.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate records newest-first.
    pub fn iter_recent(&self) -> impl Iterator<Item = &ProbeRecord> {
        let cap = self.slots.len();
        (1..=self.len).filter_map(move |back| {
            let idx = (self.head + cap - back) % cap;
            self.slots[idx].as_ref()
        })
    }

    /// RTTs of the `n` most recent successful probes, newest-first.
    pub fn recent_success_rtts(&self, n: usize) -> Vec<f64> {
        self.iter_recent()
            .filter(|r| r.success)
            .take(n)
            .map(|r| r.rtt_ms)
            .collect()
    }

    /// Failure fraction over the last `n` records (0.0 when empty).
    pub fn loss_fraction(&self, n: usize) -> f64 {
        let mut total = 0usize;
        let mut failed = 0usize;
        for r in self.iter_recent().take(n) {
            total += 1;
            if !r.success {
                failed += 1;
            }
        }
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }
}

/// Live state for one uplink.
#[derive(Debug, Clone)]
pub struct Uplink {
    pub cfg: UplinkConfig,
    pub enabled: bool,
    pub reachable: bool,
    /// Sticky operator force-fail. Implies `!reachable`.
    pub operator_failed: bool,
    pub active: bool,
    pub rtt_current_ms: f64,
    pub rtt_baseline_ms: f64,
    pub jitter_ms: f64,
    pub loss_fraction: f64,
    pub consecutive_failures: u32,
    pub risk_now: f64,
    pub lte: Option<LteStatus>,
    pub sat: Option<SatStatus>,
    pub last_probe_at_ms: Option<u64>,
    pub history: HistoryRing,
}

/// History window: 20 s of probes at the default 10 Hz.
pub const HISTORY_CAPACITY: usize = 200;

impl Uplink {
    pub fn new(cfg: UplinkConfig) -> Self {
        let enabled = cfg.enabled;
        Uplink {
            cfg,
            enabled,
            reachable: true,
            operator_failed: false,
            active: false,
            rtt_current_ms: 0.0,
            rtt_baseline_ms: 0.0,
            jitter_ms: 0.0,
            loss_fraction: 0.0,
            consecutive_failures: 0,
            risk_now: 0.0,
            lte: None,
            sat: None,
            last_probe_at_ms: None,
            history: HistoryRing::new(HISTORY_CAPACITY),
        }
    }

    pub fn kind(&self) -> UplinkKind {
        self.cfg.kind
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Eligible for arbitration: enabled, reachable, not force-failed.
    pub fn selectable(&self) -> bool {
        self.enabled && self.reachable && !self.operator_failed
    }

    /// Slice of the published snapshot for this uplink.
    pub fn status(&self) -> UplinkStatus {
        UplinkStatus {
            name: self.cfg.name.clone(),
            kind: self.cfg.kind,
            enabled: self.enabled,
            reachable: self.reachable,
            active: self.active,
            operator_failed: self.operator_failed,
            rtt_ms: self.rtt_current_ms,
            baseline_ms: self.rtt_baseline_ms,
            jitter_ms: self.jitter_ms,
            loss_fraction: self.loss_fraction,
            risk: self.risk_now,
            consec_fail: self.consecutive_failures,
            last_probe_at_ms: self.last_probe_at_ms,
            lte: self.lte.clone(),
            sat: self.sat.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber_cfg(name: &str) -> UplinkConfig {
        UplinkConfig {
            name: name.to_string(),
            kind: UplinkKind::Fiber,
            enabled: true,
            interface: "eth0".to_string(),
            namespace: None,
            veth: None,
            service_veth: format!("{name}-svc"),
            service_gateway: None,
            identifier: None,
        }
    }

    fn rec(rtt: f64, success: bool, at: u64) -> ProbeRecord {
        ProbeRecord {
            rtt_ms: rtt,
            success,
            at_ms: at,
        }
    }

    #[test]
    fn ring_starts_empty() {
        let ring = HistoryRing::new(8);
        assert!(ring.is_empty());
        assert_eq!(ring.recent_success_rtts(3), Vec::<f64>::new());
        assert_eq!(ring.loss_fraction(20), 0.0);
    }

    #[test]
    fn ring_iterates_newest_first() {
        let mut ring = HistoryRing::new(4);
        for i in 0..3 {
            ring.push(rec(10.0 + i as f64, true, i));
        }
        let rtts: Vec<f64> = ring.iter_recent().map(|r| r.rtt_ms).collect();
        assert_eq!(rtts, vec![12.0, 11.0, 10.0]);
    }

    #[test]
    fn ring_wraps_at_capacity() {
        let mut ring = HistoryRing::new(4);
        for i in 0..10 {
            ring.push(rec(i as f64, true, i));
        }
        assert_eq!(ring.len(), 4);
        let rtts: Vec<f64> = ring.iter_recent().map(|r| r.rtt_ms).collect();
        assert_eq!(rtts, vec![9.0, 8.0, 7.0, 6.0]);
    }

    #[test]
    fn recent_success_rtts_skips_failures() {
        let mut ring = HistoryRing::new(8);
        ring.push(rec(10.0, true, 0));
        ring.push(rec(0.0, false, 1));
        ring.push(rec(12.0, true, 2));
        ring.push(rec(0.0, false, 3));
        assert_eq!(ring.recent_success_rtts(3), vec![12.0, 10.0]);
    }

    #[test]
    fn loss_fraction_over_window() {
        let mut ring = HistoryRing::new(32);
        for i in 0..20 {
            ring.push(rec(10.0, i % 5 != 0, i));
        }
        // 4 failures in 20 (i = 0, 5, 10, 15)
        assert!((ring.loss_fraction(20) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn new_uplink_defaults() {
        let u = Uplink::new(fiber_cfg("fa"));
        assert!(u.enabled);
        assert!(u.reachable);
        assert!(!u.active);
        assert!(!u.operator_failed);
        assert!(u.selectable());
        assert!(u.history.is_empty());
    }

    #[test]
    fn selectable_requires_all_three() {
        let mut u = Uplink::new(fiber_cfg("fa"));
        u.enabled = false;
        assert!(!u.selectable());
        u.enabled = true;
        u.reachable = false;
        assert!(!u.selectable());
        u.reachable = true;
        u.operator_failed = true;
        assert!(!u.selectable());
    }

    #[test]
    fn status_reflects_fields() {
        let mut u = Uplink::new(fiber_cfg("fa"));
        u.rtt_current_ms = 21.0;
        u.rtt_baseline_ms = 20.0;
        u.active = true;
        let s = u.status();
        assert_eq!(s.name, "fa");
        assert!(s.active);
        assert_eq!(s.rtt_ms, 21.0);
        assert!(s.lte.is_none());
        assert!(s.sat.is_none());
    }
}
