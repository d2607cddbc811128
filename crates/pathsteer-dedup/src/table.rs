//! The dedup flow table.
//!
//! A fixed-size open-addressed map keyed by fingerprint modulo capacity.
//! One slot per bucket, no probing: under collision pressure the table
//! degrades by occasionally letting a duplicate through, never by dropping
//! a first arrival or corrupting a lookup.
//!
//! Collision policy per slot:
//! - empty or expired incumbent → overwrite, admit the packet
//! - live incumbent with the same fingerprint → duplicate: drop the packet
//!   and clear the entry (the pair is complete — the edge emits exactly two
//!   copies, so the next identical fingerprint is a new first arrival)
//! - live incumbent with a different fingerprint → admit without inserting

use std::time::Duration;

/// Default table size.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// Gate decision for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Duplicate,
}

#[derive(Clone, Copy)]
struct Slot {
    fingerprint: u64,
    /// 0 means empty; callers never pass a zero timestamp.
    seen_at_ms: u64,
}

const EMPTY: Slot = Slot {
    fingerprint: 0,
    seen_at_ms: 0,
};

pub struct FlowTable {
    slots: Vec<Slot>,
    ttl_ms: u64,
    active_flows: usize,
}

impl FlowTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        FlowTable {
            slots: vec![EMPTY; capacity.max(1)],
            ttl_ms: ttl.as_millis().max(1) as u64,
            active_flows: 0,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Gate one packet. `now_ms` must be monotonic and non-zero.
    pub fn admit(&mut self, fingerprint: u64, now_ms: u64) -> Verdict {
        let idx = (fingerprint % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[idx];

        let expired = slot.seen_at_ms == 0 || now_ms.saturating_sub(slot.seen_at_ms) >= self.ttl_ms;
        if expired {
            *slot = Slot {
                fingerprint,
                seen_at_ms: now_ms,
            };
            return Verdict::Forward;
        }

        if slot.fingerprint == fingerprint {
            // Duplicate inside the TTL: drop it and retire the entry.
            *slot = EMPTY;
            return Verdict::Duplicate;
        }

        // Live collision with a different flow: admit, keep the incumbent.
        Verdict::Forward
    }

    /// Expire stale entries and refresh the active-flow count.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let mut active = 0;
        for slot in &mut self.slots {
            if slot.seen_at_ms == 0 {
                continue;
            }
            if now_ms.saturating_sub(slot.seen_at_ms) >= self.ttl_ms {
                *slot = EMPTY;
            } else {
                active += 1;
            }
        }
        self.active_flows = active;
        active
    }

    /// Flow count as of the last sweep.
    pub fn active_flows(&self) -> usize {
        self.active_flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FlowTable {
        FlowTable::new(1024, Duration::from_secs(5))
    }

    #[test]
    fn first_arrival_forwards_second_drops() {
        let mut t = table();
        assert_eq!(t.admit(42, 1_000), Verdict::Forward);
        assert_eq!(t.admit(42, 1_050), Verdict::Duplicate);
        // The pair is complete; the same fingerprint later is a new packet.
        assert_eq!(t.admit(42, 1_100), Verdict::Forward);
    }

    #[test]
    fn distinct_fingerprints_both_forward() {
        let mut t = table();
        assert_eq!(t.admit(1, 1_000), Verdict::Forward);
        assert_eq!(t.admit(2, 1_000), Verdict::Forward);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let mut t = table();
        assert_eq!(t.admit(42, 1_000), Verdict::Forward);
        // The second copy never arrived; past the TTL the fingerprint is
        // admitted again rather than misclassified as a duplicate.
        assert_eq!(t.admit(42, 6_000), Verdict::Forward);
    }

    #[test]
    fn duplicate_just_inside_ttl_still_drops() {
        let mut t = table();
        assert_eq!(t.admit(42, 1_000), Verdict::Forward);
        assert_eq!(t.admit(42, 5_999), Verdict::Duplicate);
    }

    #[test]
    fn live_collision_admits_without_eviction() {
        let mut t = FlowTable::new(8, Duration::from_secs(5));
        // 3 and 11 collide in an 8-slot table
        assert_eq!(t.admit(3, 1_000), Verdict::Forward);
        assert_eq!(t.admit(11, 1_100), Verdict::Forward, "collision admits");
        // The incumbent is still live and still deduplicates its own copy
        assert_eq!(t.admit(3, 1_200), Verdict::Duplicate);
        // The collider's copy slips through (degraded, never corrupted)
        assert_eq!(t.admit(11, 1_300), Verdict::Forward);
    }

    #[test]
    fn expired_incumbent_is_overwritten_by_collider() {
        let mut t = FlowTable::new(8, Duration::from_secs(5));
        assert_eq!(t.admit(3, 1_000), Verdict::Forward);
        assert_eq!(t.admit(11, 7_000), Verdict::Forward);
        // 11 now owns the slot
        assert_eq!(t.admit(11, 7_100), Verdict::Duplicate);
        assert_eq!(t.admit(3, 7_200), Verdict::Forward);
    }

    #[test]
    fn sweep_counts_and_expires() {
        let mut t = table();
        t.admit(1, 1_000);
        t.admit(2, 2_000);
        t.admit(3, 3_000);
        assert_eq!(t.sweep(3_500), 3);
        assert_eq!(t.active_flows(), 3);

        // 1 and 2 age out
        assert_eq!(t.sweep(7_500), 1);
        assert_eq!(t.active_flows(), 1);

        // A swept entry forwards again
        assert_eq!(t.admit(1, 7_600), Verdict::Forward);
    }

    /// 10 000 packets sharing a fingerprint, each duplicated over two
    /// tunnels and interleaved within 100ms: exactly one of each pair is
    /// forwarded, and the live flow count stays at most 1.
    #[test]
    fn interleaved_duplicate_streams_converge_to_one_flow() {
        let mut t = table();
        let mut forwarded = 0u32;
        let mut dropped = 0u32;
        for i in 0..20_000u64 {
            match t.admit(777, 1_000 + i / 200) {
                Verdict::Forward => forwarded += 1,
                Verdict::Duplicate => dropped += 1,
            }
        }
        assert_eq!(forwarded, 10_000);
        assert_eq!(dropped, 10_000);
        assert!(t.sweep(1_100) <= 1, "active flows tend to at most 1");
    }
}
