//! Slow-path uplink selection.
//!
//! The arbiter scores every selectable uplink and picks the best target for
//! the route actuator. Scoring favors low RTT and low risk, penalizes loss
//! hard, and gives kind-specific bonuses to a healthy dish and a strong
//! cellular signal. Ties break toward the lowest uplink index so repeated
//! evaluations are stable.

use pathsteer_common::status::UplinkKind;

use crate::tripwire::OBSTRUCTION_ETA_S;
use crate::uplink::Uplink;

/// LTE signal power above which the cellular bonus applies.
const LTE_STRONG_SIGNAL_DBM: f64 = -90.0;

/// Selection score for one uplink. Higher is better.
pub fn score(uplink: &Uplink) -> f64 {
    let loss_percent = uplink.loss_fraction * 100.0;
    let mut s = 100.0 - uplink.rtt_current_ms - 50.0 * uplink.risk_now - 10.0 * loss_percent;

    match uplink.kind() {
        UplinkKind::Sat => {
            if let Some(sat) = &uplink.sat {
                // A dish about to be obstructed is not a healthy dish.
                let imminent = sat
                    .obstruction_eta_s
                    .is_some_and(|eta| eta < OBSTRUCTION_ETA_S);
                if sat.online && !sat.obstructed && !imminent {
                    s += 20.0;
                }
            }
        }
        UplinkKind::Lte => {
            if let Some(lte) = &uplink.lte {
                if lte.signal_dbm > LTE_STRONG_SIGNAL_DBM {
                    s += 15.0;
                }
            }
        }
        UplinkKind::Fiber => {}
    }

    s
}

/// Index of the best selectable uplink, or `None` if nothing is selectable.
pub fn select_target(uplinks: &[Uplink]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, u) in uplinks.iter().enumerate() {
        if !u.selectable() {
            continue;
        }
        let s = score(u);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((idx, s)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Best selectable uplink other than `exclude` — the mirror destination.
pub fn select_backup(uplinks: &[Uplink], exclude: usize) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, u) in uplinks.iter().enumerate() {
        if idx == exclude || !u.selectable() {
            continue;
        }
        let s = score(u);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((idx, s)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UplinkConfig;
    use pathsteer_common::status::{LteStatus, SatStatus};

    fn uplink(name: &str, kind: UplinkKind, rtt: f64) -> Uplink {
        let mut u = Uplink::new(UplinkConfig {
            name: name.to_string(),
            kind,
            enabled: true,
            interface: "eth0".to_string(),
            namespace: None,
            veth: None,
            service_veth: format!("{name}-svc"),
            service_gateway: None,
            identifier: None,
        });
        u.rtt_current_ms = rtt;
        u.rtt_baseline_ms = rtt;
        u
    }

    #[test]
    fn lower_rtt_wins() {
        let uplinks = vec![
            uplink("cell_a", UplinkKind::Fiber, 80.0),
            uplink("fa", UplinkKind::Fiber, 20.0),
        ];
        assert_eq!(select_target(&uplinks), Some(1));
    }

    #[test]
    fn risk_outweighs_small_rtt_edge() {
        let mut fast_but_risky = uplink("a", UplinkKind::Fiber, 20.0);
        fast_but_risky.risk_now = 0.8; // -40
        let steady = uplink("b", UplinkKind::Fiber, 45.0);
        assert_eq!(select_target(&[fast_but_risky, steady]), Some(1));
    }

    #[test]
    fn loss_is_penalized_hard() {
        let mut lossy = uplink("a", UplinkKind::Fiber, 20.0);
        lossy.loss_fraction = 0.10; // -100
        let clean = uplink("b", UplinkKind::Fiber, 90.0);
        assert_eq!(select_target(&[lossy, clean]), Some(1));
    }

    #[test]
    fn healthy_dish_gets_bonus() {
        let mut sat = uplink("sl_a", UplinkKind::Sat, 45.0);
        sat.sat = Some(SatStatus {
            online: true,
            obstructed: false,
            obstruction_fraction: 0.0,
            dish_latency_ms: 42.0,
            obstruction_eta_s: None,
        });
        let fiber = uplink("fa", UplinkKind::Fiber, 40.0);
        // 100-45+20 = 75 beats 100-40 = 60
        assert_eq!(select_target(&[fiber, sat]), Some(1));
    }

    #[test]
    fn obstructed_dish_loses_bonus() {
        let mut sat = uplink("sl_a", UplinkKind::Sat, 45.0);
        sat.sat = Some(SatStatus {
            online: true,
            obstructed: true,
            obstruction_fraction: 0.3,
            dish_latency_ms: 42.0,
            obstruction_eta_s: None,
        });
        let fiber = uplink("fa", UplinkKind::Fiber, 40.0);
        assert_eq!(select_target(&[fiber, sat]), Some(0));
    }

    #[test]
    fn imminent_obstruction_loses_bonus() {
        let mut sat = uplink("sl_a", UplinkKind::Sat, 45.0);
        sat.sat = Some(SatStatus {
            online: true,
            obstructed: false,
            obstruction_fraction: 0.0,
            dish_latency_ms: 42.0,
            obstruction_eta_s: Some(3.0),
        });
        let fiber = uplink("fa", UplinkKind::Fiber, 40.0);
        assert_eq!(select_target(&[fiber, sat]), Some(0));
    }

    #[test]
    fn strong_lte_gets_bonus() {
        let mut lte = uplink("cell_a", UplinkKind::Lte, 50.0);
        lte.lte = Some(LteStatus {
            signal_dbm: -80.0,
            snr_db: 15.0,
            carrier: None,
            cell_id: None,
        });
        let fiber = uplink("fa", UplinkKind::Fiber, 55.0);
        // 100-50+15 = 65 beats 100-55 = 45
        assert_eq!(select_target(&[fiber, lte]), Some(1));
    }

    #[test]
    fn ties_break_to_lowest_index() {
        let uplinks = vec![
            uplink("a", UplinkKind::Fiber, 30.0),
            uplink("b", UplinkKind::Fiber, 30.0),
        ];
        assert_eq!(select_target(&uplinks), Some(0));
    }

    #[test]
    fn unreachable_and_disabled_excluded() {
        let mut down = uplink("a", UplinkKind::Fiber, 10.0);
        down.reachable = false;
        let mut off = uplink("b", UplinkKind::Fiber, 15.0);
        off.enabled = false;
        let ok = uplink("c", UplinkKind::Fiber, 90.0);
        assert_eq!(select_target(&[down, off, ok]), Some(2));
    }

    #[test]
    fn nothing_selectable_returns_none() {
        let mut down = uplink("a", UplinkKind::Fiber, 10.0);
        down.reachable = false;
        assert_eq!(select_target(&[down]), None);
    }

    #[test]
    fn backup_excludes_active() {
        let uplinks = vec![
            uplink("a", UplinkKind::Fiber, 10.0),
            uplink("b", UplinkKind::Fiber, 20.0),
            uplink("c", UplinkKind::Fiber, 30.0),
        ];
        assert_eq!(select_backup(&uplinks, 0), Some(1));
        assert_eq!(select_backup(&uplinks, 1), Some(0));
    }

    #[test]
    fn backup_none_with_single_uplink() {
        let uplinks = vec![uplink("a", UplinkKind::Fiber, 10.0)];
        assert_eq!(select_backup(&uplinks, 0), None);
    }
}
