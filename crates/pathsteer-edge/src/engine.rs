//! The steering engine main loop.
//!
//! Single-threaded owner of all steering state. Probe workers feed a
//! bounded channel; the loop drains it, then runs the fixed pipeline:
//! command ingress, risk scoring, tripwire / state machine (which enables
//! duplication before the arbiter ever contemplates a route swap), and
//! status publication — each sub-task on its own cadence.
//!
//! All decision logic takes explicit `now_ms` timestamps so tests drive
//! the machine with simulated time; `run()` is a thin wall-clock shell
//! around [`SteeringEngine::tick`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use pathsteer_common::command::Command;
use pathsteer_common::events::EventLog;
use pathsteer_common::status::{
    CmdResult, CommandAck, GpsFix, Mode, StatusSnapshot, SteerState,
};
use serde_json::json;
use tracing::{info, warn};

use crate::aggregator::{self, ReachabilityChange};
use crate::arbiter;
use crate::command::CommandIngress;
use crate::config::EngineConfig;
use crate::gps::{GPS_INTERVAL_MS, GpsReader};
use crate::net::mirror::MirrorControl;
use crate::net::route::RouteControl;
use crate::probe::{ProbeEvent, unix_millis};
use crate::risk::{self, RISK_INTERVAL_MS};
use crate::state::{self, EngineStatus};
use crate::status::{PUBLISH_INTERVAL_MS, StatusPublisher};
use crate::tripwire::{self, Trip};
use crate::uplink::Uplink;

/// Everything the engine needs besides config: actuators, the event log,
/// the publisher, and the operator surfaces.
pub struct EngineDeps {
    pub mirror: Box<dyn MirrorControl>,
    pub route: Box<dyn RouteControl>,
    pub events: Arc<EventLog>,
    pub publisher: StatusPublisher,
    pub ingress: CommandIngress,
    pub gps: Option<GpsReader>,
}

pub struct SteeringEngine {
    cfg: EngineConfig,
    run_id: String,
    uplinks: Vec<Uplink>,
    status: EngineStatus,
    mirror: Box<dyn MirrorControl>,
    route: Box<dyn RouteControl>,
    events: Arc<EventLog>,
    publisher: StatusPublisher,
    ingress: CommandIngress,
    gps_reader: Option<GpsReader>,
    gps_fix: Option<GpsFix>,
    last_risk_at_ms: u64,
    last_publish_at_ms: u64,
    last_gps_at_ms: u64,
}

impl SteeringEngine {
    pub fn new(cfg: EngineConfig, run_id: String, deps: EngineDeps) -> Self {
        let uplinks: Vec<Uplink> = cfg.uplinks.iter().cloned().map(Uplink::new).collect();
        let mut engine = SteeringEngine {
            cfg,
            run_id,
            uplinks,
            status: EngineStatus::default(),
            mirror: deps.mirror,
            route: deps.route,
            events: deps.events,
            publisher: deps.publisher,
            ingress: deps.ingress,
            gps_reader: deps.gps,
            gps_fix: None,
            last_risk_at_ms: 0,
            last_publish_at_ms: 0,
            last_gps_at_ms: 0,
        };

        // Pick the boot-time active uplink and install its route. The
        // selection falls back to index 0 so a snapshot always shows
        // exactly one active uplink.
        let initial = arbiter::select_target(&engine.uplinks).unwrap_or(0);
        engine.uplinks[initial].active = true;
        engine.status.active = Some(initial);
        if let Err(e) = engine.route.swap_to(&engine.uplinks[initial].cfg) {
            warn!(uplink = %engine.uplinks[initial].name(), error = %e, "boot route install failed");
        }
        engine.events.emit(
            "startup",
            json!({"active": engine.uplinks[initial].name(), "uplinks": engine.uplinks.len()}),
        );
        engine
    }

    // ─── Accessors (tests, diagnostics) ─────────────────────────────

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn uplinks(&self) -> &[Uplink] {
        &self.uplinks
    }

    pub fn active_name(&self) -> Option<&str> {
        self.status.active.map(|i| self.uplinks[i].name())
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    // ─── Event intake ───────────────────────────────────────────────

    pub fn handle_event(&mut self, event: ProbeEvent) {
        match event {
            ProbeEvent::Sample {
                uplink,
                success,
                rtt_ms,
                at_ms,
            } => {
                let Some(u) = self.uplinks.get_mut(uplink) else {
                    return;
                };
                match aggregator::record_probe(u, success, rtt_ms, at_ms) {
                    Some(ReachabilityChange::WentUnreachable) => {
                        let name = u.name().to_string();
                        warn!(uplink = %name, "uplink unreachable");
                        self.events.emit("uplink_down", json!({"uplink": name}));
                    }
                    Some(ReachabilityChange::Recovered) => {
                        let name = u.name().to_string();
                        info!(uplink = %name, "uplink recovered");
                        self.events.emit("uplink_up", json!({"uplink": name}));
                    }
                    None => {}
                }
            }
            ProbeEvent::Lte { uplink, status } => {
                if let Some(u) = self.uplinks.get_mut(uplink) {
                    u.lte = Some(status);
                }
            }
            ProbeEvent::Sat { uplink, status } => {
                if let Some(u) = self.uplinks.get_mut(uplink) {
                    u.sat = Some(status);
                }
            }
        }
    }

    // ─── Main loop ──────────────────────────────────────────────────

    /// Blocking loop at ~100 Hz wakeups until the run flag clears.
    pub fn run(&mut self, rx: Receiver<ProbeEvent>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            match rx.recv_timeout(Duration::from_millis(10)) {
                Ok(event) => {
                    self.handle_event(event);
                    while let Ok(event) = rx.try_recv() {
                        self.handle_event(event);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
            self.tick(unix_millis());
        }
        self.shutdown();
    }

    /// One pipeline pass at `now_ms`. Probe events must already be applied.
    pub fn tick(&mut self, now_ms: u64) {
        self.process_commands(now_ms);

        if now_ms.saturating_sub(self.last_risk_at_ms) >= RISK_INTERVAL_MS {
            self.update_risk();
            self.last_risk_at_ms = now_ms;
        }

        self.step(now_ms);

        if now_ms.saturating_sub(self.last_publish_at_ms) >= PUBLISH_INTERVAL_MS {
            self.publish(now_ms);
            self.last_publish_at_ms = now_ms;
        }

        if self.cfg.gps_enabled
            && now_ms.saturating_sub(self.last_gps_at_ms) >= GPS_INTERVAL_MS
        {
            if let Some(reader) = &self.gps_reader {
                if let Some(fix) = reader.read() {
                    self.gps_fix = Some(fix);
                }
            }
            self.last_gps_at_ms = now_ms;
        }
    }

    /// Clean shutdown: tear down duplication, publish a last snapshot,
    /// close the log.
    pub fn shutdown(&mut self) {
        if self.status.duplication_enabled {
            if let Err(e) = self.mirror.disable() {
                warn!(error = %e, "duplication teardown failed at shutdown");
            }
            self.status.duplication_enabled = false;
        }
        self.publish(unix_millis());
        self.events.emit("shutdown", json!({}));
        self.events.close();
        info!("engine stopped");
    }

    // ─── State machine ──────────────────────────────────────────────

    fn step(&mut self, now_ms: u64) {
        match self.status.state {
            SteerState::Normal | SteerState::Prepare => self.tripwire_check(now_ms),
            SteerState::Protect => {
                if self
                    .status
                    .preroll_complete(now_ms, self.cfg.preroll_ms, self.cfg.dup_settle_ms)
                {
                    self.status.state = SteerState::Switching;
                }
            }
            SteerState::Switching => {
                self.run_arbiter();
                self.status.state = SteerState::Holding;
            }
            SteerState::Holding => self.protection_tick(now_ms),
        }
    }

    fn tripwire_check(&mut self, now_ms: u64) {
        let Some(active_idx) = self.status.active else {
            return;
        };
        let manual = std::mem::take(&mut self.status.manual_trigger_pending);
        let Some(trip) = tripwire::evaluate(&self.cfg, &self.uplinks[active_idx], manual) else {
            return;
        };

        self.events.emit(
            "trigger",
            json!({
                "reason": trip.reason.as_str(),
                "detail": trip.detail,
                "uplink": self.uplinks[active_idx].name(),
            }),
        );

        if self.status.mode == Mode::Training {
            // Telemetry only: record the trigger, never actuate.
            self.status.last_trigger = Some(trip.reason);
            self.status.trigger_detail = Some(trip.detail);
            return;
        }

        self.enter_protection(trip, now_ms, active_idx);
    }

    fn enter_protection(&mut self, trip: Trip, now_ms: u64, active_idx: usize) {
        info!(reason = trip.reason.as_str(), detail = %trip.detail, "tripwire fired");
        self.status.enter_protection(trip.reason, trip.detail, now_ms);

        if self.status.duplication_enabled {
            // Mirror mode left it installed; the settle is long since met.
            return;
        }

        let Some(backup_idx) = arbiter::select_backup(&self.uplinks, active_idx) else {
            warn!("no backup uplink available; protection proceeds unmirrored");
            return;
        };
        self.enable_duplication(active_idx, backup_idx, now_ms);
    }

    fn enable_duplication(&mut self, active_idx: usize, backup_idx: usize, now_ms: u64) {
        let active_cfg = self.uplinks[active_idx].cfg.clone();
        let backup_cfg = self.uplinks[backup_idx].cfg.clone();
        match self.mirror.enable(&active_cfg, &backup_cfg) {
            Ok(()) => {
                self.status.duplication_enabled = true;
                self.status.duplication_engaged_at_ms = Some(now_ms);
                self.events.emit(
                    "dup_enable",
                    json!({"active": active_cfg.name, "backup": backup_cfg.name}),
                );
            }
            Err(e) => {
                // Not fatal: the arbiter may still switch, just unmirrored.
                warn!(error = %e, "duplication install failed");
                self.events.emit(
                    "dup_fail",
                    json!({"active": active_cfg.name, "backup": backup_cfg.name, "error": e.to_string()}),
                );
            }
        }
    }

    fn disable_duplication(&mut self) {
        if let Err(e) = self.mirror.disable() {
            warn!(error = %e, "duplication teardown failed");
        }
        self.status.duplication_enabled = false;
        self.status.duplication_engaged_at_ms = None;
        self.events.emit("dup_disable", json!({}));
    }

    /// Evaluate the arbiter and, if it picks a different uplink, perform a
    /// verified route swap. Runs in SWITCHING and on every HOLDING tick
    /// (which is what retries failed swaps and caps flapping).
    fn run_arbiter(&mut self) {
        let Some(active_idx) = self.status.active else {
            return;
        };
        if self.status.operator_force_locked {
            return;
        }
        if self.status.switches_in_window >= self.cfg.max_switches_per_window {
            if !self.status.flap_suppressed {
                self.status.flap_suppressed = true;
                warn!("flap suppression engaged; no more swaps this window");
                self.events.emit("flap_suppressed", json!({}));
            }
            return;
        }
        let Some(target_idx) = arbiter::select_target(&self.uplinks) else {
            return;
        };
        if target_idx == active_idx {
            return;
        }
        self.swap_active(active_idx, target_idx);
    }

    /// Verified route swap; `active_uplink` changes only on verified success.
    fn swap_active(&mut self, from_idx: usize, to_idx: usize) -> bool {
        let target_cfg = self.uplinks[to_idx].cfg.clone();
        match self.route.swap_to(&target_cfg) {
            Ok(()) => {
                self.uplinks[from_idx].active = false;
                self.uplinks[to_idx].active = true;
                self.status.active = Some(to_idx);
                self.status.switches_in_window += 1;
                self.route.notify_return_route(&target_cfg.name);
                info!(
                    from = %self.uplinks[from_idx].name(),
                    to = %target_cfg.name,
                    swaps = self.status.switches_in_window,
                    "route swapped"
                );
                self.events.emit(
                    "switch",
                    json!({
                        "from": self.uplinks[from_idx].name(),
                        "to": target_cfg.name,
                        "swaps_in_window": self.status.switches_in_window,
                    }),
                );
                true
            }
            Err(e) => {
                warn!(to = %target_cfg.name, error = %e, "route swap failed verification");
                self.events.emit(
                    "switch_fail",
                    json!({"to": target_cfg.name, "error": e.to_string()}),
                );
                false
            }
        }
    }

    fn protection_tick(&mut self, now_ms: u64) {
        self.run_arbiter();

        let Some(active_idx) = self.status.active else {
            return;
        };
        let clean = state::is_clean(&self.uplinks[active_idx]);
        self.status.track_clean(clean, now_ms);

        if self
            .status
            .may_exit_protection(now_ms, self.cfg.min_hold_ms, self.cfg.clean_exit_ms)
        {
            self.status.exit_protection();
            if self.status.duplication_enabled && self.status.mode != Mode::Mirror {
                self.disable_duplication();
            }
            info!(active = %self.uplinks[active_idx].name(), "protection window closed");
            self.events.emit(
                "protect_exit",
                json!({"active": self.uplinks[active_idx].name()}),
            );
        }
    }

    // ─── Risk ───────────────────────────────────────────────────────

    fn update_risk(&mut self) {
        for u in &mut self.uplinks {
            if u.enabled {
                u.risk_now = risk::score(u);
            }
        }
        let global = self
            .status
            .active
            .map(|i| self.uplinks[i].risk_now)
            .unwrap_or(0.0);
        self.status.global_risk = global;
        self.status.recommendation = risk::recommendation(global);
    }

    // ─── Command ingress ────────────────────────────────────────────

    fn process_commands(&mut self, now_ms: u64) {
        for item in self.ingress.drain() {
            let (result, detail) = match item.parsed {
                Ok(cmd) => match self.execute(cmd, now_ms) {
                    Ok(detail) => (CmdResult::Exec, detail),
                    Err(detail) => (CmdResult::Fail, detail),
                },
                Err(e) => (CmdResult::Fail, e.to_string()),
            };
            info!(cmd = %item.id, result = ?result, %detail, "command processed");
            self.events.emit(
                "cmd",
                json!({"id": item.id, "result": matches!(result, CmdResult::Exec), "detail": detail}),
            );
            self.status.last_cmd = Some(CommandAck {
                last_cmd_id: item.id,
                result,
                detail,
            });
        }
    }

    fn execute(&mut self, cmd: Command, now_ms: u64) -> Result<String, String> {
        let detail = cmd.ack_detail();
        match cmd {
            Command::SetMode(mode) => {
                let previous = self.status.mode;
                self.status.mode = mode;
                match mode {
                    Mode::Training => {
                        // Training suppresses the whole machine: abandon any
                        // open protection window and stop mirroring.
                        if self.status.state != SteerState::Normal {
                            self.status.exit_protection();
                        }
                        if self.status.duplication_enabled {
                            self.disable_duplication();
                        }
                    }
                    Mode::Mirror => {
                        if !self.status.duplication_enabled {
                            if let Some(active_idx) = self.status.active {
                                if let Some(backup_idx) =
                                    arbiter::select_backup(&self.uplinks, active_idx)
                                {
                                    self.enable_duplication(active_idx, backup_idx, now_ms);
                                }
                            }
                        }
                    }
                    Mode::Tripwire => {
                        if previous == Mode::Mirror
                            && self.status.state == SteerState::Normal
                            && self.status.duplication_enabled
                        {
                            self.disable_duplication();
                        }
                    }
                }
                Ok(detail)
            }
            Command::Force(name) => {
                let Some(target_idx) = self.cfg.uplink_index(&name) else {
                    return Err(format!("unknown_uplink={name}"));
                };
                if !self.uplinks[target_idx].enabled {
                    return Err(format!("uplink_disabled={name}"));
                }
                let active_idx = self.status.active.unwrap_or(target_idx);
                if target_idx != active_idx && !self.swap_active(active_idx, target_idx) {
                    return Err(format!("switch_fail={name}"));
                }
                self.status.operator_force_locked = true;
                Ok(detail)
            }
            Command::ForceAuto => {
                self.status.operator_force_locked = false;
                self.status.switches_in_window = 0;
                self.status.flap_suppressed = false;
                // Re-arbitrate immediately rather than waiting for a window.
                if let (Some(active_idx), Some(target_idx)) =
                    (self.status.active, arbiter::select_target(&self.uplinks))
                {
                    if target_idx != active_idx {
                        self.swap_active(active_idx, target_idx);
                    }
                }
                Ok(detail)
            }
            Command::Trigger => {
                self.status.manual_trigger_pending = true;
                Ok(detail)
            }
            Command::Enable(name) => {
                let idx = self
                    .cfg
                    .uplink_index(&name)
                    .ok_or_else(|| format!("unknown_uplink={name}"))?;
                self.uplinks[idx].enabled = true;
                Ok(detail)
            }
            Command::Disable(name) => {
                let idx = self
                    .cfg
                    .uplink_index(&name)
                    .ok_or_else(|| format!("unknown_uplink={name}"))?;
                self.uplinks[idx].enabled = false;
                Ok(detail)
            }
            Command::Fail(name) => {
                let idx = self
                    .cfg
                    .uplink_index(&name)
                    .ok_or_else(|| format!("unknown_uplink={name}"))?;
                self.uplinks[idx].operator_failed = true;
                self.uplinks[idx].reachable = false;
                Ok(detail)
            }
            Command::Unfail(name) => {
                let idx = self
                    .cfg
                    .uplink_index(&name)
                    .ok_or_else(|| format!("unknown_uplink={name}"))?;
                self.uplinks[idx].operator_failed = false;
                Ok(detail)
            }
            Command::Controller(controller) => {
                self.status.controller = controller;
                self.route.advise_controller(controller);
                Ok(detail)
            }
        }
    }

    // ─── Publication ────────────────────────────────────────────────

    fn publish(&mut self, now_ms: u64) {
        let snapshot = self.snapshot(now_ms);
        if let Err(e) = self.publisher.publish(snapshot) {
            warn!(error = %e, "status publish failed");
        }
    }

    /// Build the complete published snapshot.
    pub fn snapshot(&self, now_ms: u64) -> StatusSnapshot {
        StatusSnapshot {
            run: self.run_id.clone(),
            ts_ms: now_ms,
            mode: self.status.mode,
            state: self.status.state,
            active_uplink: self.active_name().map(|s| s.to_string()),
            controller: self.status.controller,
            last_trigger: self.status.last_trigger,
            trigger_detail: self.status.trigger_detail.clone(),
            duplication_enabled: self.status.duplication_enabled,
            duplication_engaged_at_ms: self.status.duplication_engaged_at_ms,
            protection_entered_at_ms: self.status.protection_entered_at_ms,
            hold_remaining_ms: self.status.hold_remaining_ms(now_ms, self.cfg.min_hold_ms),
            clean_remaining_ms: self.status.clean_remaining_ms(now_ms, self.cfg.clean_exit_ms),
            switches_in_window: self.status.switches_in_window,
            flap_suppressed: self.status.flap_suppressed,
            operator_force_locked: self.status.operator_force_locked,
            global_risk: self.status.global_risk,
            recommendation: self.status.recommendation,
            last_cmd: self.status.last_cmd.clone(),
            gps: self.gps_fix,
            uplinks: self.uplinks.iter().map(|u| u.status()).collect(),
        }
    }
}
