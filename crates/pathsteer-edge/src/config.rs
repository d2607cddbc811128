//! Engine configuration.
//!
//! Loaded from a single JSON file (default `/etc/pathsteer/config.json`).
//! Raw input structs carry `Option` fields; `resolve()` fills defaults and
//! clamps values into sane ranges. A config that fails to load or resolve is
//! fatal — the engine exits non-zero rather than steer with guessed values.

use std::collections::HashSet;
use std::path::Path;

use pathsteer_common::status::UplinkKind;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfigInput {
    pub sample_rate_hz: Option<f64>,
    pub rtt_step_threshold_ms: Option<f64>,
    pub rtt_step_window_ms: Option<u64>,
    pub probe_miss_count: Option<u32>,
    pub probe_miss_window_ms: Option<u64>,
    pub rsrp_drop_threshold_db: Option<f64>,
    pub sinr_drop_threshold_db: Option<f64>,
    pub preroll_ms: Option<u64>,
    pub dup_settle_ms: Option<u64>,
    pub min_hold_sec: Option<f64>,
    pub clean_exit_sec: Option<f64>,
    pub max_switches_per_window: Option<u32>,
    pub gps_enabled: Option<bool>,
    /// Service VIP prefix the route actuator manages (CIDR).
    pub service_prefix: Option<String>,
    /// Network namespace holding the service VIP and per-uplink service veths.
    pub service_namespace: Option<String>,
    /// Reachability target for namespaced (sat/fiber) probes.
    pub probe_resolver: Option<String>,
    /// Controller public addresses; LTE probes target the preferred one.
    pub controllers: Vec<String>,
    pub uplinks: Vec<UplinkConfigInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UplinkConfigInput {
    pub name: String,
    pub kind: Option<UplinkKind>,
    pub enabled: Option<bool>,
    /// Physical interface (e.g. `wwan0`). LTE probes bind to it directly.
    pub interface: String,
    /// Isolated namespace owning this uplink and its tunnel endpoint.
    pub namespace: Option<String>,
    /// Egress veth inside the uplink namespace.
    pub veth: Option<String>,
    /// Service-gateway veth in the service namespace.
    pub service_veth: Option<String>,
    /// Next-hop address reached over the service veth.
    pub service_gateway: Option<String>,
    /// Kind-specific identifier (modem index, dish address).
    pub identifier: Option<String>,
}

/// Resolved per-uplink configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkConfig {
    pub name: String,
    pub kind: UplinkKind,
    pub enabled: bool,
    pub interface: String,
    pub namespace: Option<String>,
    pub veth: Option<String>,
    pub service_veth: String,
    pub service_gateway: Option<String>,
    pub identifier: Option<String>,
}

/// Resolved engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate_hz: f64,
    pub rtt_step_threshold_ms: f64,
    /// Successful probes averaged for the RTT-step check.
    pub rtt_step_window: usize,
    pub probe_miss_count: u32,
    pub rsrp_drop_threshold_db: f64,
    pub sinr_drop_threshold_db: f64,
    pub preroll_ms: u64,
    pub dup_settle_ms: u64,
    pub min_hold_ms: u64,
    pub clean_exit_ms: u64,
    pub max_switches_per_window: u32,
    pub gps_enabled: bool,
    pub service_prefix: String,
    pub service_namespace: String,
    pub probe_resolver: String,
    pub controllers: Vec<String>,
    pub uplinks: Vec<UplinkConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 10.0,
            rtt_step_threshold_ms: 80.0,
            rtt_step_window: 3,
            probe_miss_count: 2,
            rsrp_drop_threshold_db: -120.0,
            sinr_drop_threshold_db: -5.0,
            preroll_ms: 500,
            dup_settle_ms: 50,
            min_hold_ms: 3000,
            clean_exit_ms: 2000,
            max_switches_per_window: 3,
            gps_enabled: false,
            service_prefix: "104.204.136.48/28".to_string(),
            service_namespace: "svc".to_string(),
            probe_resolver: "1.1.1.1".to_string(),
            controllers: Vec::new(),
            uplinks: Vec::new(),
        }
    }
}

impl EngineConfigInput {
    pub fn resolve(self) -> Result<EngineConfig, String> {
        let defaults = EngineConfig::default();

        let mut uplinks = Vec::new();
        let mut seen = HashSet::new();
        for link in self.uplinks {
            if link.name.is_empty() {
                return Err("uplink with empty name".to_string());
            }
            if !seen.insert(link.name.clone()) {
                continue;
            }
            if link.interface.is_empty() {
                return Err(format!("uplink {}: missing interface", link.name));
            }
            let kind = link
                .kind
                .ok_or_else(|| format!("uplink {}: missing kind", link.name))?;
            let service_veth = link
                .service_veth
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("{}-svc", link.name));
            uplinks.push(UplinkConfig {
                name: link.name,
                kind,
                enabled: link.enabled.unwrap_or(true),
                interface: link.interface,
                namespace: link.namespace.filter(|s| !s.is_empty()),
                veth: link.veth.filter(|s| !s.is_empty()),
                service_veth,
                service_gateway: link.service_gateway.filter(|s| !s.is_empty()),
                identifier: link.identifier.filter(|s| !s.is_empty()),
            });
        }

        if uplinks.is_empty() {
            return Err("no uplinks configured".to_string());
        }

        // Windows are expressed in wall time but evaluated over probes;
        // convert at the configured sample rate. An explicit count wins
        // over a window.
        let sample_rate_hz = self
            .sample_rate_hz
            .unwrap_or(defaults.sample_rate_hz)
            .clamp(0.5, 100.0);
        let rtt_step_window = self
            .rtt_step_window_ms
            .map(|ms| ((ms as f64 / 1000.0) * sample_rate_hz).round() as usize)
            .unwrap_or(defaults.rtt_step_window)
            .clamp(1, 20);
        let probe_miss_count = self
            .probe_miss_count
            .or_else(|| {
                self.probe_miss_window_ms
                    .map(|ms| ((ms as f64 / 1000.0) * sample_rate_hz).round() as u32)
            })
            .unwrap_or(defaults.probe_miss_count)
            .max(1);

        Ok(EngineConfig {
            sample_rate_hz,
            rtt_step_threshold_ms: self
                .rtt_step_threshold_ms
                .unwrap_or(defaults.rtt_step_threshold_ms)
                .max(1.0),
            rtt_step_window,
            probe_miss_count,
            rsrp_drop_threshold_db: self
                .rsrp_drop_threshold_db
                .unwrap_or(defaults.rsrp_drop_threshold_db),
            sinr_drop_threshold_db: self
                .sinr_drop_threshold_db
                .unwrap_or(defaults.sinr_drop_threshold_db),
            preroll_ms: self.preroll_ms.unwrap_or(defaults.preroll_ms),
            dup_settle_ms: self.dup_settle_ms.unwrap_or(defaults.dup_settle_ms).max(1),
            min_hold_ms: self
                .min_hold_sec
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(defaults.min_hold_ms),
            clean_exit_ms: self
                .clean_exit_sec
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(defaults.clean_exit_ms),
            max_switches_per_window: self
                .max_switches_per_window
                .unwrap_or(defaults.max_switches_per_window)
                .max(1),
            gps_enabled: self.gps_enabled.unwrap_or(defaults.gps_enabled),
            service_prefix: self
                .service_prefix
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.service_prefix),
            service_namespace: self
                .service_namespace
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.service_namespace),
            probe_resolver: self
                .probe_resolver
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.probe_resolver),
            controllers: self.controllers,
            uplinks,
        })
    }
}

impl EngineConfig {
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let parsed: EngineConfigInput =
            serde_json::from_str(input).map_err(|e| format!("invalid config JSON: {e}"))?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&contents)
    }

    pub fn uplink_index(&self, name: &str) -> Option<usize> {
        self.uplinks.iter().position(|u| u.name == name)
    }
}
