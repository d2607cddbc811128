//! Chaos injection for demos and failure drills.
//!
//! A JSON file maps uplink names to additive perturbations:
//!
//! ```json
//! {"cell_a": {"rtt": 120.0, "jitter": 10.0, "loss": 0.2}}
//! ```
//!
//! Each probe cycle re-reads the file (mtime-gated) and perturbs the raw
//! probe result *before* it reaches the aggregator, so the tripwire sees
//! the injected values exactly as it would see real degradation. Deleting
//! the file clears all perturbation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use rand::RngExt;
use serde::Deserialize;

use crate::probe::ProbeOutcome;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChaosProfile {
    /// Added to every successful probe RTT, milliseconds.
    pub rtt: f64,
    /// Uniform ± spread added on top of `rtt`, milliseconds.
    pub jitter: f64,
    /// Probability a successful probe is converted to a miss, 0.0–1.0.
    pub loss: f64,
}

/// Shared, mtime-cached view of the chaos file.
pub struct ChaosReader {
    path: PathBuf,
    state: Mutex<CachedProfiles>,
}

#[derive(Default)]
struct CachedProfiles {
    profiles: HashMap<String, ChaosProfile>,
    mtime: Option<SystemTime>,
}

impl ChaosReader {
    pub fn new(path: PathBuf) -> Self {
        ChaosReader {
            path,
            state: Mutex::new(CachedProfiles::default()),
        }
    }

    /// Current profile for an uplink, re-reading the file if it changed.
    pub fn profile_for(&self, uplink: &str) -> Option<ChaosProfile> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => {
                if state.mtime != Some(mtime) {
                    state.profiles = std::fs::read_to_string(&self.path)
                        .ok()
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default();
                    state.mtime = Some(mtime);
                }
            }
            Err(_) => {
                // File removed: chaos off.
                state.profiles.clear();
                state.mtime = None;
            }
        }

        state.profiles.get(uplink).copied()
    }

    /// Perturb a probe outcome in place per the uplink's profile.
    pub fn apply(&self, uplink: &str, outcome: &mut ProbeOutcome) {
        let Some(profile) = self.profile_for(uplink) else {
            return;
        };
        if !outcome.success {
            return;
        }

        let mut rng = rand::rng();
        if profile.loss > 0.0 && rng.random_range(0.0..1.0) < profile.loss {
            outcome.success = false;
            outcome.rtt_ms = 0.0;
            return;
        }

        outcome.rtt_ms += profile.rtt;
        if profile.jitter > 0.0 {
            outcome.rtt_ms += rng.random_range(-profile.jitter..profile.jitter);
        }
        outcome.rtt_ms = outcome.rtt_ms.max(0.1);
    }
}
