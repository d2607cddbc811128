//! Probe pool: per-uplink reachability and metric sampling.
//!
//! One worker thread per uplink runs the reachability probe at
//! `sample_rate_hz` with a hard 2 s deadline; kind-specific sources (modem
//! signal, dish stats) poll on their own slower cadences. All results fan
//! into one bounded channel the engine drains every loop iteration.
//!
//! Chaos injection is applied here, before results reach the channel, so
//! the tripwire sees perturbed values exactly as it would see real
//! degradation.

pub mod dish;
pub mod icmp;
pub mod modem;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::Sender;
use pathsteer_common::status::{LteStatus, SatStatus};
use rand::RngExt;
use tracing::warn;

use crate::chaos::ChaosReader;

/// Hard deadline for a single reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Cadence of satellite dish polling.
pub const SAT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between modem signal queries, per modem.
pub const LTE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Result of one reachability probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub rtt_ms: f64,
}

impl ProbeOutcome {
    pub fn miss() -> Self {
        ProbeOutcome {
            success: false,
            rtt_ms: 0.0,
        }
    }
}

/// A blocking reachability probe for one uplink.
pub trait Prober: Send + Sync {
    /// One-time setup on the worker thread (namespace entry, sockets).
    fn setup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run one probe. Must return within [`PROBE_TIMEOUT`].
    fn probe(&self) -> ProbeOutcome;
}

/// Slow-cadence cellular signal source.
pub trait LteSource: Send + Sync {
    /// Latest signal readings, or `None` to keep prior values.
    fn poll(&self) -> Option<LteStatus>;
}

/// Slow-cadence satellite dish source.
pub trait SatSource: Send + Sync {
    /// Latest dish readings, or `None` to keep prior values.
    fn poll(&self) -> Option<SatStatus>;
}

/// Everything the pool runs for one uplink.
pub struct UplinkProbes {
    pub prober: Arc<dyn Prober>,
    pub lte: Option<Arc<dyn LteSource>>,
    pub sat: Option<Arc<dyn SatSource>>,
}

/// Event delivered to the engine's channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeEvent {
    Sample {
        uplink: usize,
        success: bool,
        rtt_ms: f64,
        at_ms: u64,
    },
    Lte {
        uplink: usize,
        status: LteStatus,
    },
    Sat {
        uplink: usize,
        status: SatStatus,
    },
}

/// Wall-clock milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct ProbePool {
    handles: Vec<thread::JoinHandle<()>>,
}

impl ProbePool {
    /// Spawn workers for every uplink. `names` and `probes` are parallel,
    /// indexed like the engine's uplink table.
    pub fn spawn(
        names: Vec<String>,
        probes: Vec<UplinkProbes>,
        sample_rate_hz: f64,
        chaos: Arc<ChaosReader>,
        tx: Sender<ProbeEvent>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let interval = Duration::from_secs_f64(1.0 / sample_rate_hz.max(0.5));
        let mut handles = Vec::new();

        for (idx, (name, sources)) in names.into_iter().zip(probes).enumerate() {
            let UplinkProbes { prober, lte, sat } = sources;

            {
                let name = name.clone();
                let chaos = chaos.clone();
                let tx = tx.clone();
                let running = running.clone();
                let handle = thread::Builder::new()
                    .name(format!("probe-{name}"))
                    .spawn(move || probe_worker(idx, name, prober, interval, chaos, tx, running))
                    .expect("failed to spawn probe worker");
                handles.push(handle);
            }

            if let Some(lte) = lte {
                let tx = tx.clone();
                let running = running.clone();
                let handle = thread::Builder::new()
                    .name(format!("lte-{name}"))
                    .spawn(move || {
                        poll_worker(running, LTE_POLL_INTERVAL, move || {
                            if let Some(status) = lte.poll() {
                                let _ = tx.send(ProbeEvent::Lte { uplink: idx, status });
                            }
                        })
                    })
                    .expect("failed to spawn lte poller");
                handles.push(handle);
            }

            if let Some(sat) = sat {
                let tx = tx.clone();
                let running = running.clone();
                let handle = thread::Builder::new()
                    .name(format!("sat-{name}"))
                    .spawn(move || {
                        poll_worker(running, SAT_POLL_INTERVAL, move || {
                            if let Some(status) = sat.poll() {
                                let _ = tx.send(ProbeEvent::Sat { uplink: idx, status });
                            }
                        })
                    })
                    .expect("failed to spawn sat poller");
                handles.push(handle);
            }
        }

        ProbePool { handles }
    }

    /// Wait for all workers to exit (after the run flag is cleared).
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn probe_worker(
    idx: usize,
    name: String,
    prober: Arc<dyn Prober>,
    interval: Duration,
    chaos: Arc<ChaosReader>,
    tx: Sender<ProbeEvent>,
    running: Arc<AtomicBool>,
) {
    let setup_ok = match prober.setup() {
        Ok(()) => true,
        Err(e) => {
            warn!(uplink = %name, error = %e, "probe setup failed; reporting misses");
            false
        }
    };

    // Phase jitter so workers don't probe in lockstep.
    let phase = {
        let mut rng = rand::rng();
        interval.mul_f64(rng.random_range(0.0..1.0))
    };
    sleep_while_running(&running, phase);

    while running.load(Ordering::Relaxed) {
        let started = quanta::Instant::now();

        let mut outcome = if setup_ok {
            prober.probe()
        } else {
            ProbeOutcome::miss()
        };
        chaos.apply(&name, &mut outcome);

        if tx
            .send(ProbeEvent::Sample {
                uplink: idx,
                success: outcome.success,
                rtt_ms: outcome.rtt_ms,
                at_ms: unix_millis(),
            })
            .is_err()
        {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            sleep_while_running(&running, interval - elapsed);
        }
    }
}

fn poll_worker(running: Arc<AtomicBool>, interval: Duration, mut poll: impl FnMut()) {
    while running.load(Ordering::Relaxed) {
        poll();
        sleep_while_running(&running, interval);
    }
}

/// Sleep in small slices so shutdown is responsive.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(50);
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::Relaxed) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

/// Scripted prober for `--simulate` runs: a steady RTT with mild noise.
pub struct SyntheticProber {
    pub base_rtt_ms: f64,
    pub noise_ms: f64,
}

impl Prober for SyntheticProber {
    fn probe(&self) -> ProbeOutcome {
        let mut rng = rand::rng();
        let noise = if self.noise_ms > 0.0 {
            rng.random_range(-self.noise_ms..self.noise_ms)
        } else {
            0.0
        };
        ProbeOutcome {
            success: true,
            rtt_ms: (self.base_rtt_ms + noise).max(0.1),
        }
    }
}
