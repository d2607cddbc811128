//! The first-arrival gate and its tunnel inputs.
//!
//! Each tunnel input is a UDP socket carrying already-decapsulated IP
//! packets, one per datagram, read by its own thread. Every packet goes
//! through the shared flow table; first arrivals land on the output
//! channel unchanged, duplicates vanish. A background sweep expires stale
//! entries and keeps the active-flow gauge fresh.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{info, warn};

use crate::fingerprint::fingerprint;
use crate::table::{FlowTable, Verdict};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const OUTPUT_CHANNEL_CAPACITY: usize = 4096;

/// Counters exported to the metrics surface. All monotonic except
/// `active_flows`, which is a gauge refreshed by the sweep.
#[derive(Default)]
pub struct DedupStats {
    pub total: AtomicU64,
    pub forwarded: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub active_flows: AtomicU64,
}

impl DedupStats {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.forwarded.load(Ordering::Relaxed),
            self.duplicates_dropped.load(Ordering::Relaxed),
            self.active_flows.load(Ordering::Relaxed),
        )
    }
}

pub struct DedupEngine {
    table: Arc<Mutex<FlowTable>>,
    stats: Arc<DedupStats>,
    clock: quanta::Clock,
    epoch: quanta::Instant,
    output_tx: Sender<Bytes>,
    /// Forwarded packets, in arrival order.
    pub output_rx: Receiver<Bytes>,
    running: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl DedupEngine {
    pub fn new(table: FlowTable) -> Self {
        let (output_tx, output_rx) = bounded(OUTPUT_CHANNEL_CAPACITY);
        let clock = quanta::Clock::new();
        let epoch = clock.now();
        let mut engine = DedupEngine {
            table: Arc::new(Mutex::new(table)),
            stats: Arc::new(DedupStats::default()),
            clock,
            epoch,
            output_tx,
            output_rx,
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        };
        engine.spawn_sweeper();
        engine
    }

    pub fn with_defaults() -> Self {
        Self::new(FlowTable::with_defaults())
    }

    pub fn stats(&self) -> Arc<DedupStats> {
        self.stats.clone()
    }

    /// Monotonic milliseconds since engine start, offset so it is never 0.
    fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.epoch).as_millis() as u64 + 1
    }

    /// Gate one packet at `now_ms`. The core of the engine, shared by the
    /// socket readers, the tests, and the benches.
    pub fn process(&self, packet: &[u8], now_ms: u64) -> Verdict {
        self.stats.total.fetch_add(1, Ordering::Relaxed);

        let verdict = match fingerprint(packet) {
            Some(fp) => {
                let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
                table.admit(fp, now_ms)
            }
            // Not parseable as IP: the gate never holds such packets.
            None => Verdict::Forward,
        };

        match verdict {
            Verdict::Forward => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Verdict::Duplicate => {
                self.stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        verdict
    }

    /// Bind a tunnel input and start reading it. Returns the bound address
    /// (useful with port 0 in tests).
    pub fn add_input(&mut self, bind: SocketAddr) -> std::io::Result<SocketAddr> {
        let socket = UdpSocket::bind(bind)?;
        let local = socket.local_addr()?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;

        let engine = InputContext {
            table: self.table.clone(),
            stats: self.stats.clone(),
            clock: self.clock.clone(),
            epoch: self.epoch,
            output_tx: self.output_tx.clone(),
            running: self.running.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("dedup-in-{}", local.port()))
            .spawn(move || input_loop(socket, engine))
            .map_err(std::io::Error::other)?;
        self.handles.push(handle);
        info!(%local, "tunnel input bound");
        Ok(local)
    }

    /// Stop all input readers and the sweeper. Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn spawn_sweeper(&mut self) {
        let table = self.table.clone();
        let stats = self.stats.clone();
        let running = self.running.clone();
        let clock = self.clock.clone();
        let epoch = self.epoch;
        let handle = thread::Builder::new()
            .name("dedup-sweep".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(SWEEP_INTERVAL);
                    let now_ms = clock.now().duration_since(epoch).as_millis() as u64 + 1;
                    let active = {
                        let mut table = table.lock().unwrap_or_else(|e| e.into_inner());
                        table.sweep(now_ms)
                    };
                    stats.active_flows.store(active as u64, Ordering::Relaxed);
                }
            })
            .expect("failed to spawn dedup sweeper");
        self.handles.push(handle);
    }
}

impl Drop for DedupEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct InputContext {
    table: Arc<Mutex<FlowTable>>,
    stats: Arc<DedupStats>,
    clock: quanta::Clock,
    epoch: quanta::Instant,
    output_tx: Sender<Bytes>,
    running: Arc<AtomicBool>,
}

fn input_loop(socket: UdpSocket, ctx: InputContext) {
    let mut buf = [0u8; 65_535];
    while ctx.running.load(Ordering::Relaxed) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "tunnel input read failed");
                continue;
            }
        };

        let packet = &buf[..n];
        let now_ms = ctx.clock.now().duration_since(ctx.epoch).as_millis() as u64 + 1;

        ctx.stats.total.fetch_add(1, Ordering::Relaxed);
        let verdict = match fingerprint(packet) {
            Some(fp) => {
                let mut table = ctx.table.lock().unwrap_or_else(|e| e.into_inner());
                table.admit(fp, now_ms)
            }
            None => Verdict::Forward,
        };

        match verdict {
            Verdict::Forward => {
                ctx.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                if ctx.output_tx.send(Bytes::copy_from_slice(packet)).is_err() {
                    break;
                }
            }
            Verdict::Duplicate => {
                ctx.stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
