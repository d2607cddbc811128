//! # PathSteer Controller dedup daemon
//!
//! Binds one UDP input per tunnel, gates duplicates through the flow
//! table, and forwards first arrivals to the egress address (or discards
//! them in monitor mode). Counters are logged every 10 s and optionally
//! served to Prometheus.
//!
//! ## Usage
//!
//! ```bash
//! # Two tunnel inputs, forward to the local service ingress
//! pathsteer-dedup --bind 0.0.0.0:7001,0.0.0.0:7002 --egress 127.0.0.1:7100
//!
//! # Monitor mode with metrics
//! pathsteer-dedup --bind 0.0.0.0:7001,0.0.0.0:7002 --metrics-port 9091
//! ```

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pathsteer_dedup::engine::DedupEngine;
use pathsteer_dedup::metrics::MetricsServer;
use pathsteer_dedup::table::{DEFAULT_CAPACITY, FlowTable};

/// PathSteer controller-side dedup daemon.
#[derive(Parser, Debug)]
#[command(name = "pathsteer-dedup", about = "First-arrival dedup gate for bonded tunnels")]
struct Cli {
    /// Tunnel input addresses, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    bind: Vec<SocketAddr>,

    /// Forward first arrivals to this address. Omit for monitor mode.
    #[arg(long)]
    egress: Option<SocketAddr>,

    /// Flow entry TTL in seconds.
    #[arg(long, default_value_t = 5)]
    ttl_s: u64,

    /// Serve Prometheus metrics on this port.
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let run = pathsteer_common::ids::run_id();

    tracing::info!(
        run = %run,
        bind = ?cli.bind,
        egress = ?cli.egress,
        ttl_s = cli.ttl_s,
        metrics_port = ?cli.metrics_port,
        "pathsteer-dedup starting"
    );

    let table = FlowTable::new(DEFAULT_CAPACITY, Duration::from_secs(cli.ttl_s.max(1)));
    let mut engine = DedupEngine::new(table);
    for addr in &cli.bind {
        engine.add_input(*addr).with_context(|| format!("cannot bind {addr}"))?;
    }

    let mut metrics_server = None;
    if let Some(port) = cli.metrics_port {
        let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
        metrics_server = Some(MetricsServer::start(addr, engine.stats())?);
    }

    let egress = match cli.egress {
        Some(addr) => {
            let socket = UdpSocket::bind("0.0.0.0:0").context("cannot bind egress socket")?;
            socket.connect(addr).with_context(|| format!("cannot connect egress {addr}"))?;
            Some(socket)
        }
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("cannot install signal handler")?;
    }

    let stats = engine.stats();
    let mut last_stats_log = std::time::Instant::now();
    let stats_interval = Duration::from_secs(10);

    while running.load(Ordering::Relaxed) {
        match engine.output_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(packet) => {
                if let Some(socket) = &egress {
                    if let Err(e) = socket.send(&packet) {
                        tracing::warn!(error = %e, "egress send failed");
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }

        if last_stats_log.elapsed() >= stats_interval {
            let (total, forwarded, dropped, active) = stats.snapshot();
            tracing::info!(total, forwarded, dropped, active, "dedup counters");
            last_stats_log = std::time::Instant::now();
        }
    }

    let (total, forwarded, dropped, active) = stats.snapshot();
    tracing::info!(total, forwarded, dropped, active, "final dedup counters");

    engine.shutdown();
    if let Some(server) = metrics_server.as_mut() {
        server.stop();
    }

    Ok(())
}
