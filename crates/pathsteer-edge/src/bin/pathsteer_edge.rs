//! # PathSteer Edge daemon
//!
//! Loads the engine configuration, spawns the probe pool, and runs the
//! steering loop until SIGINT/SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! # Production (needs the service namespace and uplink namespaces built
//! # by the host boot scripts)
//! pathsteer-edge --config /etc/pathsteer/config.json
//!
//! # Local development: synthetic probes, no kernel actuation
//! pathsteer-edge --config ./demo/config.json --run-dir /tmp/pathsteer --simulate
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use pathsteer_common::events::EventLog;
use pathsteer_common::ids::run_id;
use pathsteer_common::status::UplinkKind;
use pathsteer_edge::chaos::ChaosReader;
use pathsteer_edge::command::CommandIngress;
use pathsteer_edge::config::EngineConfig;
use pathsteer_edge::engine::{EngineDeps, SteeringEngine};
use pathsteer_edge::gps::GpsReader;
use pathsteer_edge::net::mirror::{MirrorControl, NftMirror, NoopMirror};
use pathsteer_edge::net::route::{NetlinkRouteControl, NoopRoute, RouteControl};
use pathsteer_edge::probe::dish::DishClient;
use pathsteer_edge::probe::icmp::IcmpProber;
use pathsteer_edge::probe::modem::ModemClient;
use pathsteer_edge::probe::{ProbePool, SyntheticProber, UplinkProbes};
use pathsteer_edge::status::StatusPublisher;

/// PathSteer edge steering daemon.
#[derive(Parser, Debug)]
#[command(name = "pathsteer-edge", about = "Multi-uplink session-continuity steering engine")]
struct Cli {
    /// Engine configuration file.
    #[arg(long, default_value = "/etc/pathsteer/config.json")]
    config: PathBuf,

    /// Runtime directory (status.json, cmdq/, gps.json, chaos.json).
    #[arg(long, default_value = "/run/pathsteer")]
    run_dir: PathBuf,

    /// Event log directory.
    #[arg(long, default_value = "/var/log/pathsteer")]
    log_dir: PathBuf,

    /// Modem-manager shim socket.
    #[arg(long, default_value = "/run/pathsteer/modemd.sock")]
    modem_socket: PathBuf,

    /// Controller-side return-route switch script.
    #[arg(long)]
    return_route_script: Option<String>,

    /// External-router controller-advise script (`c8000` command).
    #[arg(long)]
    controller_script: Option<String>,

    /// Synthetic probes and no kernel actuation (local development).
    #[arg(long, default_value_t = false)]
    simulate: bool,
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

    // Config failure is fatal: steering with guessed values is worse than
    // not steering.
    let cfg = EngineConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!(e))
        .context("config load failed")?;

    let run = run_id();
    std::fs::create_dir_all(&cli.run_dir)
        .with_context(|| format!("cannot create run dir {}", cli.run_dir.display()))?;

    let events = match EventLog::create(&cli.log_dir, &run) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            tracing::warn!(error = %e, "event log unavailable; running without it");
            Arc::new(EventLog::disabled(&run))
        }
    };

    tracing::info!(
        run = %run,
        config = %cli.config.display(),
        uplinks = cfg.uplinks.len(),
        simulate = cli.simulate,
        "pathsteer-edge starting"
    );

    // ── Probe pool ──────────────────────────────────────────────
    let resolver: Ipv4Addr = cfg
        .probe_resolver
        .parse()
        .context("probe_resolver is not an IPv4 address")?;
    let controller: Option<Ipv4Addr> = match cfg.controllers.first() {
        Some(addr) => Some(addr.parse().context("controller is not an IPv4 address")?),
        None => None,
    };

    let mut probes = Vec::new();
    for u in &cfg.uplinks {
        let probe_set = if cli.simulate {
            let base = match u.kind {
                UplinkKind::Lte => 60.0,
                UplinkKind::Sat => 45.0,
                UplinkKind::Fiber => 20.0,
            };
            UplinkProbes {
                prober: Arc::new(SyntheticProber {
                    base_rtt_ms: base,
                    noise_ms: 2.0,
                }),
                lte: None,
                sat: None,
            }
        } else {
            let prober: Arc<dyn pathsteer_edge::probe::Prober> = match u.kind {
                // LTE probes the controller over the raw radio interface,
                // bypassing the tunnel.
                UplinkKind::Lte => {
                    let target = controller
                        .context("LTE uplinks require a controller address to probe")?;
                    Arc::new(IcmpProber::bound_to_iface(target, &u.interface))
                }
                // SAT/fiber probe a well-known resolver from inside the
                // uplink's namespace.
                UplinkKind::Sat | UplinkKind::Fiber => match &u.namespace {
                    Some(ns) => Arc::new(IcmpProber::in_namespace(resolver, ns)),
                    None => Arc::new(IcmpProber::plain(resolver)),
                },
            };
            let lte = (u.kind == UplinkKind::Lte).then(|| {
                Arc::new(ModemClient::new(
                    cli.modem_socket.clone(),
                    u.identifier.as_deref().unwrap_or("0"),
                )) as Arc<dyn pathsteer_edge::probe::LteSource>
            });
            let sat = match (u.kind, &u.identifier) {
                (UplinkKind::Sat, Some(addr)) => Some(Arc::new(DishClient::new(
                    addr,
                    u.namespace.as_deref(),
                ))
                    as Arc<dyn pathsteer_edge::probe::SatSource>),
                _ => None,
            };
            UplinkProbes { prober, lte, sat }
        };
        probes.push(probe_set);
    }

    let chaos = Arc::new(ChaosReader::new(cli.run_dir.join("chaos.json")));
    let (tx, rx) = crossbeam_channel::bounded(1024);
    let running = Arc::new(AtomicBool::new(true));

    let pool = ProbePool::spawn(
        cfg.uplinks.iter().map(|u| u.name.clone()).collect(),
        probes,
        cfg.sample_rate_hz,
        chaos,
        tx,
        running.clone(),
    );

    // ── Actuators ───────────────────────────────────────────────
    let (mirror, route): (Box<dyn MirrorControl>, Box<dyn RouteControl>) = if cli.simulate {
        (Box::new(NoopMirror), Box::new(NoopRoute))
    } else {
        (
            Box::new(NftMirror::new(&cfg.service_namespace)),
            Box::new(NetlinkRouteControl::new(
                &cfg.service_namespace,
                cli.return_route_script.clone(),
                cli.controller_script.clone(),
            )),
        )
    };

    let gps = cfg
        .gps_enabled
        .then(|| GpsReader::new(cli.run_dir.join("gps.json")));

    let deps = EngineDeps {
        mirror,
        route,
        events,
        publisher: StatusPublisher::new(cli.run_dir.join("status.json")),
        ingress: CommandIngress::new(&cli.run_dir).context("cannot set up command queue")?,
        gps,
    };

    // ── Graceful shutdown ───────────────────────────────────────
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("cannot install signal handler")?;
    }

    // ── Steering loop ───────────────────────────────────────────
    let mut engine = SteeringEngine::new(cfg, run, deps);
    engine.run(rx, running);
    pool.join();

    Ok(())
}
