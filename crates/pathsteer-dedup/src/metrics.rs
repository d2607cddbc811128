//! # Prometheus Metrics
//!
//! Renders dedup counters in Prometheus text exposition format and serves
//! them from a lightweight HTTP endpoint for scraping.

use std::fmt::Write;
use std::io::{Read, Write as IoWrite};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::engine::DedupStats;

/// Render the dedup counters as Prometheus text exposition format.
pub fn render_prometheus(stats: &DedupStats) -> String {
    let (total, forwarded, dropped, active) = stats.snapshot();
    let mut out = String::with_capacity(1024);

    writeln!(
        out,
        "# HELP pathsteer_dedup_packets_total Packets seen across all tunnel inputs."
    )
    .unwrap();
    writeln!(out, "# TYPE pathsteer_dedup_packets_total counter").unwrap();
    writeln!(out, "pathsteer_dedup_packets_total {total}").unwrap();

    writeln!(
        out,
        "# HELP pathsteer_dedup_forwarded_total First-arrival packets forwarded."
    )
    .unwrap();
    writeln!(out, "# TYPE pathsteer_dedup_forwarded_total counter").unwrap();
    writeln!(out, "pathsteer_dedup_forwarded_total {forwarded}").unwrap();

    writeln!(
        out,
        "# HELP pathsteer_dedup_duplicates_dropped_total Duplicate copies dropped."
    )
    .unwrap();
    writeln!(out, "# TYPE pathsteer_dedup_duplicates_dropped_total counter").unwrap();
    writeln!(out, "pathsteer_dedup_duplicates_dropped_total {dropped}").unwrap();

    writeln!(
        out,
        "# HELP pathsteer_dedup_active_flows Live flow-table entries as of the last sweep."
    )
    .unwrap();
    writeln!(out, "# TYPE pathsteer_dedup_active_flows gauge").unwrap();
    writeln!(out, "pathsteer_dedup_active_flows {active}").unwrap();

    out
}

/// A lightweight HTTP server that serves `/metrics` for Prometheus scraping.
pub struct MetricsServer {
    running: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn start(bind_addr: SocketAddr, stats: Arc<DedupStats>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = thread::Builder::new()
            .name("dedup-metrics".into())
            .spawn(move || serve_loop(listener, stats, running_clone))
            .map_err(std::io::Error::other)?;

        Ok(MetricsServer {
            running,
            handle: Some(handle),
            addr,
        })
    }

    /// The address the server is actually listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Gracefully stop the server.
    pub fn stop(&mut self) {
        self.running
            .store(false, std::sync::atomic::Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve_loop(
    listener: TcpListener,
    stats: Arc<DedupStats>,
    running: Arc<std::sync::atomic::AtomicBool>,
) {
    while running.load(std::sync::atomic::Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, &stats),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn handle_connection(mut stream: TcpStream, stats: &DedupStats) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut buf = [0u8; 1024];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(_) => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    if request.starts_with("GET /metrics") {
        let body = render_prometheus(stats);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes());
    } else {
        let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
        let _ = stream.write_all(response.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn sample_stats() -> Arc<DedupStats> {
        let stats = Arc::new(DedupStats::default());
        stats.total.store(20_000, Ordering::Relaxed);
        stats.forwarded.store(10_000, Ordering::Relaxed);
        stats.duplicates_dropped.store(10_000, Ordering::Relaxed);
        stats.active_flows.store(1, Ordering::Relaxed);
        stats
    }

    #[test]
    fn render_contains_all_series() {
        let out = render_prometheus(&sample_stats());
        assert!(out.contains("# TYPE pathsteer_dedup_packets_total counter"));
        assert!(out.contains("pathsteer_dedup_packets_total 20000"));
        assert!(out.contains("pathsteer_dedup_forwarded_total 10000"));
        assert!(out.contains("pathsteer_dedup_duplicates_dropped_total 10000"));
        assert!(out.contains("pathsteer_dedup_active_flows 1"));
    }

    #[test]
    fn metrics_server_serves_prometheus() {
        let stats = sample_stats();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::start(addr, stats).expect("server should start");
        let actual_addr = server.addr();

        thread::sleep(Duration::from_millis(100));

        let mut stream = TcpStream::connect(actual_addr).expect("should connect");
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("pathsteer_dedup_forwarded_total 10000"));

        server.stop();
    }

    #[test]
    fn metrics_server_404_on_wrong_path() {
        let stats = Arc::new(DedupStats::default());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::start(addr, stats).expect("server should start");
        let actual_addr = server.addr();

        thread::sleep(Duration::from_millis(100));

        let mut stream = TcpStream::connect(actual_addr).expect("should connect");
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);

        assert!(response.starts_with("HTTP/1.1 404"));

        server.stop();
    }
}
