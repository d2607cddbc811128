//! Satellite dish stats client.
//!
//! The dish exposes a small local HTTP endpoint inside the uplink's
//! namespace (the `identifier` config field carries its `host:port`). The
//! poller issues `GET /status` once a second on a thread joined to that
//! namespace and maps the reply onto [`SatStatus`]. Any failure — connect,
//! timeout, parse — yields `None` and the engine keeps the prior readings.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use pathsteer_common::status::SatStatus;
use serde::Deserialize;

use crate::net::netns::NetNs;
use crate::probe::SatSource;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DishReply {
    online: bool,
    obstructed: bool,
    obstruction_fraction: f64,
    latency_ms: f64,
    obstruction_eta_s: Option<f64>,
}

impl Default for DishReply {
    fn default() -> Self {
        DishReply {
            online: false,
            obstructed: false,
            obstruction_fraction: 0.0,
            latency_ms: 0.0,
            obstruction_eta_s: None,
        }
    }
}

pub struct DishClient {
    addr: String,
    netns: Option<NetNs>,
}

impl DishClient {
    pub fn new(addr: &str, namespace: Option<&str>) -> Self {
        DishClient {
            addr: addr.to_string(),
            netns: namespace.map(NetNs::named),
        }
    }

    fn fetch(&self) -> Option<SatStatus> {
        let addr: SocketAddr = self.addr.parse().ok()?;
        let mut stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT).ok()?;
        stream.set_read_timeout(Some(IO_TIMEOUT)).ok()?;
        stream.set_write_timeout(Some(IO_TIMEOUT)).ok()?;

        let request = format!(
            "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).ok()?;

        let mut response = String::new();
        stream.read_to_string(&mut response).ok()?;
        parse_status_response(&response)
    }
}

/// Split an HTTP response and parse the dish JSON body.
fn parse_status_response(response: &str) -> Option<SatStatus> {
    let (head, body) = response.split_once("\r\n\r\n")?;
    let status_line = head.lines().next()?;
    if !status_line.contains(" 200 ") {
        return None;
    }
    let reply: DishReply = serde_json::from_str(body.trim()).ok()?;
    Some(SatStatus {
        online: reply.online,
        obstructed: reply.obstructed,
        obstruction_fraction: reply.obstruction_fraction,
        dish_latency_ms: reply.latency_ms,
        obstruction_eta_s: reply.obstruction_eta_s,
    })
}

impl SatSource for DishClient {
    fn poll(&self) -> Option<SatStatus> {
        match &self.netns {
            Some(ns) => ns.run(|| self.fetch()).ok().flatten(),
            None => self.fetch(),
        }
    }
}
