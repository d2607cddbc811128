//! Persistent modem signal client.
//!
//! Cellular modems exhaust their control-channel client IDs when management
//! connections are churned, so this client holds ONE unix-socket connection
//! to the modem-manager shim for the life of the process and reconnects
//! only after an error. Queries are rate-limited to one per
//! [`LTE_POLL_INTERVAL`] per modem regardless of caller cadence.
//!
//! Wire format, one JSON object per line each way:
//!
//! ```text
//! → {"query":"signal","modem":"0"}
//! ← {"rsrp_dbm":-95.2,"snr_db":12.0,"carrier":"m-one","cell_id":"0x1a2b"}
//! ```
//!
//! A query failure keeps the previous readings; signal metadata going stale
//! is never grounds to mark an uplink unreachable.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pathsteer_common::status::LteStatus;
use serde::Deserialize;
use tracing::debug;

use crate::probe::{LTE_POLL_INTERVAL, LteSource};

const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct SignalReply {
    rsrp_dbm: f64,
    snr_db: f64,
    #[serde(default)]
    carrier: Option<String>,
    #[serde(default)]
    cell_id: Option<String>,
}

pub struct ModemClient {
    socket_path: PathBuf,
    modem_id: String,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    stream: Option<BufReader<UnixStream>>,
    last_query_at: Option<Instant>,
    last: Option<LteStatus>,
}

impl ModemClient {
    pub fn new(socket_path: PathBuf, modem_id: &str) -> Self {
        ModemClient {
            socket_path,
            modem_id: modem_id.to_string(),
            state: Mutex::new(ClientState::default()),
        }
    }

    fn query(&self, state: &mut ClientState) -> Option<LteStatus> {
        if state.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path).ok()?;
            stream.set_read_timeout(Some(IO_TIMEOUT)).ok()?;
            stream.set_write_timeout(Some(IO_TIMEOUT)).ok()?;
            state.stream = Some(BufReader::new(stream));
        }
        let reader = state.stream.as_mut()?;

        let request = format!("{{\"query\":\"signal\",\"modem\":\"{}\"}}\n", self.modem_id);
        if reader.get_mut().write_all(request.as_bytes()).is_err() {
            state.stream = None;
            return None;
        }

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(n) if n > 0 => {}
            _ => {
                state.stream = None;
                return None;
            }
        }

        match serde_json::from_str::<SignalReply>(&line) {
            Ok(reply) => Some(LteStatus {
                signal_dbm: reply.rsrp_dbm,
                snr_db: reply.snr_db,
                carrier: reply.carrier,
                cell_id: reply.cell_id,
            }),
            Err(e) => {
                debug!(modem = %self.modem_id, error = %e, "bad signal reply");
                None
            }
        }
    }
}

impl LteSource for ModemClient {
    fn poll(&self) -> Option<LteStatus> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(at) = state.last_query_at {
            if at.elapsed() < LTE_POLL_INTERVAL {
                return state.last.clone();
            }
        }
        state.last_query_at = Some(Instant::now());

        if let Some(status) = self.query(&mut state) {
            state.last = Some(status);
        }
        state.last.clone()
    }
}
