//! Run identifier generation.
//!
//! Every engine process gets a fresh `run_XXXXXXXX` identifier at startup.
//! The id is stamped on every event-log line and on the status snapshot so
//! that log collectors can correlate records across restarts.

use rand::RngExt;

/// Generate a run id: `run_<8 chars>`.
///
/// Uses an unambiguous character set (no 0/O, 1/I/l confusion) so the id
/// survives being read aloud over a radio or retyped from a screenshot.
pub fn run_id() -> String {
    const CHARSET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
    let mut rng = rand::rng();
    let mut id = String::with_capacity(12);
    id.push_str("run_");
    for _ in 0..8 {
        let idx = rng.random_range(0..CHARSET.len());
        id.push(CHARSET[idx] as char);
    }
    id
}
