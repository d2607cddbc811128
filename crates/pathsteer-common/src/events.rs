//! Append-only JSONL event log.
//!
//! One file per run: `pathsteer_<run_id>.jsonl`. Every line is a complete
//! JSON object `{ts, run, event, data}`. The log is a telemetry surface,
//! not a control surface: a write failure must never take the engine down,
//! so `emit` swallows I/O errors after logging the first one.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct EventLog {
    run: String,
    file: Mutex<Option<File>>,
    write_failed: AtomicBool,
    path: Option<PathBuf>,
}

impl EventLog {
    /// Open (creating if needed) the log file for this run under `dir`.
    pub fn create(dir: &Path, run: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("pathsteer_{run}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(EventLog {
            run: run.to_string(),
            file: Mutex::new(Some(file)),
            write_failed: AtomicBool::new(false),
            path: Some(path),
        })
    }

    /// A log that discards everything. For tests and `--simulate` runs.
    pub fn disabled(run: &str) -> Self {
        EventLog {
            run: run.to_string(),
            file: Mutex::new(None),
            write_failed: AtomicBool::new(false),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one event line. Never fails the caller.
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        let line = serde_json::json!({
            "ts": unix_millis(),
            "run": self.run,
            "event": event,
            "data": data,
        });

        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let Some(file) = guard.as_mut() else {
            return;
        };
        let result = writeln!(file, "{line}").and_then(|_| file.flush());
        if let Err(e) = result {
            if !self.write_failed.swap(true, Ordering::Relaxed) {
                tracing::warn!(error = %e, "event log write failed; further failures suppressed");
            }
        }
    }

    /// Flush and drop the file handle. Idempotent.
    pub fn close(&self) {
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut file) = guard.take() {
            let _ = file.flush();
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_appends_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("psev-{}", std::process::id()));
        let log = EventLog::create(&dir, "run_TESTTEST").unwrap();
        log.emit("trigger", serde_json::json!({"reason": "rtt_step"}));
        log.emit("switch", serde_json::json!({"from": "cell_a", "to": "sl_a"}));
        log.close();

        let contents = std::fs::read_to_string(log.path().unwrap()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["run"], "run_TESTTEST");
        assert_eq!(first["event"], "trigger");
        assert_eq!(first["data"]["reason"], "rtt_step");
        assert!(first["ts"].as_u64().unwrap() > 0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_log_discards_silently() {
        let log = EventLog::disabled("run_TESTTEST");
        log.emit("trigger", serde_json::json!({}));
        assert!(log.path().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let log = EventLog::disabled("run_TESTTEST");
        log.close();
        log.close();
    }
}
