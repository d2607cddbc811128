//! Status publication.
//!
//! The publisher renders a complete snapshot at 10 Hz and writes it
//! atomically (temp file, fsync, rename) so readers — the operator UI, the
//! training logger — observe either the previous or the new snapshot,
//! never a torn one. The latest snapshot is also kept in-process behind an
//! `ArcSwap` so tests and diagnostics read without touching the filesystem.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use pathsteer_common::status::StatusSnapshot;

/// Publish cadence: 10 Hz.
pub const PUBLISH_INTERVAL_MS: u64 = 100;

pub struct StatusPublisher {
    path: PathBuf,
    tmp_path: PathBuf,
    current: ArcSwapOption<StatusSnapshot>,
}

impl StatusPublisher {
    pub fn new(path: PathBuf) -> Self {
        let tmp_path = path.with_extension("json.tmp");
        StatusPublisher {
            path,
            tmp_path,
            current: ArcSwapOption::const_empty(),
        }
    }

    /// Publish one snapshot: swap the in-process copy, then rename-over the
    /// status file.
    pub fn publish(&self, snapshot: StatusSnapshot) -> std::io::Result<()> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Some(snapshot.clone()));

        let json = serde_json::to_vec_pretty(snapshot.as_ref())?;
        let mut tmp = File::create(&self.tmp_path)?;
        tmp.write_all(&json)?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&self.tmp_path, &self.path)
    }

    /// Most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.current.load_full()
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
