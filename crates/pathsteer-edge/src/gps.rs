//! GPS snapshot ingestion.
//!
//! An external collaborator writes `gps.json` with the latest fix; the
//! engine reads it at 1 Hz and attaches it to the published status. A
//! missing or malformed file keeps the previous fix — position metadata is
//! never worth disturbing the steering loop over.

use std::path::PathBuf;

use pathsteer_common::status::GpsFix;

pub const GPS_INTERVAL_MS: u64 = 1000;

pub struct GpsReader {
    path: PathBuf,
}

impl GpsReader {
    pub fn new(path: PathBuf) -> Self {
        GpsReader { path }
    }

    /// Latest fix, or `None` when the file is absent or unreadable.
    pub fn read(&self) -> Option<GpsFix> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("psgps-{}-{tag}.json", std::process::id()))
    }

    #[test]
    fn reads_a_full_fix() {
        let path = temp_path("full");
        std::fs::write(
            &path,
            r#"{"lat": 36.1, "lon": -115.2, "speed_mph": 61.0, "heading": 184.0, "fix": true}"#,
        )
        .unwrap();
        let fix = GpsReader::new(path.clone()).read().unwrap();
        assert_eq!(fix.lat, 36.1);
        assert_eq!(fix.lon, -115.2);
        assert!(fix.fix);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn partial_fields_default() {
        let path = temp_path("partial");
        std::fs::write(&path, r#"{"lat": 1.0, "lon": 2.0}"#).unwrap();
        let fix = GpsReader::new(path.clone()).read().unwrap();
        assert_eq!(fix.speed_mph, 0.0);
        assert!(!fix.fix);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_or_malformed_returns_none() {
        assert!(GpsReader::new(temp_path("missing")).read().is_none());
        let path = temp_path("bad");
        std::fs::write(&path, "nope").unwrap();
        assert!(GpsReader::new(path.clone()).read().is_none());
        let _ = std::fs::remove_file(&path);
    }
}
