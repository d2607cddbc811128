//! Operator command ingress.
//!
//! Commands are single-line files dropped into `RUN_DIR/cmdq/` with the
//! naming convention `<timestamp>-<id>.cmd`; they are consumed in
//! lexicographic order and deleted after processing, giving at-most-once
//! semantics. A legacy single-shot file `RUN_DIR/command` is also accepted
//! for older tooling. Parse failures still consume the file and are acked
//! as failures — a stuck command must never wedge the queue.

use std::path::{Path, PathBuf};

use pathsteer_common::command::{Command, CommandParseError};
use tracing::warn;

/// One dequeued command file, parsed or not.
#[derive(Debug)]
pub struct IngressItem {
    /// Command id (queue filename stem, or `command` for the legacy file).
    pub id: String,
    pub parsed: Result<Command, CommandParseError>,
}

pub struct CommandIngress {
    queue_dir: PathBuf,
    legacy_path: PathBuf,
}

impl CommandIngress {
    pub fn new(run_dir: &Path) -> std::io::Result<Self> {
        let queue_dir = run_dir.join("cmdq");
        std::fs::create_dir_all(&queue_dir)?;
        Ok(CommandIngress {
            queue_dir,
            legacy_path: run_dir.join("command"),
        })
    }

    /// Consume every pending command, oldest first.
    pub fn drain(&self) -> Vec<IngressItem> {
        let mut items = Vec::new();

        let mut names: Vec<PathBuf> = match std::fs::read_dir(&self.queue_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "cmd"))
                .collect(),
            Err(e) => {
                warn!(error = %e, dir = %self.queue_dir.display(), "cannot scan command queue");
                Vec::new()
            }
        };
        names.sort();

        for path in names {
            let id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            if let Some(item) = consume(&path, id) {
                items.push(item);
            }
        }

        if self.legacy_path.exists() {
            if let Some(item) = consume(&self.legacy_path, "command".to_string()) {
                items.push(item);
            }
        }

        items
    }
}

/// Read the first line of a command file and delete it.
fn consume(path: &Path, id: String) -> Option<IngressItem> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "cannot read command file");
            let _ = std::fs::remove_file(path);
            return None;
        }
    };
    if let Err(e) = std::fs::remove_file(path) {
        warn!(error = %e, path = %path.display(), "cannot delete command file");
    }

    let line = contents.lines().next().unwrap_or("");
    Some(IngressItem {
        id,
        parsed: Command::parse(line),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathsteer_common::status::Mode;

    fn temp_run_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pscmd-{}-{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn drains_in_lexicographic_order_and_deletes() {
        let run = temp_run_dir("order");
        let ingress = CommandIngress::new(&run).unwrap();
        std::fs::write(run.join("cmdq/1700000002-b.cmd"), "force:auto\n").unwrap();
        std::fs::write(run.join("cmdq/1700000001-a.cmd"), "force:cell_b\n").unwrap();

        let items = ingress.drain();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "1700000001-a");
        assert_eq!(
            items[0].parsed.as_ref().unwrap(),
            &Command::Force("cell_b".into())
        );
        assert_eq!(items[1].parsed.as_ref().unwrap(), &Command::ForceAuto);

        assert!(ingress.drain().is_empty(), "files must be consumed");
        let _ = std::fs::remove_dir_all(&run);
    }

    #[test]
    fn legacy_file_is_accepted_after_queue() {
        let run = temp_run_dir("legacy");
        let ingress = CommandIngress::new(&run).unwrap();
        std::fs::write(run.join("cmdq/1-a.cmd"), "trigger\n").unwrap();
        std::fs::write(run.join("command"), "mode:mirror\n").unwrap();

        let items = ingress.drain();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].parsed.as_ref().unwrap(), &Command::Trigger);
        assert_eq!(items[1].id, "command");
        assert_eq!(
            items[1].parsed.as_ref().unwrap(),
            &Command::SetMode(Mode::Mirror)
        );
        assert!(!run.join("command").exists());
        let _ = std::fs::remove_dir_all(&run);
    }

    #[test]
    fn unparseable_command_is_consumed_and_reported() {
        let run = temp_run_dir("bad");
        let ingress = CommandIngress::new(&run).unwrap();
        std::fs::write(run.join("cmdq/1-x.cmd"), "frobnicate\n").unwrap();

        let items = ingress.drain();
        assert_eq!(items.len(), 1);
        assert!(items[0].parsed.is_err());
        assert!(ingress.drain().is_empty());
        let _ = std::fs::remove_dir_all(&run);
    }

    #[test]
    fn non_cmd_files_are_ignored() {
        let run = temp_run_dir("ignore");
        let ingress = CommandIngress::new(&run).unwrap();
        std::fs::write(run.join("cmdq/readme.txt"), "not a command").unwrap();
        assert!(ingress.drain().is_empty());
        assert!(run.join("cmdq/readme.txt").exists());
        let _ = std::fs::remove_dir_all(&run);
    }

    #[test]
    fn only_first_line_is_parsed() {
        let run = temp_run_dir("multiline");
        let ingress = CommandIngress::new(&run).unwrap();
        std::fs::write(run.join("cmdq/1-m.cmd"), "enable:sl_a\ngarbage\n").unwrap();
        let items = ingress.drain();
        assert_eq!(
            items[0].parsed.as_ref().unwrap(),
            &Command::Enable("sl_a".into())
        );
        let _ = std::fs::remove_dir_all(&run);
    }
}
