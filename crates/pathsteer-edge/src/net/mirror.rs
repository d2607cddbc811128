//! Duplication actuation: mirror service egress onto the backup uplink.
//!
//! While enabled, every packet leaving the active uplink's service veth is
//! also emitted toward the backup's gateway with source and destination
//! unchanged (pre-tunnel), so both copies reach the controller bearing the
//! same 5-tuple and the dedup gate forwards exactly one.
//!
//! The rule is a postrouting `dup` statement installed in the service
//! namespace. Install and teardown are idempotent: enable rebuilds the
//! table from scratch, disable tolerates an absent table. Install failure
//! is reported but not fatal — protection proceeds unmirrored.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::config::UplinkConfig;

pub trait MirrorControl: Send {
    /// Mirror egress from `active`'s service veth onto `backup`. Idempotent.
    fn enable(&self, active: &UplinkConfig, backup: &UplinkConfig) -> Result<()>;

    /// Tear the mirror down. Idempotent.
    fn disable(&self) -> Result<()>;
}

const TABLE: &str = "pathsteer";
const CHAIN: &str = "mirror";

/// Production actuator: an nftables `dup` rule in the service namespace.
pub struct NftMirror {
    service_namespace: String,
}

impl NftMirror {
    pub fn new(service_namespace: &str) -> Self {
        NftMirror {
            service_namespace: service_namespace.to_string(),
        }
    }

    fn run_nft(&self, script: &str) -> Result<()> {
        let mut child = Command::new("ip")
            .args(["netns", "exec", &self.service_namespace, "nft", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("cannot spawn nft")?;
        child
            .stdin
            .take()
            .context("nft stdin unavailable")?
            .write_all(script.as_bytes())
            .context("cannot write nft script")?;
        let output = child.wait_with_output().context("nft did not exit")?;
        if !output.status.success() {
            bail!(
                "nft exited {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl MirrorControl for NftMirror {
    fn enable(&self, active: &UplinkConfig, backup: &UplinkConfig) -> Result<()> {
        let backup_gw = backup
            .service_gateway
            .as_deref()
            .with_context(|| format!("backup uplink {} has no service gateway", backup.name))?;

        // Rebuild from scratch so repeated enables converge on one rule.
        let script = format!(
            "table inet {TABLE}\n\
             delete table inet {TABLE}\n\
             table inet {TABLE} {{\n\
             \tchain {CHAIN} {{\n\
             \t\ttype filter hook postrouting priority mangle; policy accept;\n\
             \t\toifname \"{active_veth}\" dup to {backup_gw} device \"{backup_veth}\"\n\
             \t}}\n\
             }}\n",
            active_veth = active.service_veth,
            backup_veth = backup.service_veth,
        );
        self.run_nft(&script)
    }

    fn disable(&self) -> Result<()> {
        // Declare-then-delete tolerates the table not existing.
        let script = format!("table inet {TABLE}\ndelete table inet {TABLE}\n");
        if let Err(e) = self.run_nft(&script) {
            warn!(error = %e, "mirror teardown reported an error");
        }
        Ok(())
    }
}

/// Actuator that installs nothing. Used by `--simulate` runs and tests.
#[derive(Default)]
pub struct NoopMirror;

impl MirrorControl for NoopMirror {
    fn enable(&self, _active: &UplinkConfig, _backup: &UplinkConfig) -> Result<()> {
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        Ok(())
    }
}
