//! Route actuation: atomically move service traffic to a chosen uplink.
//!
//! The swap replaces the default route inside the service-IP namespace so
//! client traffic (sourced from the service VIP) egresses via the target's
//! service veth toward its gateway. The swap is only reported successful
//! after the routing state has been read back and matched exactly — an
//! unverified swap must never update `active_uplink`.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::config::UplinkConfig;
use crate::net::netlink;
use crate::net::netns::NetNs;

pub trait RouteControl: Send {
    /// Replace the service default route with the target's gateway/veth and
    /// verify by reading the route back. `Ok(())` means verified.
    fn swap_to(&self, target: &UplinkConfig) -> Result<()>;

    /// Fire-and-forget: tell the controller side to move the return route.
    fn notify_return_route(&self, uplink: &str);

    /// Fire-and-forget: advise the external router to prefer a controller.
    fn advise_controller(&self, controller: u8);
}

/// Production actuator: raw netlink inside the service namespace, plus the
/// controller-side scripts.
pub struct NetlinkRouteControl {
    service_ns: NetNs,
    return_route_script: Option<String>,
    controller_script: Option<String>,
}

impl NetlinkRouteControl {
    pub fn new(
        service_namespace: &str,
        return_route_script: Option<String>,
        controller_script: Option<String>,
    ) -> Self {
        NetlinkRouteControl {
            service_ns: NetNs::named(service_namespace),
            return_route_script,
            controller_script,
        }
    }
}

impl RouteControl for NetlinkRouteControl {
    fn swap_to(&self, target: &UplinkConfig) -> Result<()> {
        let gateway: Ipv4Addr = target
            .service_gateway
            .as_deref()
            .with_context(|| format!("uplink {} has no service gateway", target.name))?
            .parse()
            .with_context(|| format!("uplink {}: bad service gateway", target.name))?;
        let veth = target.service_veth.clone();

        self.service_ns.run(move || -> Result<()> {
            let oif = netlink::ifindex(&veth)?;
            netlink::replace_default_route(gateway, oif)?;

            // Read back and match exactly; a silent no-op is a failure.
            let installed = netlink::default_route()?;
            match installed {
                Some(route) if route.gateway == gateway && route.oif == oif => Ok(()),
                Some(route) => bail!(
                    "route readback mismatch: expected {gateway} oif {oif}, found {} oif {}",
                    route.gateway,
                    route.oif
                ),
                None => bail!("no default route after replace"),
            }
        })?
    }

    fn notify_return_route(&self, uplink: &str) {
        let Some(script) = self.return_route_script.clone() else {
            return;
        };
        let uplink = uplink.to_string();
        std::thread::spawn(move || {
            let result = std::process::Command::new(&script).arg(&uplink).status();
            match result {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%uplink, %status, "return-route script exited non-zero"),
                Err(e) => warn!(%uplink, error = %e, "return-route script failed to start"),
            }
        });
    }

    fn advise_controller(&self, controller: u8) {
        let Some(script) = self.controller_script.clone() else {
            return;
        };
        std::thread::spawn(move || {
            let result = std::process::Command::new(&script)
                .arg(controller.to_string())
                .status();
            match result {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(controller, %status, "controller-advise script exited non-zero"),
                Err(e) => warn!(controller, error = %e, "controller-advise script failed to start"),
            }
        });
    }
}

/// Actuator that accepts every swap without touching the kernel. Used by
/// `--simulate` runs and tests.
#[derive(Default)]
pub struct NoopRoute;

impl RouteControl for NoopRoute {
    fn swap_to(&self, _target: &UplinkConfig) -> Result<()> {
        Ok(())
    }

    fn notify_return_route(&self, _uplink: &str) {}

    fn advise_controller(&self, _controller: u8) {}
}
