//! Kernel networking interfaces.
//!
//! Everything that observes or mutates kernel state lives here, behind
//! traits so the engine (and the tests) never care whether the other side
//! is a netlink socket or a mock:
//!
//! - [`netns`] — run closures on a thread joined to a named network namespace
//! - [`netlink`] — raw rtnetlink route replace and readback
//! - [`route`] — the route actuator (verified default-route swap)
//! - [`mirror`] — the duplication actuator (postrouting packet mirror)

pub mod mirror;
pub mod netlink;
pub mod netns;
pub mod route;
