//! Named network-namespace entry.
//!
//! `setns(2)` rebinds the *calling thread* to a namespace, so namespace-bound
//! work runs either on a dedicated worker thread that enters once at startup
//! (probe workers) or on a short-lived scoped thread (route swaps, which are
//! rare). The namespace handle is just the iproute2 convention path
//! `/var/run/netns/<name>`.

use anyhow::{Context, Result, bail};

/// A named network namespace, iproute2-style.
#[derive(Debug, Clone)]
pub struct NetNs {
    name: String,
}

impl NetNs {
    pub fn named(name: &str) -> Self {
        NetNs {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the calling thread to this namespace. Irreversible for the
    /// thread — only call from threads dedicated to namespace work.
    #[cfg(target_os = "linux")]
    pub fn enter(&self) -> Result<()> {
        let path = format!("/var/run/netns/{}\0", self.name);
        unsafe {
            let fd = libc::open(path.as_ptr() as *const libc::c_char, libc::O_RDONLY);
            if fd < 0 {
                bail!(
                    "cannot open namespace {}: {}",
                    self.name,
                    std::io::Error::last_os_error()
                );
            }
            let rc = libc::setns(fd, libc::CLONE_NEWNET);
            let err = std::io::Error::last_os_error();
            libc::close(fd);
            if rc != 0 {
                bail!("setns({}) failed: {err}", self.name);
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enter(&self) -> Result<()> {
        bail!("network namespaces are only supported on linux")
    }

    /// Run `f` on a scoped thread joined to this namespace and return its
    /// result. Fails if the namespace cannot be entered.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        std::thread::scope(|scope| {
            scope
                .spawn(|| -> Result<T> {
                    self.enter()?;
                    Ok(f())
                })
                .join()
                .map_err(|_| anyhow::anyhow!("namespace worker thread panicked"))?
        })
        .with_context(|| format!("in namespace {}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_namespace_is_an_error() {
        let ns = NetNs::named("pathsteer-test-does-not-exist");
        let result = ns.run(|| 42);
        assert!(result.is_err());
    }

    #[test]
    fn name_round_trips() {
        assert_eq!(NetNs::named("ns-sl-a").name(), "ns-sl-a");
    }
}
