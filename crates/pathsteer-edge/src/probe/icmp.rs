//! ICMP echo prober.
//!
//! Uses unprivileged ICMP datagram sockets (`SOCK_DGRAM`/`IPPROTO_ICMP`) so
//! no raw-socket capability is needed; the kernel assigns and matches the
//! echo identifier. LTE probes bind the raw physical interface with
//! `SO_BINDTODEVICE` to measure the radio leg outside the tunnel; SAT and
//! fiber probes run on a worker thread joined to the uplink's namespace.
//!
//! A probe failure of any flavor (socket, send, timeout, mismatched reply)
//! is just a miss — the aggregator turns patterns of misses into state.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU16, Ordering};

use crate::net::netns::NetNs;
use crate::probe::{PROBE_TIMEOUT, ProbeOutcome, Prober};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ECHO_PAYLOAD: &[u8; 8] = b"pathstr\0";

pub struct IcmpProber {
    target: Ipv4Addr,
    bind_iface: Option<String>,
    netns: Option<NetNs>,
    seq: AtomicU16,
}

impl IcmpProber {
    /// Probe bound to a physical interface (the LTE radio-leg probe).
    pub fn bound_to_iface(target: Ipv4Addr, iface: &str) -> Self {
        IcmpProber {
            target,
            bind_iface: Some(iface.to_string()),
            netns: None,
            seq: AtomicU16::new(1),
        }
    }

    /// Probe run inside an uplink's namespace (SAT / fiber).
    pub fn in_namespace(target: Ipv4Addr, namespace: &str) -> Self {
        IcmpProber {
            target,
            bind_iface: None,
            netns: Some(NetNs::named(namespace)),
            seq: AtomicU16::new(1),
        }
    }

    /// Plain probe in the current namespace.
    pub fn plain(target: Ipv4Addr) -> Self {
        IcmpProber {
            target,
            bind_iface: None,
            netns: None,
            seq: AtomicU16::new(1),
        }
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Prober for IcmpProber {
    fn setup(&self) -> anyhow::Result<()> {
        match &self.netns {
            Some(ns) => ns.enter(),
            None => Ok(()),
        }
    }

    fn probe(&self) -> ProbeOutcome {
        echo_once(self.target, self.bind_iface.as_deref(), self.next_seq())
    }
}

/// Build an echo request. The identifier is left zero: datagram ICMP
/// sockets get a kernel-assigned id stamped on send and filtered on
/// receive, so only the sequence number needs matching.
pub fn build_echo_request(seq: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + ECHO_PAYLOAD.len());
    packet.push(ICMP_ECHO_REQUEST);
    packet.push(0); // code
    packet.extend_from_slice(&[0, 0]); // checksum, patched below
    packet.extend_from_slice(&[0, 0]); // identifier (kernel-assigned)
    packet.extend_from_slice(&seq.to_be_bytes());
    packet.extend_from_slice(ECHO_PAYLOAD);
    let sum = internet_checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// RFC 1071 internet checksum.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Check a received datagram for the matching echo reply.
pub fn is_matching_reply(packet: &[u8], seq: u16) -> bool {
    packet.len() >= 8
        && packet[0] == ICMP_ECHO_REPLY
        && packet[1] == 0
        && u16::from_be_bytes([packet[6], packet[7]]) == seq
}

#[cfg(target_os = "linux")]
fn echo_once(target: Ipv4Addr, bind_iface: Option<&str>, seq: u16) -> ProbeOutcome {
    unsafe {
        let fd = libc::socket(
            libc::AF_INET,
            libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
            libc::IPPROTO_ICMP,
        );
        if fd < 0 {
            return ProbeOutcome::miss();
        }

        let timeout = libc::timeval {
            tv_sec: PROBE_TIMEOUT.as_secs() as libc::time_t,
            tv_usec: 0,
        };
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &timeout as *const libc::timeval as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        );

        if let Some(iface) = bind_iface {
            let bytes = iface.as_bytes();
            let rc = libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_BINDTODEVICE,
                bytes.as_ptr() as *const libc::c_void,
                bytes.len() as libc::socklen_t,
            );
            if rc != 0 {
                libc::close(fd);
                return ProbeOutcome::miss();
            }
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            sin_addr: libc::in_addr {
                s_addr: u32::from_be_bytes(target.octets()).to_be(),
            },
            sin_zero: [0; 8],
        };

        let request = build_echo_request(seq);
        let started = quanta::Instant::now();
        let sent = libc::sendto(
            fd,
            request.as_ptr() as *const libc::c_void,
            request.len(),
            0,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if sent < 0 {
            libc::close(fd);
            return ProbeOutcome::miss();
        }

        // Drain until the matching reply or the receive timeout.
        let mut buf = [0u8; 512];
        loop {
            if started.elapsed() >= PROBE_TIMEOUT {
                libc::close(fd);
                return ProbeOutcome::miss();
            }
            let n = libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0);
            if n < 0 {
                libc::close(fd);
                return ProbeOutcome::miss();
            }
            if is_matching_reply(&buf[..n as usize], seq) {
                let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;
                libc::close(fd);
                return ProbeOutcome {
                    success: true,
                    rtt_ms,
                };
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn echo_once(_target: Ipv4Addr, _bind_iface: Option<&str>, _seq: u16) -> ProbeOutcome {
    ProbeOutcome::miss()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_request_shape() {
        let packet = build_echo_request(7);
        assert_eq!(packet.len(), 16);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        assert_eq!(u16::from_be_bytes([packet[6], packet[7]]), 7);
        // Checksum over the whole packet must verify to zero
        assert_eq!(internet_checksum(&packet), 0);
    }

    #[test]
    fn checksum_known_vector() {
        // RFC 1071 example bytes
        let data = [0x00u8, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2u16);
    }

    #[test]
    fn checksum_handles_odd_length() {
        let even = internet_checksum(&[0xab, 0xcd]);
        let odd = internet_checksum(&[0xab, 0xcd, 0xef]);
        assert_ne!(even, odd);
    }

    #[test]
    fn reply_matching() {
        let mut reply = build_echo_request(3);
        assert!(!is_matching_reply(&reply, 3), "request type is not a reply");
        reply[0] = ICMP_ECHO_REPLY;
        assert!(is_matching_reply(&reply, 3));
        assert!(!is_matching_reply(&reply, 4), "wrong seq");
        assert!(!is_matching_reply(&reply[..4], 3), "truncated");
    }

    #[test]
    fn seq_increments_per_probe() {
        let prober = IcmpProber::plain(Ipv4Addr::LOCALHOST);
        let a = prober.next_seq();
        let b = prober.next_seq();
        assert_eq!(b, a.wrapping_add(1));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn probe_returns_within_deadline() {
        // Unroutable TEST-NET-1 address: the probe must come back as a miss
        // within the hard deadline rather than hang.
        let started = std::time::Instant::now();
        let outcome = echo_once(Ipv4Addr::new(192, 0, 2, 1), None, 1);
        assert!(started.elapsed() < PROBE_TIMEOUT + std::time::Duration::from_millis(500));
        if outcome.success {
            assert!(outcome.rtt_ms > 0.0);
        }
    }
}
