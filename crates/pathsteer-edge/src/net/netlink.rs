//! Minimal rtnetlink client for default-route management.
//!
//! Only what the route actuator needs: `RTM_NEWROUTE` with replace
//! semantics, and an `RTM_GETROUTE` dump to read the installed state back
//! for verification. Message building and parsing are pure functions over
//! byte buffers so they can be tested without a socket; the socket itself
//! is a thin wrapper over `libc`.
//!
//! All header fields are host byte order per netlink convention; addresses
//! are carried as raw network-order octets.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};

// rtnetlink constants libc does not export.
const RTM_NEWROUTE: u16 = 24;
const RTM_GETROUTE: u16 = 26;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_REPLACE: u16 = 0x0100;
const NLM_F_CREATE: u16 = 0x0400;
const NLM_F_DUMP: u16 = 0x0300;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;
const RT_TABLE_MAIN: u8 = 254;
const RTN_UNICAST: u8 = 1;
const RTPROT_BOOT: u8 = 3;
const RT_SCOPE_UNIVERSE: u8 = 0;

const NLMSG_HDRLEN: usize = 16;
const RTMSG_LEN: usize = 12;
const RTA_HDRLEN: usize = 4;

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// A default route as read back from the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRoute {
    pub gateway: Ipv4Addr,
    pub oif: u32,
}

// ─── Message building ───────────────────────────────────────────────

fn put_header(buf: &mut Vec<u8>, msg_type: u16, flags: u16, seq: u32) {
    buf.extend_from_slice(&0u32.to_ne_bytes()); // length, patched below
    buf.extend_from_slice(&msg_type.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // pid: kernel fills it
}

fn put_rtmsg(buf: &mut Vec<u8>, dst_len: u8, table: u8, protocol: u8, scope: u8, rtype: u8) {
    buf.push(libc::AF_INET as u8);
    buf.push(dst_len);
    buf.push(0); // src_len
    buf.push(0); // tos
    buf.push(table);
    buf.push(protocol);
    buf.push(scope);
    buf.push(rtype);
    buf.extend_from_slice(&0u32.to_ne_bytes()); // flags
}

fn put_rtattr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
    let len = (RTA_HDRLEN + payload.len()) as u16;
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf.extend_from_slice(payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn patch_length(buf: &mut [u8]) {
    let len = buf.len() as u32;
    buf[0..4].copy_from_slice(&len.to_ne_bytes());
}

/// `RTM_NEWROUTE` replacing the IPv4 default route in the main table.
pub fn build_replace_request(gateway: Ipv4Addr, oif: u32, seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    put_header(
        &mut buf,
        RTM_NEWROUTE,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
        seq,
    );
    put_rtmsg(
        &mut buf,
        0, // dst_len 0: the default route
        RT_TABLE_MAIN,
        RTPROT_BOOT,
        RT_SCOPE_UNIVERSE,
        RTN_UNICAST,
    );
    put_rtattr(&mut buf, RTA_GATEWAY, &gateway.octets());
    put_rtattr(&mut buf, RTA_OIF, &oif.to_ne_bytes());
    patch_length(&mut buf);
    buf
}

/// `RTM_GETROUTE` dump of the IPv4 routing table.
pub fn build_dump_request(seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    put_header(&mut buf, RTM_GETROUTE, NLM_F_REQUEST | NLM_F_DUMP, seq);
    put_rtmsg(&mut buf, 0, 0, 0, 0, 0);
    patch_length(&mut buf);
    buf
}

// ─── Message parsing ────────────────────────────────────────────────

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_ne_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Find the ACK (an `NLMSG_ERROR` with error 0) in a reply buffer.
pub fn parse_ack(buf: &[u8]) -> Result<()> {
    let mut off = 0;
    while off + NLMSG_HDRLEN <= buf.len() {
        let msg_len = read_u32(buf, off) as usize;
        if msg_len < NLMSG_HDRLEN || off + msg_len > buf.len() {
            bail!("truncated netlink reply");
        }
        let msg_type = read_u16(buf, off + 4);
        if msg_type == NLMSG_ERROR {
            if msg_len < NLMSG_HDRLEN + 4 {
                bail!("truncated netlink error message");
            }
            let errno = i32::from_ne_bytes([
                buf[off + NLMSG_HDRLEN],
                buf[off + NLMSG_HDRLEN + 1],
                buf[off + NLMSG_HDRLEN + 2],
                buf[off + NLMSG_HDRLEN + 3],
            ]);
            if errno == 0 {
                return Ok(());
            }
            bail!(
                "netlink error: {}",
                std::io::Error::from_raw_os_error(-errno)
            );
        }
        off += align4(msg_len);
    }
    bail!("no ack in netlink reply")
}

/// Extract IPv4 default routes (main table) from a dump reply. Returns
/// `true` when `NLMSG_DONE` was seen (the dump is complete).
pub fn parse_route_dump(buf: &[u8], routes: &mut Vec<DefaultRoute>) -> Result<bool> {
    let mut off = 0;
    while off + NLMSG_HDRLEN <= buf.len() {
        let msg_len = read_u32(buf, off) as usize;
        if msg_len < NLMSG_HDRLEN || off + msg_len > buf.len() {
            bail!("truncated netlink dump");
        }
        let msg_type = read_u16(buf, off + 4);
        match msg_type {
            NLMSG_DONE => return Ok(true),
            NLMSG_ERROR => {
                if msg_len < NLMSG_HDRLEN + 4 {
                    bail!("truncated netlink error message");
                }
                let errno = i32::from_ne_bytes([
                    buf[off + NLMSG_HDRLEN],
                    buf[off + NLMSG_HDRLEN + 1],
                    buf[off + NLMSG_HDRLEN + 2],
                    buf[off + NLMSG_HDRLEN + 3],
                ]);
                bail!(
                    "netlink dump error: {}",
                    std::io::Error::from_raw_os_error(-errno)
                );
            }
            RTM_NEWROUTE if msg_len >= NLMSG_HDRLEN + RTMSG_LEN => {
                let body = &buf[off + NLMSG_HDRLEN..off + msg_len];
                if let Some(route) = parse_route_msg(body) {
                    routes.push(route);
                }
            }
            _ => {}
        }
        off += align4(msg_len);
    }
    Ok(false)
}

fn parse_route_msg(body: &[u8]) -> Option<DefaultRoute> {
    let family = body[0];
    let dst_len = body[1];
    let table = body[4];
    if family != libc::AF_INET as u8 || dst_len != 0 || table != RT_TABLE_MAIN {
        return None;
    }

    let mut gateway = None;
    let mut oif = None;
    let mut off = RTMSG_LEN;
    while off + RTA_HDRLEN <= body.len() {
        let rta_len = read_u16(body, off) as usize;
        if rta_len < RTA_HDRLEN || off + rta_len > body.len() {
            break;
        }
        let rta_type = read_u16(body, off + 2);
        let payload = &body[off + RTA_HDRLEN..off + rta_len];
        match rta_type {
            RTA_GATEWAY if payload.len() == 4 => {
                gateway = Some(Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]));
            }
            RTA_OIF if payload.len() == 4 => {
                oif = Some(u32::from_ne_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]));
            }
            _ => {}
        }
        off += align4(rta_len);
    }

    Some(DefaultRoute {
        gateway: gateway?,
        oif: oif?,
    })
}

// ─── Socket operations (linux) ──────────────────────────────────────

#[cfg(target_os = "linux")]
mod sys {
    use super::*;

    struct NetlinkSocket {
        fd: libc::c_int,
    }

    impl NetlinkSocket {
        fn open() -> Result<Self> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_NETLINK,
                    libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                    libc::NETLINK_ROUTE,
                )
            };
            if fd < 0 {
                bail!(
                    "cannot open netlink socket: {}",
                    std::io::Error::last_os_error()
                );
            }
            Ok(NetlinkSocket { fd })
        }

        fn send(&self, msg: &[u8]) -> Result<()> {
            let rc = unsafe { libc::send(self.fd, msg.as_ptr() as *const libc::c_void, msg.len(), 0) };
            if rc < 0 {
                bail!("netlink send failed: {}", std::io::Error::last_os_error());
            }
            Ok(())
        }

        fn recv(&self, buf: &mut [u8]) -> Result<usize> {
            let rc =
                unsafe { libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
            if rc < 0 {
                bail!("netlink recv failed: {}", std::io::Error::last_os_error());
            }
            Ok(rc as usize)
        }
    }

    impl Drop for NetlinkSocket {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    /// Replace the IPv4 default route in the calling thread's namespace.
    pub fn replace_default_route(gateway: Ipv4Addr, oif: u32) -> Result<()> {
        let sock = NetlinkSocket::open()?;
        sock.send(&build_replace_request(gateway, oif, 1))?;
        let mut buf = vec![0u8; 4096];
        let n = sock.recv(&mut buf)?;
        parse_ack(&buf[..n]).context("route replace not acknowledged")
    }

    /// Read the IPv4 default route in the calling thread's namespace.
    pub fn default_route() -> Result<Option<DefaultRoute>> {
        let sock = NetlinkSocket::open()?;
        sock.send(&build_dump_request(2))?;
        let mut routes = Vec::new();
        let mut buf = vec![0u8; 32 * 1024];
        loop {
            let n = sock.recv(&mut buf)?;
            if n == 0 {
                break;
            }
            if parse_route_dump(&buf[..n], &mut routes)? {
                break;
            }
        }
        Ok(routes.into_iter().next())
    }

    /// Interface index by name, in the calling thread's namespace.
    pub fn ifindex(name: &str) -> Result<u32> {
        let cname = std::ffi::CString::new(name).context("interface name contains NUL")?;
        let idx = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if idx == 0 {
            bail!("no such interface: {name}");
        }
        Ok(idx)
    }
}

#[cfg(target_os = "linux")]
pub use sys::{default_route, ifindex, replace_default_route};

#[cfg(not(target_os = "linux"))]
pub fn replace_default_route(_gateway: Ipv4Addr, _oif: u32) -> Result<()> {
    bail!("netlink is only supported on linux")
}

#[cfg(not(target_os = "linux"))]
pub fn default_route() -> Result<Option<DefaultRoute>> {
    bail!("netlink is only supported on linux")
}

#[cfg(not(target_os = "linux"))]
pub fn ifindex(_name: &str) -> Result<u32> {
    bail!("netlink is only supported on linux")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_request_shape() {
        let buf = build_replace_request(Ipv4Addr::new(10, 200, 2, 1), 7, 1);
        // Header length matches the buffer
        assert_eq!(read_u32(&buf, 0) as usize, buf.len());
        assert_eq!(read_u16(&buf, 4), RTM_NEWROUTE);
        let flags = read_u16(&buf, 6);
        assert_ne!(flags & NLM_F_REPLACE, 0);
        assert_ne!(flags & NLM_F_CREATE, 0);
        // rtmsg: default route in the main table
        assert_eq!(buf[NLMSG_HDRLEN], libc::AF_INET as u8);
        assert_eq!(buf[NLMSG_HDRLEN + 1], 0);
        assert_eq!(buf[NLMSG_HDRLEN + 4], RT_TABLE_MAIN);
    }

    #[test]
    fn dump_request_shape() {
        let buf = build_dump_request(2);
        assert_eq!(read_u32(&buf, 0) as usize, buf.len());
        assert_eq!(read_u16(&buf, 4), RTM_GETROUTE);
        assert_eq!(read_u16(&buf, 6), NLM_F_REQUEST | NLM_F_DUMP);
    }

    /// Build a synthetic kernel reply with one route message.
    fn synthetic_route_reply(dst_len: u8, table: u8, gw: [u8; 4], oif: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        put_header(&mut buf, RTM_NEWROUTE, 0, 9);
        buf.push(libc::AF_INET as u8);
        buf.push(dst_len);
        buf.extend_from_slice(&[0, 0]);
        buf.push(table);
        buf.extend_from_slice(&[RTPROT_BOOT, RT_SCOPE_UNIVERSE, RTN_UNICAST]);
        buf.extend_from_slice(&0u32.to_ne_bytes());
        put_rtattr(&mut buf, RTA_GATEWAY, &gw);
        put_rtattr(&mut buf, RTA_OIF, &oif.to_ne_bytes());
        patch_length(&mut buf);
        buf
    }

    fn done_message() -> Vec<u8> {
        let mut buf = Vec::new();
        put_header(&mut buf, NLMSG_DONE, 0, 9);
        buf.extend_from_slice(&0u32.to_ne_bytes());
        patch_length(&mut buf);
        buf
    }

    #[test]
    fn parses_default_route_from_dump() {
        let mut reply = synthetic_route_reply(0, RT_TABLE_MAIN, [10, 200, 2, 1], 7);
        reply.extend_from_slice(&done_message());

        let mut routes = Vec::new();
        let done = parse_route_dump(&reply, &mut routes).unwrap();
        assert!(done);
        assert_eq!(
            routes,
            vec![DefaultRoute {
                gateway: Ipv4Addr::new(10, 200, 2, 1),
                oif: 7
            }]
        );
    }

    #[test]
    fn non_default_routes_are_ignored() {
        let mut reply = synthetic_route_reply(24, RT_TABLE_MAIN, [10, 200, 2, 1], 7);
        reply.extend_from_slice(&synthetic_route_reply(0, 100, [10, 0, 0, 1], 3));
        reply.extend_from_slice(&done_message());

        let mut routes = Vec::new();
        parse_route_dump(&reply, &mut routes).unwrap();
        assert!(routes.is_empty(), "prefix routes and other tables ignored");
    }

    #[test]
    fn ack_with_zero_errno_is_ok() {
        let mut buf = Vec::new();
        put_header(&mut buf, NLMSG_ERROR, 0, 1);
        buf.extend_from_slice(&0i32.to_ne_bytes());
        patch_length(&mut buf);
        assert!(parse_ack(&buf).is_ok());
    }

    #[test]
    fn ack_with_errno_is_err() {
        let mut buf = Vec::new();
        put_header(&mut buf, NLMSG_ERROR, 0, 1);
        buf.extend_from_slice(&(-(libc::EEXIST)).to_ne_bytes());
        patch_length(&mut buf);
        assert!(parse_ack(&buf).is_err());
    }

    #[test]
    fn truncated_reply_is_err() {
        let buf = [1u8, 2, 3];
        assert!(parse_ack(&buf).is_err());
    }
}
