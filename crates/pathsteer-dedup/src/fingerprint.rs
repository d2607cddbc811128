//! Packet fingerprinting.
//!
//! The fingerprint must be identical for the two duplicated copies of a
//! packet and cheap enough for the per-packet hot path. The copies are
//! byte-identical when the edge emits them, but they traverse different
//! tunnels, so anything a router rewrites en route has to be masked out
//! before hashing.
//!
//! Hashed window: the first 64 bytes of the IP packet (or the whole packet
//! if shorter), which covers addresses, protocol, L4 ports, and the TCP
//! sequence / ICMP id+seq when present. Masked before hashing:
//!
//! - IPv4: TOS (offset 1), TTL (offset 8), header checksum (offsets 10–11)
//! - IPv6: traffic-class bits (offsets 0–1), hop limit (offset 7)
//!
//! The mixer is a splitmix-style multiply/rotate over 8-byte lanes — fast
//! and non-cryptographic by design.

/// Bytes of packet header hashed into the fingerprint.
pub const FINGERPRINT_WINDOW: usize = 64;

/// Fingerprint a decapsulated IP packet. Returns `None` for anything that
/// is not a parseable IPv4/IPv6 header; such packets bypass the gate.
pub fn fingerprint(packet: &[u8]) -> Option<u64> {
    if packet.is_empty() {
        return None;
    }

    let mut window = [0u8; FINGERPRINT_WINDOW];
    let len = packet.len().min(FINGERPRINT_WINDOW);
    window[..len].copy_from_slice(&packet[..len]);

    match packet[0] >> 4 {
        4 => {
            if packet.len() < 20 {
                return None;
            }
            window[1] = 0; // TOS/DSCP
            window[8] = 0; // TTL
            window[10] = 0; // header checksum
            window[11] = 0;
        }
        6 => {
            if packet.len() < 40 {
                return None;
            }
            window[0] &= 0xf0; // traffic class, upper nibble
            window[1] &= 0x0f; // traffic class, lower nibble
            window[7] = 0; // hop limit
        }
        _ => return None,
    }

    Some(mix64(&window[..len]))
}

/// Splitmix-style 64-bit mixer over 8-byte lanes.
pub fn mix64(bytes: &[u8]) -> u64 {
    let mut hash = 0x9e37_79b9_7f4a_7c15u64 ^ (bytes.len() as u64);
    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let lane = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        hash = mix_lane(hash, lane);
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut last = [0u8; 8];
        last[..rem.len()].copy_from_slice(rem);
        hash = mix_lane(hash, u64::from_le_bytes(last));
    }
    // Final avalanche
    hash ^= hash >> 30;
    hash = hash.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    hash ^= hash >> 27;
    hash = hash.wrapping_mul(0x94d0_49bb_1331_11eb);
    hash ^ (hash >> 31)
}

#[inline]
fn mix_lane(hash: u64, lane: u64) -> u64 {
    (hash ^ lane.wrapping_mul(0xff51_afd7_ed55_8ccd))
        .rotate_left(27)
        .wrapping_mul(0x94d0_49bb_1331_11eb)
}


#[cfg(test)]
mod tests {
    use super::testutil::udp_packet;
    use super::*;

    #[test]
    fn identical_packets_share_a_fingerprint() {
        let a = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40000, 5060, b"invite");
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).is_some());
    }

    #[test]
    fn ttl_and_checksum_rewrites_do_not_change_it() {
        let a = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40000, 5060, b"invite");
        let mut b = a.clone();
        b[8] = 9; // decremented TTL on the longer path
        b[10] = 0x12; // recomputed header checksum
        b[11] = 0x34;
        b[1] = 0x2e; // DSCP remark
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_flows_differ() {
        let a = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40000, 5060, b"x");
        let b = udp_packet([10, 0, 0, 2], [104, 204, 136, 50], 40000, 5060, b"x");
        let c = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40001, 5060, b"x");
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn payload_within_window_distinguishes_retransmits() {
        // Two UDP datagrams on the same 5-tuple with different leading
        // payload bytes are distinct packets, not duplicates.
        let a = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40000, 5060, b"aaaa");
        let b = udp_packet([10, 0, 0, 1], [104, 204, 136, 50], 40000, 5060, b"bbbb");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn bytes_past_the_window_are_ignored() {
        let mut long_a = udp_packet([10, 0, 0, 1], [1, 2, 3, 4], 1, 2, &[0u8; 100]);
        let mut long_b = long_a.clone();
        long_a[90] = 0xaa;
        long_b[90] = 0xbb;
        assert_eq!(fingerprint(&long_a), fingerprint(&long_b));
    }

    #[test]
    fn ipv6_hop_limit_is_masked() {
        let mut a = vec![0u8; 48];
        a[0] = 0x60;
        a[6] = 17; // next header: UDP
        a[7] = 64; // hop limit
        a[8..24].copy_from_slice(&[1; 16]); // src
        a[24..40].copy_from_slice(&[2; 16]); // dst
        let mut b = a.clone();
        b[7] = 12;
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).is_some());
    }

    #[test]
    fn non_ip_is_rejected() {
        assert_eq!(fingerprint(&[]), None);
        assert_eq!(fingerprint(&[0x00, 0x01, 0x02]), None);
        // Version nibble 4 but truncated header
        assert_eq!(fingerprint(&[0x45, 0, 0, 10]), None);
    }

    #[test]
    fn mixer_avalanches_single_bit_flips() {
        let a = mix64(&[0u8; 32]);
        let mut flipped = [0u8; 32];
        flipped[17] = 1;
        let b = mix64(&flipped);
        assert_ne!(a, b);
        assert!((a ^ b).count_ones() > 8, "weak avalanche: {:x}", a ^ b);
    }
}
