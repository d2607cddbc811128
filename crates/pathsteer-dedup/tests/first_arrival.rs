//! End-to-end first-arrival gating across two tunnel inputs.

use std::net::UdpSocket;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use pathsteer_dedup::engine::DedupEngine;
use pathsteer_dedup::table::{FlowTable, Verdict};

/// Minimal IPv4/UDP packet with a distinguishing payload.
fn udp_packet(seq: u32) -> Vec<u8> {
    let payload = seq.to_be_bytes();
    let total_len = 20 + 8 + payload.len();
    let mut p = vec![0u8; total_len];
    p[0] = 0x45;
    p[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    p[8] = 64; // TTL
    p[9] = 17; // UDP
    p[12..16].copy_from_slice(&[10, 0, 0, 1]);
    p[16..20].copy_from_slice(&[104, 204, 136, 50]);
    p[20..22].copy_from_slice(&40_000u16.to_be_bytes());
    p[22..24].copy_from_slice(&5_060u16.to_be_bytes());
    p[24..26].copy_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    p[28..32].copy_from_slice(&payload);
    p
}

/// A duplicated stream over two tunnels: every packet of the flow arrives
/// twice, interleaved; exactly one copy of each is forwarded.
#[test]
fn duplicated_stream_over_two_tunnels() {
    const PACKETS: u32 = 500;

    let mut engine = DedupEngine::with_defaults();
    let in_a = engine.add_input("127.0.0.1:0".parse().unwrap()).unwrap();
    let in_b = engine.add_input("127.0.0.1:0".parse().unwrap()).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    for seq in 0..PACKETS {
        let packet = udp_packet(seq);
        sender.send_to(&packet, in_a).unwrap();
        sender.send_to(&packet, in_b).unwrap();
    }

    // Drain the output until all first arrivals are through.
    let mut forwarded = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while forwarded.len() < PACKETS as usize && Instant::now() < deadline {
        if let Ok(packet) = engine.output_rx.recv_timeout(Duration::from_millis(200)) {
            forwarded.push(packet);
        }
    }

    assert_eq!(forwarded.len(), PACKETS as usize, "one copy per packet");
    assert!(
        engine
            .output_rx
            .recv_timeout(Duration::from_millis(300))
            .is_err(),
        "no second copies"
    );

    let stats = engine.stats();
    assert_eq!(stats.total.load(Ordering::Relaxed), u64::from(PACKETS) * 2);
    assert_eq!(stats.forwarded.load(Ordering::Relaxed), u64::from(PACKETS));
    assert_eq!(
        stats.duplicates_dropped.load(Ordering::Relaxed),
        u64::from(PACKETS)
    );

    engine.shutdown();
}

/// Forwarded packets egress byte-identical to what arrived — the gate must
/// never rewrite anything.
#[test]
fn forwarded_packets_are_unchanged() {
    let mut engine = DedupEngine::with_defaults();
    let input = engine.add_input("127.0.0.1:0".parse().unwrap()).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

    let packet = udp_packet(7);
    sender.send_to(&packet, input).unwrap();

    let out = engine
        .output_rx
        .recv_timeout(Duration::from_secs(2))
        .unwrap();
    assert_eq!(&out[..], &packet[..]);

    engine.shutdown();
}

/// The same fingerprint re-arriving after the TTL is a fresh first arrival.
#[test]
fn ttl_expiry_readmits_via_process() {
    let engine = DedupEngine::new(FlowTable::new(1024, Duration::from_millis(50)));
    let packet = udp_packet(1);

    assert_eq!(engine.process(&packet, 1_000), Verdict::Forward);
    assert_eq!(engine.process(&packet, 1_010), Verdict::Duplicate);
    // Pair completed and a new transmission starts later
    assert_eq!(engine.process(&packet, 1_200), Verdict::Forward);
}
