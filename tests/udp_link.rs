//! Integration tests for the UDP link.
//!
//! Each test binds real `tokio::net::UdpSocket`s on loopback.  Ticks are
//! driven from the test body with a short sleep between them so the runtime
//! can refresh socket readiness.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use tick_tcp::ack;
use tick_tcp::driver::MemorySink;
use tick_tcp::socket::UdpLink;
use tick_tcp::{Endpoint, EndpointId, EngineConfig, Link, Segment, SegmentKind};

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Two links that know each other as `A` and `B`.
async fn linked_pair() -> (UdpLink, UdpLink) {
    let mut a = UdpLink::bind(loopback()).await.expect("bind A");
    let mut b = UdpLink::bind(loopback()).await.expect("bind B");
    a.add_peer("B", b.local_addr().unwrap());
    b.add_peer("A", a.local_addr().unwrap());
    (a, b)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn segment_crosses_loopback() {
    let (mut a, mut b) = linked_pair().await;
    settle().await;

    let segment = Segment::data("A".into(), "B".into(), 7, b"payload".to_vec());
    a.send(segment.clone(), &"A".into());
    settle().await;

    assert_eq!(b.receive(&"B".into()), Some(segment));
    assert_eq!(b.receive(&"B".into()), None);
}

#[tokio::test]
async fn undecodable_datagram_is_dropped() {
    let (_, mut b) = linked_pair().await;
    let raw = UdpSocket::bind(loopback()).await.unwrap();
    raw.send_to(&[0xff, 0x00], b.local_addr().unwrap())
        .await
        .unwrap();

    let valid = ack::syn(&"A".into(), &"B".into());
    raw.send_to(&valid.encode().unwrap(), b.local_addr().unwrap())
        .await
        .unwrap();
    settle().await;

    // The garbage is skipped; the SYN behind it comes through.
    let got = b.receive(&"B".into()).expect("valid segment after garbage");
    assert_eq!(got.kind(), SegmentKind::Syn);
}

#[tokio::test]
async fn send_to_unknown_peer_is_dropped() {
    let (mut a, mut b) = linked_pair().await;
    let stray = Segment::data("A".into(), "C".into(), 0, b"x".to_vec());
    a.send(stray, &"A".into());
    settle().await;
    assert_eq!(b.receive(&EndpointId::from("B")), None);
}

#[tokio::test]
async fn loopback_transfer_completes() {
    let (mut a_link, mut b_link) = linked_pair().await;
    let config = EngineConfig {
        mss: 512,
        send_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let data: Vec<u8> = (0..20_000).map(|i| (i % 253) as u8).collect();
    let sink = MemorySink::new();
    let mut a = Endpoint::sender("A", "B", Cursor::new(data.clone()), config.clone()).unwrap();
    let mut b = Endpoint::receiver("B", "A", sink.clone(), config).unwrap();

    let deadline = Instant::now() + Duration::from_secs(30);
    while !(a.is_finished() && b.delivered_bytes().is_some()) {
        assert!(Instant::now() < deadline, "transfer did not finish");
        let now = Instant::now();
        a.on_receive_tick(&mut a_link, now).unwrap();
        a.on_send_tick(&mut a_link, now).unwrap();
        b.on_receive_tick(&mut b_link, now).unwrap();
        b.on_send_tick(&mut b_link, now).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert_eq!(sink.contents(), data);
    assert_eq!(b.delivered_bytes(), Some(data.len()));
}
