//! Tests for the in-memory transports

use super::memory::{packet_pipe, Segment};
use super::*;
use std::time::Duration;

const AC: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x01);
const HOST: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x02);
const OTHER: MacAddr = MacAddr::new(0x02, 0, 0, 0, 0, 0x03);

#[tokio::test]
async fn test_unicast_reaches_only_destination() {
    let segment = Segment::new();
    let ac = segment.attach(AC);
    let host = segment.attach(HOST);
    let other = segment.attach(OTHER);

    host.send_to(b"hello", 0x8863, AC).await.unwrap();

    let frame = ac.recv_from().await.unwrap();
    assert_eq!(frame.src, HOST);
    assert_eq!(frame.ethertype, 0x8863);
    assert_eq!(&frame.payload[..], b"hello");

    other
        .set_read_deadline(Some(Instant::now() + Duration::from_millis(10)))
        .unwrap();
    assert!(other.recv_from().await.unwrap_err().is_timeout());
}

#[tokio::test]
async fn test_broadcast_skips_sender() {
    let segment = Segment::new();
    let ac = segment.attach(AC);
    let host = segment.attach(HOST);
    let other = segment.attach(OTHER);

    host.send_to(b"padi", 0x8863, MacAddr::BROADCAST)
        .await
        .unwrap();

    assert_eq!(ac.recv_from().await.unwrap().src, HOST);
    assert_eq!(other.recv_from().await.unwrap().src, HOST);

    host.set_read_deadline(Some(Instant::now() + Duration::from_millis(10)))
        .unwrap();
    assert!(matches!(
        host.recv_from().await,
        Err(TransportError::Timeout)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_read_deadline_cleared() {
    let segment = Segment::new();
    let ac = segment.attach(AC);
    let host = segment.attach(HOST);

    host.set_read_deadline(Some(Instant::now() + Duration::from_secs(1)))
        .unwrap();
    assert!(host.recv_from().await.unwrap_err().is_timeout());

    host.set_read_deadline(None).unwrap();
    let reader = tokio::spawn(async move { host.recv_from().await });
    tokio::time::sleep(Duration::from_secs(5)).await;
    ac.send_to(b"late", 0x8864, HOST).await.unwrap();

    let frame = reader.await.unwrap().unwrap();
    assert_eq!(&frame.payload[..], b"late");
}

#[tokio::test]
async fn test_shutdown_fails_operations() {
    let segment = Segment::new();
    let host = segment.attach(HOST);
    assert_eq!(segment.stations(), 1);

    host.shutdown();
    assert_eq!(segment.stations(), 0);
    assert!(matches!(
        host.send_to(b"x", 0x8863, AC).await,
        Err(TransportError::ConnectionClosed)
    ));
    assert!(matches!(
        host.recv_from().await,
        Err(TransportError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_drop_detaches_only_own_station() {
    let segment = Segment::new();
    let first = segment.attach(HOST);
    let second = segment.attach(HOST);
    drop(first);

    assert_eq!(segment.stations(), 1);
    let ac = segment.attach(AC);
    ac.send_to(b"still here", 0x8864, HOST).await.unwrap();
    assert_eq!(&second.recv_from().await.unwrap().payload[..], b"still here");
}

#[tokio::test]
async fn test_packet_pipe_roundtrip_and_truncation() {
    let (a, b) = packet_pipe(4);

    a.write_to(&[1, 2, 3, 4, 5], None).await.unwrap();

    let mut small = [0u8; 3];
    let (n, ()) = b.read_from(&mut small).await.unwrap();
    assert_eq!(n, 3);
    assert_eq!(small, [1, 2, 3]);
}

#[tokio::test]
async fn test_packet_pipe_close() {
    let (a, b) = packet_pipe(4);
    a.close().await.unwrap();

    assert!(matches!(
        a.write_to(b"x", None).await,
        Err(TransportError::ConnectionClosed)
    ));
    let mut buf = [0u8; 8];
    assert!(matches!(
        b.read_from(&mut buf).await,
        Err(TransportError::ConnectionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_set_deadline_applies_to_reads() {
    let (_a, b) = packet_pipe(1);
    b.set_deadline(Some(Instant::now() + Duration::from_millis(500)))
        .unwrap();

    let mut buf = [0u8; 8];
    assert!(b.read_from(&mut buf).await.unwrap_err().is_timeout());
}

#[tokio::test]
async fn test_arc_forwards_ether_conn() {
    let segment = Segment::new();
    let ac = Arc::new(segment.attach(AC));
    let host = segment.attach(HOST);

    host.send_to(b"via arc", 0x8863, AC).await.unwrap();
    assert_eq!(EtherConn::local_addr(&ac), AC);
    assert_eq!(&ac.recv_from().await.unwrap().payload[..], b"via arc");
}

#[tokio::test(start_paused = true)]
async fn test_expired_write_deadline_fails_send() {
    let segment = Segment::new();
    let ac = segment.attach(AC);
    let host = segment.attach(HOST);

    host.set_write_deadline(Some(Instant::now() + Duration::from_millis(100)))
        .unwrap();
    host.send_to(b"early", 0x8863, AC).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(host
        .send_to(b"late", 0x8863, AC)
        .await
        .unwrap_err()
        .is_timeout());

    host.set_write_deadline(None).unwrap();
    host.send_to(b"again", 0x8863, AC).await.unwrap();
    assert_eq!(&ac.recv_from().await.unwrap().payload[..], b"early");
    assert_eq!(&ac.recv_from().await.unwrap().payload[..], b"again");
}
