//! Queue behaviour with the background tasks running.

use rust_divert_common::checksum::checksum16;
use rust_divert_common::metrics::DivertMetrics;
use rust_divert_common::types::{Address, ChecksumFixup, ChecksumOffload, Direction};
use rust_divert_common::Error;
use rust_divert_queue::{DiversionQueue, EnqueueStatus, QueueTasks, QueuedPacket};
use std::sync::Arc;
use std::time::Duration;

fn inbound(tag: u8) -> QueuedPacket {
    QueuedPacket::copy_from(
        &[tag; 8],
        Address::new(Direction::Inbound, 1, 0),
        ChecksumFixup::default(),
    )
    .unwrap()
}

fn new_queue() -> Arc<DiversionQueue> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(DiversionQueue::new(Arc::new(DivertMetrics::new())))
}

/// IPv4/UDP with a stale header checksum.
fn outbound_udp() -> Vec<u8> {
    let mut pkt = vec![
        0x45, 0, 0, 32, 0, 1, 0x40, 0, 64, 17, 0xde, 0xad, 10, 0, 0, 1, 10, 0, 0, 2,
    ];
    pkt.extend_from_slice(&[0x30, 0x39, 0, 53, 0, 12, 0xbe, 0xef, b'p', b'i', b'n', b'g']);
    pkt
}

#[tokio::test]
async fn overflow_keeps_the_newest_n() {
    let queue = new_queue();
    queue.set_max_length(4).unwrap();

    for tag in 1..=5u8 {
        assert!(queue.enqueue(inbound(tag)).is_accepted());
    }

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(queue.recv(64).await.unwrap().data[0]);
    }
    assert_eq!(seen, vec![2, 3, 4, 5]);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn waiting_reader_is_woken_by_enqueue() {
    let queue = new_queue();
    let tasks = QueueTasks::spawn(Arc::clone(&queue));

    let reader = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.recv(1500).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queue.pending_reads(), 1);

    assert_eq!(queue.enqueue(inbound(7)), EnqueueStatus::Queued);
    let got = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .expect("reader timed out")
        .unwrap()
        .unwrap();
    assert_eq!(got.data.as_ref(), &[7u8; 8]);
    assert_eq!(got.address.direction, Direction::Inbound);

    queue.drain_all();
    tasks.shutdown().await;
}

#[tokio::test]
async fn readers_are_served_in_order() {
    let queue = new_queue();
    let first = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.recv(64).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.recv(64).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    queue.enqueue(inbound(1));
    queue.enqueue(inbound(2));

    assert_eq!(first.await.unwrap().unwrap().data[0], 1);
    assert_eq!(second.await.unwrap().unwrap().data[0], 2);
}

#[tokio::test]
async fn teardown_fails_pending_reads() {
    let queue = new_queue();
    let tasks = QueueTasks::spawn(Arc::clone(&queue));
    let reader = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.recv(64).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.drain_all();
    let result = reader.await.unwrap();
    assert!(matches!(result, Err(Error::QueueShuttingDown)));
    assert_eq!(queue.enqueue(inbound(1)), EnqueueStatus::ShuttingDown);
    assert!(matches!(queue.recv(64).await, Err(Error::QueueShuttingDown)));

    tasks.shutdown().await;
}

#[tokio::test]
async fn sweeper_evicts_unread_packets() {
    let queue = new_queue();
    queue.set_sweep_interval(128).unwrap();
    let tasks = QueueTasks::spawn(Arc::clone(&queue));

    queue.enqueue(inbound(1));
    // Lifetime is between one and two periods.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(queue.len(), 1);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(queue.len(), 0);

    queue.drain_all();
    tasks.shutdown().await;
}

#[tokio::test]
async fn outbound_checksums_are_repaired_on_delivery() {
    let queue = new_queue();
    let fixup = ChecksumFixup::for_capture(
        Direction::Outbound,
        ChecksumOffload { tcp: false, udp: true },
    );
    let address = Address::new(Direction::Outbound, 1, 0);
    let pkt = QueuedPacket::copy_from(&outbound_udp(), address, fixup).unwrap();
    queue.enqueue(pkt);

    let got = queue.recv(1500).await.unwrap();
    assert_eq!(checksum16(&[], &got.data[..20]), 0);
    assert_ne!(&got.data[26..28], &[0xbe, 0xef]);
}

#[tokio::test]
async fn repair_can_be_disabled() {
    let queue = new_queue();
    queue.set_checksum_repair(false);
    let fixup = ChecksumFixup::for_capture(Direction::Outbound, ChecksumOffload::default());
    let original = outbound_udp();
    let address = Address::new(Direction::Outbound, 1, 0);
    let pkt = QueuedPacket::copy_from(&original, address, fixup).unwrap();
    queue.enqueue(pkt);

    let got = queue.recv(1500).await.unwrap();
    assert_eq!(got.data.as_ref(), original.as_slice());
}
