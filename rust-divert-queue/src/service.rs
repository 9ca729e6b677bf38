//! Pairing of pending reads with queued packets.
//!
//! Readers park a request carrying a reply channel. The service routine pops
//! one request and one packet per lock hold, then copies, repairs and
//! replies outside the lock. It runs from the background worker and inline
//! from `enqueue`; both may race freely because every pop is atomic.

use bytes::Bytes;
use log::{debug, trace, warn};
use rust_divert_common::checksum::repair_checksums;
use rust_divert_common::{Error, Result};
use std::sync::atomic::Ordering;
use tokio::sync::oneshot;

use crate::packet::{Delivered, QueuedPacket};
use crate::queue::{DiversionQueue, QueueState};

/// A reader waiting for the next packet.
#[derive(Debug)]
pub(crate) struct ReadRequest {
    /// Reader buffer size; longer packets are truncated.
    max_len: usize,
    reply: oneshot::Sender<Result<Delivered>>,
}

impl DiversionQueue {
    /// Wait for the next packet, truncated to `max_len` bytes.
    pub async fn recv(&self, max_len: usize) -> Result<Delivered> {
        let receiver = self.submit_read(max_len)?;
        self.service_reads();
        match receiver.await {
            Ok(result) => result,
            // The request was dropped by a teardown.
            Err(_) => Err(Error::QueueShuttingDown),
        }
    }

    /// Park a read request at the tail of the request FIFO.
    pub(crate) fn submit_read(&self, max_len: usize) -> Result<oneshot::Receiver<Result<Delivered>>> {
        let (reply, receiver) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Open {
            return Err(Error::QueueShuttingDown);
        }
        inner.requests.push_back(ReadRequest { max_len, reply });
        trace!("Read request queued, {} pending", inner.requests.len());
        Ok(receiver)
    }

    /// Complete as many pending reads as there are queued packets. Returns
    /// the number of packets delivered.
    pub fn service_reads(&self) -> usize {
        let mut delivered = 0;
        while let Some((request, packet)) = self.next_pair() {
            if self.complete(request, packet) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Pop the head request and head packet together.
    fn next_pair(&self) -> Option<(ReadRequest, QueuedPacket)> {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Open {
            return None;
        }
        // Readers that gave up are skipped so they do not consume a packet.
        while inner.requests.front().map_or(false, |r| r.reply.is_closed()) {
            inner.requests.pop_front();
        }
        if inner.requests.is_empty() || inner.packets.is_empty() {
            return None;
        }
        let request = inner.requests.pop_front()?;
        let packet = inner.packets.pop_front()?;
        self.metrics.queue_length.set(inner.packets.len() as u64);
        Some((request, packet))
    }

    /// Repair and hand `packet` to `request`. A packet whose reader has
    /// gone away goes back to the head of the queue for the next reader.
    pub(crate) fn complete(&self, request: ReadRequest, packet: QueuedPacket) -> bool {
        let (mut data, address, fixup, generation) = packet.into_parts();

        if self.repair_checksums.load(Ordering::Relaxed) && fixup.any() {
            let report = repair_checksums(&mut data, fixup);
            if report.any() {
                self.metrics.checksum_repairs.increment();
            }
        }

        let original_len = data.len();
        let len = original_len.min(request.max_len);
        let full = Bytes::from(data);
        let delivered = Delivered {
            data: full.slice(..len),
            address,
            original_len,
        };

        match request.reply.send(Ok(delivered)) {
            Ok(()) => {
                self.metrics.packets_delivered.increment();
                self.metrics.bytes_delivered.add(len as u64);
                self.metrics.delivered_sizes.observe(original_len as u64);
                debug!("Delivered {} of {} bytes ({})", len, original_len, address);
                true
            }
            Err(returned) => {
                drop(returned);
                let packet = QueuedPacket::from_parts(full.to_vec(), address, fixup, generation);
                self.requeue(packet);
                false
            }
        }
    }

    /// Put `packet` back at the head. It is dropped if the queue closed or
    /// filled up in the meantime, since it would be the oldest entry.
    fn requeue(&self, packet: QueuedPacket) {
        let rejected = {
            let mut inner = self.inner.lock();
            if inner.state != QueueState::Open {
                Some(packet)
            } else if inner.packets.len() >= inner.max_len {
                self.metrics.overflow_evictions.increment();
                Some(packet)
            } else {
                inner.packets.push_front(packet);
                self.metrics.queue_length.set(inner.packets.len() as u64);
                None
            }
        };

        match rejected {
            Some(packet) => warn!(
                "Reader went away, dropped packet of {} bytes",
                packet.len()
            ),
            None => debug!("Reader went away, packet returned to the head of the queue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_divert_common::metrics::DivertMetrics;
    use rust_divert_common::types::{Address, ChecksumFixup, Direction};
    use std::sync::Arc;

    fn packet(len: usize) -> QueuedPacket {
        QueuedPacket::copy_from(
            &vec![0x11; len],
            Address::new(Direction::Outbound, 2, 0),
            ChecksumFixup::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn recv_takes_the_head_packet() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        q.enqueue(packet(10));
        q.enqueue(packet(20));
        let first = q.recv(1500).await.unwrap();
        assert_eq!(first.data.len(), 10);
        assert!(!first.is_truncated());
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn recv_truncates_to_buffer() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        q.enqueue(packet(100));
        let got = q.recv(16).await.unwrap();
        assert_eq!(got.data.len(), 16);
        assert_eq!(got.original_len, 100);
        assert!(got.is_truncated());
    }

    #[test]
    fn abandoned_reads_do_not_consume_packets() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        let receiver = q.submit_read(64).unwrap();
        drop(receiver);
        q.enqueue(packet(8));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending_reads(), 0);
    }

    #[tokio::test]
    async fn vanished_reader_hands_packet_back() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        q.enqueue(packet(10));
        q.enqueue(packet(20));

        let (reply, receiver) = oneshot::channel();
        drop(receiver);
        let head = q.dequeue().unwrap();
        assert!(!q.complete(ReadRequest { max_len: 4, reply }, head));
        assert_eq!(q.len(), 2);
        assert_eq!(q.metrics.packets_delivered.value(), 0);

        // Returned whole, not cut to the vanished reader's buffer.
        let got = q.recv(1500).await.unwrap();
        assert_eq!(got.data.len(), 10);
        assert!(!got.is_truncated());
        assert_eq!(q.recv(1500).await.unwrap().data.len(), 20);
    }

    #[test]
    fn vanished_reader_on_a_full_queue_loses_the_packet() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        q.set_max_length(1).unwrap();
        q.enqueue(packet(10));
        let head = q.dequeue().unwrap();
        q.enqueue(packet(20));

        let (reply, receiver) = oneshot::channel();
        drop(receiver);
        assert!(!q.complete(ReadRequest { max_len: 64, reply }, head));
        assert_eq!(q.len(), 1);
        assert_eq!(q.metrics.overflow_evictions.value(), 1);
    }

    #[test]
    fn reads_are_refused_after_teardown() {
        let q = DiversionQueue::new(Arc::new(DivertMetrics::new()));
        q.drain_all();
        assert!(matches!(q.submit_read(64), Err(Error::QueueShuttingDown)));
    }
}
