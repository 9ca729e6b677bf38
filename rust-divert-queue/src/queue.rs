//! Bounded diversion queue.
//!
//! One short, non-sleeping lock guards the packet FIFO, the pending read
//! FIFO, the generation bit and the open/closing state. Overflow drops the
//! oldest packet; aging evicts packets that survived a full sweep period.

use log::{debug, info};
use parking_lot::Mutex;
use rust_divert_common::metrics::DivertMetrics;
use rust_divert_common::types::{Param, QUEUE_LEN_DEFAULT, QUEUE_TIME_DEFAULT};
use rust_divert_common::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::packet::QueuedPacket;
use crate::service::ReadRequest;

/// Outcome of [`DiversionQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueStatus {
    /// Appended without eviction.
    Queued,
    /// Appended; the oldest packet was dropped to make room.
    Overflowed,
    /// The queue is shutting down; the packet was discarded.
    ShuttingDown,
}

impl EnqueueStatus {
    pub fn is_accepted(self) -> bool {
        self != EnqueueStatus::ShuttingDown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueState {
    Open,
    Closing,
}

#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) packets: VecDeque<QueuedPacket>,
    pub(crate) requests: VecDeque<ReadRequest>,
    pub(crate) generation: bool,
    pub(crate) max_len: usize,
    pub(crate) state: QueueState,
}

/// Concurrent FIFO of diverted packets between capture and consumers.
#[derive(Debug)]
pub struct DiversionQueue {
    pub(crate) inner: Mutex<Inner>,
    /// Wakes the background read worker.
    pub(crate) notify: Notify,
    sweep_interval_ms: AtomicU64,
    pub(crate) repair_checksums: AtomicBool,
    pub(crate) metrics: Arc<DivertMetrics>,
}

impl DiversionQueue {
    /// Create a new queue with default length and sweep interval.
    pub fn new(metrics: Arc<DivertMetrics>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                requests: VecDeque::new(),
                generation: false,
                max_len: QUEUE_LEN_DEFAULT as usize,
                state: QueueState::Open,
            }),
            notify: Notify::new(),
            sweep_interval_ms: AtomicU64::new(QUEUE_TIME_DEFAULT),
            repair_checksums: AtomicBool::new(true),
            metrics,
        }
    }

    /// Create a queue with explicit bounds.
    pub fn with_limits(
        max_len: u64,
        sweep_interval_ms: u64,
        metrics: Arc<DivertMetrics>,
    ) -> Result<Self> {
        let queue = Self::new(metrics);
        queue.set_max_length(max_len)?;
        queue.set_sweep_interval(sweep_interval_ms)?;
        Ok(queue)
    }

    /* ---------------------------------------------------------------- *
     * Parameters
     * ---------------------------------------------------------------- */

    /// Change the maximum length. Oldest entries beyond the new bound are
    /// evicted immediately.
    pub fn set_max_length(&self, max_len: u64) -> Result<()> {
        let max_len = Param::QueueLen.validate(max_len)? as usize;
        let evicted: Vec<QueuedPacket> = {
            let mut inner = self.inner.lock();
            inner.max_len = max_len;
            let excess = inner.packets.len().saturating_sub(max_len);
            let evicted = inner.packets.drain(..excess).collect();
            self.metrics.queue_length.set(inner.packets.len() as u64);
            evicted
        };

        if !evicted.is_empty() {
            self.metrics.overflow_evictions.add(evicted.len() as u64);
            debug!(
                "Queue shrunk to {}, dropped {} oldest packets",
                max_len,
                evicted.len()
            );
        }
        Ok(())
    }

    pub fn max_length(&self) -> u64 {
        self.inner.lock().max_len as u64
    }

    pub fn set_sweep_interval(&self, ms: u64) -> Result<()> {
        let ms = Param::QueueTime.validate(ms)?;
        self.sweep_interval_ms.store(ms, Ordering::Relaxed);
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.load(Ordering::Relaxed))
    }

    /// Enable or disable lazy checksum repair on delivery.
    pub fn set_checksum_repair(&self, enabled: bool) {
        self.repair_checksums.store(enabled, Ordering::Relaxed);
    }

    /* ---------------------------------------------------------------- *
     * Structural operations
     * ---------------------------------------------------------------- */

    /// Append `packet` at the tail, dropping the head on overflow.
    pub fn enqueue(&self, mut packet: QueuedPacket) -> EnqueueStatus {
        let (status, evicted, has_reader) = {
            let mut inner = self.inner.lock();
            if inner.state != QueueState::Open {
                (EnqueueStatus::ShuttingDown, None, false)
            } else {
                packet.generation = inner.generation;
                inner.packets.push_back(packet);
                let evicted = if inner.packets.len() > inner.max_len {
                    inner.packets.pop_front()
                } else {
                    None
                };
                self.metrics.queue_length.set(inner.packets.len() as u64);
                let status = if evicted.is_some() {
                    EnqueueStatus::Overflowed
                } else {
                    EnqueueStatus::Queued
                };
                (status, evicted, !inner.requests.is_empty())
            }
        };

        match status {
            EnqueueStatus::ShuttingDown => {
                self.metrics.shutdown_rejections.increment();
                debug!("Discarding packet, queue is shutting down");
                return status;
            }
            EnqueueStatus::Overflowed => {
                self.metrics.overflow_evictions.increment();
                debug!(
                    "Queue full, dropped oldest packet of {} bytes",
                    evicted.map_or(0, |p| p.len())
                );
            }
            EnqueueStatus::Queued => {}
        }

        if has_reader {
            self.service_reads();
        }
        self.notify.notify_one();
        status
    }

    /// Remove and return the head packet.
    pub fn dequeue(&self) -> Option<QueuedPacket> {
        let mut inner = self.inner.lock();
        let packet = inner.packets.pop_front();
        self.metrics.queue_length.set(inner.packets.len() as u64);
        packet
    }

    /// Evict head packets tagged with the previous generation, then flip the
    /// generation bit. Returns the number of evicted packets.
    pub fn age_sweep(&self) -> usize {
        let mut evicted = 0;
        loop {
            let stale = {
                let mut inner = self.inner.lock();
                let current = inner.generation;
                let head_is_stale = inner
                    .packets
                    .front()
                    .map_or(false, |head| head.generation != current);
                if !head_is_stale {
                    inner.generation = !current;
                    break;
                }
                let stale = inner.packets.pop_front();
                self.metrics.queue_length.set(inner.packets.len() as u64);
                stale
            };
            // Freed outside the lock.
            drop(stale);
            evicted += 1;
        }

        if evicted > 0 {
            self.metrics.aged_evictions.add(evicted as u64);
            debug!("Aging sweep evicted {} packets", evicted);
        }
        evicted
    }

    /// Tear the queue down: refuse further packets, discard everything
    /// queued and fail every pending read. Returns the number of discarded
    /// packets.
    pub fn drain_all(&self) -> usize {
        let (packets, requests) = {
            let mut inner = self.inner.lock();
            inner.state = QueueState::Closing;
            self.metrics.queue_length.set(0);
            (
                std::mem::take(&mut inner.packets),
                std::mem::take(&mut inner.requests),
            )
        };

        let discarded = packets.len();
        let failed = requests.len();
        drop(packets);
        // Dropping the reply senders fails the waiting readers.
        drop(requests);
        self.notify.notify_one();

        info!(
            "Diversion queue closed, discarded {} packets and {} pending reads",
            discarded, failed
        );
        discarded
    }

    /* ---------------------------------------------------------------- *
     * Inspection
     * ---------------------------------------------------------------- */

    pub fn len(&self) -> usize {
        self.inner.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().packets.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().state != QueueState::Open
    }

    /// Current generation bit.
    pub fn generation(&self) -> bool {
        self.inner.lock().generation
    }

    /// Number of readers waiting for a packet.
    pub fn pending_reads(&self) -> usize {
        self.inner.lock().requests.len()
    }
}
