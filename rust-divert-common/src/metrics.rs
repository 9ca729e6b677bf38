//! Metrics collection for a diversion context.
//!
//! All counters are plain relaxed atomics so they can be bumped from the
//! capture path without taking any lock.

use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Simple Counter
 * ---------------------------------------------------------------- */

#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/* ---------------------------------------------------------------- *
 * Gauge
 * ---------------------------------------------------------------- */

#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/* ---------------------------------------------------------------- *
 * Histogram
 * ---------------------------------------------------------------- */

/// Bucketed distribution of observed values. A value lands in the first
/// bucket whose upper boundary is not below it.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<u64>,
    overflow: AtomicU64,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(boundaries: Vec<u64>) -> Self {
        let buckets = (0..boundaries.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            buckets,
            boundaries,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets sized for IP packet lengths.
    pub fn packet_sizes() -> Self {
        Self::new(vec![64, 128, 256, 512, 1024, 1500, 9000])
    }

    pub fn observe(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        match self.boundaries.iter().position(|&b| value <= b) {
            Some(idx) => {
                self.buckets[idx].fetch_add(1, Ordering::Relaxed);
            }
            None => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn average(&self) -> f64 {
        let c = self.count.load(Ordering::Relaxed);
        if c == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / c as f64
        }
    }

    pub fn counts(&self) -> Vec<(u64, u64)> {
        self.boundaries
            .iter()
            .zip(self.buckets.iter())
            .map(|(&b, bucket)| (b, bucket.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::packet_sizes()
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate metrics for a diversion context
 * ---------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct DivertMetrics {
    // Capture path
    pub packets_classified: Counter,
    pub packets_matched: Counter,
    /// Matching packets copied into the queue
    pub packets_diverted: Counter,
    /// Matching packets discarded because the context drops
    pub packets_dropped: Counter,

    // Queue
    pub overflow_evictions: Counter,
    pub aged_evictions: Counter,
    pub shutdown_rejections: Counter,
    pub queue_length: Gauge,

    // Delivery
    pub packets_delivered: Counter,
    pub bytes_delivered: Counter,
    pub checksum_repairs: Counter,
    pub delivered_sizes: Histogram,
}

impl DivertMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_classified: self.packets_classified.value(),
            packets_matched: self.packets_matched.value(),
            packets_diverted: self.packets_diverted.value(),
            packets_dropped: self.packets_dropped.value(),
            overflow_evictions: self.overflow_evictions.value(),
            aged_evictions: self.aged_evictions.value(),
            shutdown_rejections: self.shutdown_rejections.value(),
            queue_length: self.queue_length.value(),
            packets_delivered: self.packets_delivered.value(),
            bytes_delivered: self.bytes_delivered.value(),
            checksum_repairs: self.checksum_repairs.value(),
        }
    }
}

/// Plain-value view of [`DivertMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_classified: u64,
    pub packets_matched: u64,
    pub packets_diverted: u64,
    pub packets_dropped: u64,
    pub overflow_evictions: u64,
    pub aged_evictions: u64,
    pub shutdown_rejections: u64,
    pub queue_length: u64,
    pub packets_delivered: u64,
    pub bytes_delivered: u64,
    pub checksum_repairs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_gauge() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.value(), 5);

        let g = Gauge::new();
        g.set(7);
        assert_eq!(g.value(), 7);
    }

    #[test]
    fn histogram_buckets_by_upper_bound() {
        let h = Histogram::new(vec![10, 100]);
        h.observe(10);
        h.observe(11);
        h.observe(1000);
        assert_eq!(h.counts(), vec![(10, 1), (100, 1)]);
        assert_eq!(h.overflow(), 1);
        assert_eq!(h.count(), 3);
        assert_eq!(h.sum(), 1021);
        assert!((h.average() - 1021.0 / 3.0).abs() < 1e-9);
        assert_eq!(Histogram::packet_sizes().average(), 0.0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let m = DivertMetrics::new();
        m.packets_matched.increment();
        m.bytes_delivered.add(60);
        let snap = m.snapshot();
        assert_eq!(snap.packets_matched, 1);
        assert_eq!(snap.bytes_delivered, 60);
        assert_eq!(snap.packets_delivered, 0);
    }
}
