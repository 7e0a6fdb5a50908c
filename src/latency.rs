//! Ring-buffered latency samples with percentile queries.
//!
//! Recording is a relaxed fetch-add plus one atomic store, cheap enough
//! for the receive hot path; statistical accuracy is a cold-path concern
//! and is paid for with a sort per query.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of buckets in the exported histogram.
const NUM_BUCKETS: usize = 1000;

/// Upper bound of the exported histogram range (10 ms).
const MAX_LATENCY_NS: u64 = 10_000_000;

/// Default ring capacity before power-of-two rounding.
const DEFAULT_MAX_SAMPLES: usize = 1_000_000;

/// Summary statistics over the samples currently in the ring.
///
/// All zeros when nothing has been recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Smallest sample (ns).
    pub min: u64,
    /// Largest sample (ns).
    pub max: u64,
    /// Integer mean (ns).
    pub mean: u64,
    /// 50th percentile (ns).
    pub p50: u64,
    /// 95th percentile (ns).
    pub p95: u64,
    /// 99th percentile (ns).
    pub p99: u64,
    /// 99.9th percentile (ns).
    pub p999: u64,
    /// Number of samples the statistics were computed over, never more
    /// than the ring capacity.
    pub sample_count: u64,
}

/// Lock-free ring buffer of nanosecond latency samples.
///
/// Any thread may record; the write cursor is a shared atomic and each
/// recorder writes its own slot. Capacity is rounded up to the next
/// power of two so slot selection is a single mask.
pub struct LatencyTracker {
    capacity: usize,
    index_mask: usize,
    write_idx: AtomicU64,
    samples: Vec<AtomicU64>,
}

impl LatencyTracker {
    /// Creates a tracker holding at least `max_samples` samples.
    pub fn new(max_samples: usize) -> Self {
        let capacity = max_samples.max(1).next_power_of_two();
        let mut samples = Vec::with_capacity(capacity);
        samples.resize_with(capacity, || AtomicU64::new(0));

        Self {
            capacity,
            index_mask: capacity - 1,
            write_idx: AtomicU64::new(0),
            samples,
        }
    }

    /// Rounded-up ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records one sample. O(1), callable from any thread.
    #[inline]
    pub fn record(&self, latency_ns: u64) {
        let idx = self.write_idx.fetch_add(1, Ordering::Relaxed) as usize & self.index_mask;
        self.samples[idx].store(latency_ns, Ordering::Relaxed);
    }

    /// Computes statistics over the samples currently in the ring.
    ///
    /// Takes the current write index, sorts a copy of the first
    /// `min(index, capacity)` slots, and picks percentiles at
    /// `floor(n * p)` with a clamp. Returns all zeros when empty.
    pub fn stats(&self) -> LatencyStats {
        let current = self.write_idx.load(Ordering::Relaxed) as usize;
        let n = current.min(self.capacity);
        if n == 0 {
            return LatencyStats::default();
        }

        let mut sorted: Vec<u64> = self.samples[..n]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let pick = |p: f64| sorted[((n as f64 * p) as usize).min(n - 1)];

        LatencyStats {
            min: sorted[0],
            max: sorted[n - 1],
            mean: sum / n as u64,
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
            p999: pick(0.999),
            sample_count: n as u64,
        }
    }

    /// Discards all samples by rewinding the write cursor.
    pub fn reset(&self) {
        self.write_idx.store(0, Ordering::Relaxed);
    }

    /// Writes a `bucket,count` CSV histogram of the current ring
    /// contents: 1000 buckets over [0, 10 ms), the last bucket
    /// absorbing everything above the range. Only non-empty buckets are
    /// written. Returns `false` on any I/O error.
    pub fn export_histogram<P: AsRef<Path>>(&self, path: P) -> bool {
        let current = self.write_idx.load(Ordering::Relaxed) as usize;
        let n = current.min(self.capacity);

        let mut buckets = vec![0u64; NUM_BUCKETS];
        for slot in &self.samples[..n] {
            let ns = slot.load(Ordering::Relaxed);
            buckets[bucket_for(ns)] += 1;
        }

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&path)?;
            writeln!(file, "bucket,count")?;
            for (bucket, &count) in buckets.iter().enumerate() {
                if count > 0 {
                    writeln!(file, "{},{}", bucket, count)?;
                }
            }
            Ok(())
        };

        match write() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to export latency histogram: {}", e);
                false
            }
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}

fn bucket_for(latency_ns: u64) -> usize {
    if latency_ns >= MAX_LATENCY_NS {
        NUM_BUCKETS - 1
    } else {
        ((latency_ns as u128 * NUM_BUCKETS as u128) / MAX_LATENCY_NS as u128) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_empty_stats_are_zero() {
        let tracker = LatencyTracker::new(1024);
        assert_eq!(tracker.stats(), LatencyStats::default());
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(LatencyTracker::new(1000).capacity(), 1024);
        assert_eq!(LatencyTracker::new(1024).capacity(), 1024);
        assert_eq!(LatencyTracker::new(1).capacity(), 1);
    }

    #[test]
    fn test_sample_count_tracks_records() {
        let tracker = LatencyTracker::new(1024);
        for i in 0..10 {
            tracker.record(i * 10);
        }
        let stats = tracker.stats();
        assert_eq!(stats.sample_count, 10);
        assert!(stats.min <= stats.mean && stats.mean <= stats.max);
    }

    #[test]
    fn test_ring_wrap_keeps_latest_window() {
        let tracker = LatencyTracker::new(1024);
        for i in 0..2000u64 {
            tracker.record(i * 100);
        }

        let stats = tracker.stats();
        assert_eq!(stats.sample_count, 1024);
        // The largest value still in the ring is the last one recorded.
        assert_eq!(stats.max, 1999 * 100);
        // Everything older than the window has been overwritten.
        assert!(stats.min >= (2000 - 1024) * 100);
    }

    #[test]
    fn test_percentiles_are_monotonic() {
        let tracker = LatencyTracker::new(4096);
        for i in 1..=3000u64 {
            tracker.record(i);
        }

        let s = tracker.stats();
        assert!(s.p50 <= s.p95);
        assert!(s.p95 <= s.p99);
        assert!(s.p99 <= s.p999);
        assert!(s.p999 <= s.max);
        assert_eq!(s.min, 1);
        assert_eq!(s.max, 3000);
    }

    #[test]
    fn test_reset() {
        let tracker = LatencyTracker::new(16);
        tracker.record(42);
        tracker.reset();
        assert_eq!(tracker.stats(), LatencyStats::default());
    }

    #[test]
    fn test_concurrent_recording() {
        let tracker = Arc::new(LatencyTracker::new(1 << 16));
        let mut handles = Vec::new();
        for t in 0..4 {
            let tracker = Arc::clone(&tracker);
            handles.push(thread::spawn(move || {
                for i in 0..10_000u64 {
                    tracker.record(t * 1_000_000 + i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let stats = tracker.stats();
        assert_eq!(stats.sample_count, 40_000);
    }

    #[test]
    fn test_export_histogram() {
        let tracker = LatencyTracker::new(64);
        tracker.record(0);
        tracker.record(5_000); // bucket 0 (10us per bucket)
        tracker.record(25_000); // bucket 2
        tracker.record(20_000_000); // beyond range, last bucket

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency.csv");
        assert!(tracker.export_histogram(&path));

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("bucket,count"));
        assert!(contents.contains("0,2"));
        assert!(contents.contains("2,1"));
        assert!(contents.contains("999,1"));
    }

    #[test]
    fn test_export_histogram_bad_path() {
        let tracker = LatencyTracker::new(16);
        assert!(!tracker.export_histogram("/nonexistent-dir/latency.csv"));
    }
}
