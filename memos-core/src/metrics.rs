//! Runtime metrics for the scheduler.
//!
//! Lock-free `AtomicU64` counters bumped on the hot path, plus a small
//! ring buffer of batch latencies read on dashboard export. Both can be
//! rendered as Prometheus text.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Atomic counters for scheduler events.
#[derive(Debug)]
pub struct SchedulerCounters {
    /// Messages accepted into a partition.
    pub enqueued: AtomicU64,
    /// Messages rejected by enqueue back-pressure.
    pub enqueue_rejected: AtomicU64,
    /// Batches handed to the worker pool.
    pub batches_dispatched: AtomicU64,
    /// (tenant, cube) groups processed successfully.
    pub groups_processed: AtomicU64,
    /// (tenant, cube) groups that failed.
    pub groups_failed: AtomicU64,
    /// Groups skipped because cancellation was requested.
    pub groups_cancelled: AtomicU64,
    /// Batches rejected by validation.
    pub validation_failures: AtomicU64,
    /// Batches whose label had no handler.
    pub routing_failures: AtomicU64,
    /// Event logs delivered to the sink.
    pub events_emitted: AtomicU64,
    /// Event logs lost because the sink rejected them.
    pub events_dropped: AtomicU64,
    /// Idle partitions reaped.
    pub partitions_evicted: AtomicU64,
    /// Batches moved to the dead-letter queue.
    pub dead_lettered: AtomicU64,
}

impl SchedulerCounters {
    /// Create a zeroed set of counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            enqueue_rejected: AtomicU64::new(0),
            batches_dispatched: AtomicU64::new(0),
            groups_processed: AtomicU64::new(0),
            groups_failed: AtomicU64::new(0),
            groups_cancelled: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            routing_failures: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            partitions_evicted: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            enqueued: load(&self.enqueued),
            enqueue_rejected: load(&self.enqueue_rejected),
            batches_dispatched: load(&self.batches_dispatched),
            groups_processed: load(&self.groups_processed),
            groups_failed: load(&self.groups_failed),
            groups_cancelled: load(&self.groups_cancelled),
            validation_failures: load(&self.validation_failures),
            routing_failures: load(&self.routing_failures),
            events_emitted: load(&self.events_emitted),
            events_dropped: load(&self.events_dropped),
            partitions_evicted: load(&self.partitions_evicted),
            dead_lettered: load(&self.dead_lettered),
        }
    }
}

impl Default for SchedulerCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Messages accepted into a partition.
    pub enqueued: u64,
    /// Messages rejected by back-pressure.
    pub enqueue_rejected: u64,
    /// Batches handed to the pool.
    pub batches_dispatched: u64,
    /// Groups processed.
    pub groups_processed: u64,
    /// Groups failed.
    pub groups_failed: u64,
    /// Groups cancelled.
    pub groups_cancelled: u64,
    /// Validation rejections.
    pub validation_failures: u64,
    /// Unknown-label batches.
    pub routing_failures: u64,
    /// Event logs emitted.
    pub events_emitted: u64,
    /// Event logs the sink rejected.
    pub events_dropped: u64,
    /// Partitions evicted.
    pub partitions_evicted: u64,
    /// Batches dead-lettered.
    pub dead_lettered: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 12] = [
            ("enqueued", "Messages accepted into a partition", self.enqueued),
            ("enqueue_rejected", "Messages rejected by back-pressure", self.enqueue_rejected),
            ("batches_dispatched", "Batches handed to the worker pool", self.batches_dispatched),
            ("groups_processed", "Tenant/cube groups processed", self.groups_processed),
            ("groups_failed", "Tenant/cube groups that failed", self.groups_failed),
            ("groups_cancelled", "Groups skipped on cancellation", self.groups_cancelled),
            ("validation_failures", "Batches rejected by validation", self.validation_failures),
            ("routing_failures", "Batches with no registered handler", self.routing_failures),
            ("events_emitted", "Event logs delivered to the sink", self.events_emitted),
            ("events_dropped", "Event logs rejected by the sink", self.events_dropped),
            ("partitions_evicted", "Idle stream partitions reaped", self.partitions_evicted),
            ("dead_lettered", "Batches moved to the dead-letter queue", self.dead_lettered),
        ];
        let mut out = String::with_capacity(rows.len() * 128);
        for (name, help, value) in rows {
            let _ = writeln!(out, "# HELP memos_scheduler_{name}_total {help}");
            let _ = writeln!(out, "# TYPE memos_scheduler_{name}_total counter");
            let _ = writeln!(out, "memos_scheduler_{name}_total {value}");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Batch latency
// ---------------------------------------------------------------------------

/// Ring buffer of recent batch handling times.
pub struct LatencyTracker {
    history: Mutex<LatencyHistory>,
}

struct LatencyHistory {
    /// Recent timings in milliseconds.
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
}

impl LatencyTracker {
    /// Track the last `window` samples.
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            history: Mutex::new(LatencyHistory {
                timings: vec![0.0; window.max(1)],
                write_idx: 0,
                count: 0,
            }),
        }
    }

    /// Start timing; the elapsed time is recorded when the guard drops.
    pub fn start(&self) -> LatencyGuard<'_> {
        LatencyGuard {
            tracker: self,
            start: Instant::now(),
        }
    }

    /// Record one sample.
    pub fn record(&self, elapsed: Duration) {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        let len = h.timings.len();
        h.timings[idx] = elapsed.as_secs_f64() * 1000.0;
        h.write_idx = (idx + 1) % len;
        h.count += 1;
    }

    /// Samples recorded since creation.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.history.lock().count
    }

    /// P50 / P95 / P99 / max over the window, in milliseconds.
    #[must_use]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let h = self.history.lock();
        let n = (h.count as usize).min(h.timings.len());
        if n == 0 {
            return LatencyPercentiles::default();
        }
        let mut sorted = h.timings[..n].to_vec();
        sorted.sort_by(f64::total_cmp);

        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        LatencyPercentiles {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[n - 1],
        }
    }
}

/// RAII guard returned by [`LatencyTracker::start`].
pub struct LatencyGuard<'a> {
    tracker: &'a LatencyTracker,
    start: Instant,
}

impl Drop for LatencyGuard<'_> {
    fn drop(&mut self) {
        self.tracker.record(self.start.elapsed());
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Maximum in the window.
    pub max: f64,
}

impl LatencyPercentiles {
    /// Human-readable one-liner.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "P50={:.2}ms  P95={:.2}ms  P99={:.2}ms  Max={:.2}ms",
            self.p50, self.p95, self.p99, self.max
        )
    }
}

// ---------------------------------------------------------------------------
// Span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::info_span!`.
pub mod spans {
    /// One consumer drain pass.
    pub const CONSUME_PASS: &str = "memos::scheduler::consume";
    /// One batch running on the worker pool.
    pub const DISPATCH_BATCH: &str = "memos::scheduler::dispatch";
    /// Idle-partition eviction pass.
    pub const EVICTION_PASS: &str = "memos::scheduler::evict";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let c = SchedulerCounters::new();
        assert_eq!(c.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn counters_increment() {
        let c = SchedulerCounters::new();
        SchedulerCounters::incr(&c.enqueued);
        SchedulerCounters::incr(&c.enqueued);
        SchedulerCounters::add(&c.events_emitted, 5);
        let snap = c.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.events_emitted, 5);
        assert_eq!(snap.groups_failed, 0);
    }

    #[test]
    fn prometheus_export_names_every_counter() {
        let c = SchedulerCounters::new();
        SchedulerCounters::incr(&c.dead_lettered);
        let text = c.snapshot().to_prometheus();
        assert!(text.contains("# TYPE memos_scheduler_enqueued_total counter"));
        assert!(text.contains("memos_scheduler_dead_lettered_total 1\n"));
        assert_eq!(text.lines().filter(|l| l.starts_with("# TYPE")).count(), 12);
    }

    #[test]
    fn latency_percentiles() {
        let t = LatencyTracker::new(100);
        for ms in 1..=100 {
            t.record(Duration::from_millis(ms));
        }
        let p = t.percentiles();
        assert!((p.p50 - 51.0).abs() < 0.01);
        assert!((p.max - 100.0).abs() < 0.01);
        assert!(p.p99 >= p.p95);
        assert_eq!(t.count(), 100);
    }

    #[test]
    fn latency_empty_is_zero() {
        let t = LatencyTracker::new(8);
        assert_eq!(t.percentiles(), LatencyPercentiles::default());
    }

    #[test]
    fn latency_guard_records_on_drop() {
        let t = LatencyTracker::new(4);
        {
            let _g = t.start();
        }
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn latency_window_wraps() {
        let t = LatencyTracker::new(2);
        t.record(Duration::from_millis(100));
        t.record(Duration::from_millis(1));
        t.record(Duration::from_millis(2));
        assert!((t.percentiles().max - 2.0).abs() < 0.01);
    }
}
