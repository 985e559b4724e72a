//! Stream Partition Store: bounded per-(tenant, cube, label) FIFO queues.
//!
//! Every message lands in the partition named by its [`StreamKey`]. Each
//! partition is an independent bounded queue, so back-pressure is local:
//! a saturated lane never blocks producers of any other lane.
//!
//! Locking is two-level. The key → partition map is a sharded `DashMap`;
//! each partition guards its own queue with a `parking_lot::Mutex` and
//! tracks free slots with a `tokio::sync::Semaphore`. Creating a partition
//! only touches one map shard.
//!
//! `full()` is an advisory load-shedding signal: it is true only when
//! *every* existing partition is at capacity.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace};

use crate::config::{EnqueuePolicy, StreamConfig};
use crate::error::{Result, SchedulerError};
use crate::types::{ScheduleMessage, StreamKey};

/// One bounded FIFO lane.
struct Partition {
    state: Mutex<PartitionState>,
    /// Free slots. `permits + len == capacity` outside of a `put`/`get` critical section.
    slots: Semaphore,
    capacity: usize,
}

struct PartitionState {
    items: VecDeque<ScheduleMessage>,
    last_active: Instant,
    /// Set when the partition has been evicted from the map. Producers that
    /// still hold a reference must re-resolve the key.
    retired: bool,
}

impl Partition {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PartitionState {
                items: VecDeque::with_capacity(capacity.min(64)),
                last_active: Instant::now(),
                retired: false,
            }),
            slots: Semaphore::new(capacity),
            capacity,
        }
    }

    fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    fn pop_front(&self, max: usize) -> Vec<ScheduleMessage> {
        let mut state = self.state.lock();
        let n = max.min(state.items.len());
        let drained: Vec<_> = state.items.drain(..n).collect();
        if !drained.is_empty() {
            state.last_active = Instant::now();
            self.slots.add_permits(drained.len());
        }
        drained
    }
}

/// Thread-safe store of stream partitions.
///
/// Cloning is cheap and shares the underlying partitions.
#[derive(Clone)]
pub struct StreamPartitionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    partitions: DashMap<StreamKey, Arc<Partition>>,
    maxsize: usize,
    policy: EnqueuePolicy,
}

/// Point-in-time statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Number of live partitions.
    pub partitions: usize,
    /// Messages queued across all partitions.
    pub queued: usize,
    /// Partitions currently at capacity.
    pub full_partitions: usize,
}

impl StreamPartitionStore {
    /// Create a store whose partitions hold at most `maxsize` messages each.
    #[must_use]
    pub fn new(maxsize: usize, policy: EnqueuePolicy) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                partitions: DashMap::new(),
                maxsize: maxsize.max(1),
                policy,
            }),
        }
    }

    /// Create a store from the `[stream]` config section.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.maxsize, config.enqueue_policy)
    }

    /// Per-partition capacity.
    #[must_use]
    pub fn maxsize(&self) -> usize {
        self.inner.maxsize
    }

    /// Key under which `message` is partitioned.
    #[must_use]
    pub fn get_stream_key(tenant_id: &str, mem_cube_id: &str, label: &str) -> StreamKey {
        StreamKey::new(tenant_id, mem_cube_id, label)
    }

    fn partition_for(&self, key: &StreamKey) -> Arc<Partition> {
        if let Some(existing) = self.inner.partitions.get(key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .inner
            .partitions
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(stream_key = %key, capacity = self.inner.maxsize, "creating stream partition");
                Arc::new(Partition::new(self.inner.maxsize))
            });
        Arc::clone(entry.value())
    }

    fn existing(&self, key: &StreamKey) -> Result<Arc<Partition>> {
        self.inner
            .partitions
            .get(key)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| SchedulerError::StreamNotFound(key.clone()))
    }

    /// Acquire a free slot according to the enqueue policy.
    ///
    /// `Ok(None)` means the partition was retired while waiting.
    async fn acquire_slot<'a>(
        key: &StreamKey,
        partition: &'a Partition,
        policy: EnqueuePolicy,
        started: tokio::time::Instant,
    ) -> Result<Option<SemaphorePermit<'a>>> {
        let full = || SchedulerError::PartitionFull {
            key: key.clone(),
            capacity: partition.capacity,
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        match policy {
            EnqueuePolicy::Block => Ok(partition.slots.acquire().await.ok()),
            EnqueuePolicy::FailFast => match partition.slots.try_acquire() {
                Ok(permit) => Ok(Some(permit)),
                Err(tokio::sync::TryAcquireError::Closed) => Ok(None),
                Err(tokio::sync::TryAcquireError::NoPermits) => Err(full()),
            },
            EnqueuePolicy::Timeout { timeout_ms } => {
                let remaining = Duration::from_millis(timeout_ms).saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, partition.slots.acquire()).await {
                    Ok(permit) => Ok(permit.ok()),
                    Err(_) => Err(full()),
                }
            }
        }
    }

    /// Enqueue `message` at the tail of its partition.
    ///
    /// Creates the partition on first use. When the partition is full the
    /// configured [`EnqueuePolicy`] applies.
    ///
    /// # Errors
    /// Returns `SchedulerError::PartitionFull` when the policy gives up.
    pub async fn put(&self, message: ScheduleMessage) -> Result<()> {
        self.enqueue(message, self.inner.policy).await
    }

    /// Enqueue `message` only if its partition has a free slot right now.
    ///
    /// Ignores the configured policy. Handlers running on the worker pool
    /// must enqueue this way; a blocked worker cannot drain the partition
    /// it is waiting on.
    ///
    /// # Errors
    /// Returns `SchedulerError::PartitionFull` when the partition is at capacity.
    pub async fn try_put(&self, message: ScheduleMessage) -> Result<()> {
        self.enqueue(message, EnqueuePolicy::FailFast).await
    }

    async fn enqueue(&self, message: ScheduleMessage, policy: EnqueuePolicy) -> Result<()> {
        let key = message.stream_key();
        let started = tokio::time::Instant::now();

        loop {
            let partition = self.partition_for(&key);
            let Some(permit) = Self::acquire_slot(&key, &partition, policy, started).await? else {
                trace!(stream_key = %key, "partition retired while waiting, retrying");
                continue;
            };

            let mut state = partition.state.lock();
            if state.retired {
                drop(state);
                drop(permit);
                continue;
            }
            permit.forget();
            state.items.push_back(message);
            state.last_active = Instant::now();
            trace!(stream_key = %key, depth = state.items.len(), "message enqueued");
            return Ok(());
        }
    }

    /// Dequeue the head of the partition named by `key`.
    ///
    /// Returns `Ok(None)` when the partition exists but is empty.
    ///
    /// # Errors
    /// Returns `SchedulerError::StreamNotFound` if no partition exists for `key`.
    pub fn get(&self, key: &StreamKey) -> Result<Option<ScheduleMessage>> {
        Ok(self.existing(key)?.pop_front(1).into_iter().next())
    }

    /// Dequeue up to `max` messages from the head of a partition, in FIFO order.
    ///
    /// # Errors
    /// Returns `SchedulerError::StreamNotFound` if no partition exists for `key`.
    pub fn drain(&self, key: &StreamKey, max: usize) -> Result<Vec<ScheduleMessage>> {
        Ok(self.existing(key)?.pop_front(max))
    }

    /// Messages queued in one partition.
    ///
    /// # Errors
    /// Returns `SchedulerError::StreamNotFound` if no partition exists for `key`.
    pub fn qsize(&self, key: &StreamKey) -> Result<usize> {
        Ok(self.existing(key)?.len())
    }

    /// True iff at least one partition exists and every partition is at capacity.
    #[must_use]
    pub fn full(&self) -> bool {
        let mut any = false;
        for entry in &self.inner.partitions {
            any = true;
            if !entry.value().is_full() {
                return false;
            }
        }
        any
    }

    /// Messages queued across all partitions.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Whether no messages are queued anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.partitions.iter().all(|p| p.value().len() == 0)
    }

    /// Keys of all live partitions, sorted for a stable drain order.
    #[must_use]
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<_> = self.inner.partitions.iter().map(|p| p.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of live partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Get store statistics.
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        let mut stats = StreamStats {
            partitions: 0,
            queued: 0,
            full_partitions: 0,
        };
        for entry in &self.inner.partitions {
            let len = entry.value().len();
            stats.partitions += 1;
            stats.queued += len;
            if len >= entry.value().capacity {
                stats.full_partitions += 1;
            }
        }
        stats
    }

    /// Remove empty partitions that have been idle for at least `ttl`.
    ///
    /// Producers blocked on or racing with a reaped partition re-resolve
    /// their key and enqueue into a fresh partition.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        self.inner.partitions.retain(|key, partition| {
            let mut state = partition.state.lock();
            if state.items.is_empty() && now.saturating_duration_since(state.last_active) >= ttl {
                state.retired = true;
                partition.slots.close();
                evicted += 1;
                debug!(stream_key = %key, "evicting idle stream partition");
                false
            } else {
                true
            }
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskLabel;

    fn msg(tenant: &str, cube: &str, label: &str, content: &str) -> ScheduleMessage {
        ScheduleMessage::with_raw_label(tenant, cube, label, content)
    }

    #[tokio::test]
    async fn aggregate_full_requires_every_partition_full() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::FailFast);
        assert!(!store.full(), "empty store is not full");

        store.put(msg("u1", "c1", "l1", "m1")).await.expect("put");
        assert!(store.full(), "1 of 1 partitions full");

        store.put(msg("u2", "c2", "l2", "m2")).await.expect("put");
        assert!(store.full(), "2 of 2 partitions full");

        let key = StreamPartitionStore::get_stream_key("u1", "c1", "l1");
        let head = store.get(&key).expect("get").expect("message");
        assert_eq!(head.content, "m1");
        assert!(!store.full(), "1 of 2 partitions full");
    }

    #[tokio::test]
    async fn new_partition_clears_full_signal() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::FailFast);
        store.put(msg("u1", "c1", "l1", "a")).await.expect("put");
        assert!(store.full());

        // Same tenant and cube, different label: a brand-new, empty lane.
        store.partition_for(&StreamPartitionStore::get_stream_key("u1", "c1", "l2"));
        assert!(!store.full());
    }

    #[tokio::test]
    async fn fifo_within_partition() {
        let store = StreamPartitionStore::new(10, EnqueuePolicy::Block);
        for i in 0..5 {
            store.put(msg("u1", "c1", "query", &format!("m{i}"))).await.expect("put");
        }
        let key = StreamKey::new("u1", "c1", "query");
        let order: Vec<_> = std::iter::from_fn(|| store.get(&key).expect("get"))
            .map(|m| m.content)
            .collect();
        assert_eq!(order, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn get_on_unknown_key_is_not_found() {
        let store = StreamPartitionStore::new(4, EnqueuePolicy::Block);
        let err = store.get(&StreamKey::new("nobody", "c", "l")).expect_err("missing");
        assert!(matches!(err, SchedulerError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn fail_fast_rejects_when_full_without_touching_other_lanes() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::FailFast);
        store.put(msg("u1", "c1", "add", "a")).await.expect("put");

        let err = store.put(msg("u1", "c1", "add", "b")).await.expect_err("full");
        assert!(err.is_resource_exhaustion());

        store.put(msg("u2", "c1", "add", "c")).await.expect("other lane unaffected");
        assert_eq!(store.size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn try_put_never_waits_under_blocking_policy() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::Block);
        store.try_put(msg("u1", "c1", "add", "a")).await.expect("room");

        let started = tokio::time::Instant::now();
        let err = store.try_put(msg("u1", "c1", "add", "b")).await.expect_err("full");
        assert!(err.is_resource_exhaustion());
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(store.qsize(&StreamKey::new("u1", "c1", "add")).expect("qsize"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_policy_gives_up_after_deadline() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::Timeout { timeout_ms: 200 });
        store.put(msg("u1", "c1", "add", "a")).await.expect("put");

        let err = store.put(msg("u1", "c1", "add", "b")).await.expect_err("times out");
        match err {
            SchedulerError::PartitionFull { capacity, waited_ms, .. } => {
                assert_eq!(capacity, 1);
                assert!(waited_ms >= 200);
            }
            other => panic!("expected PartitionFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocking_put_resumes_when_slot_frees() {
        let store = StreamPartitionStore::new(1, EnqueuePolicy::Block);
        store.put(msg("u1", "c1", "add", "first")).await.expect("put");

        let producer = {
            let store = store.clone();
            tokio::spawn(async move { store.put(msg("u1", "c1", "add", "second")).await })
        };
        tokio::task::yield_now().await;

        let key = StreamKey::new("u1", "c1", "add");
        assert_eq!(store.get(&key).expect("get").expect("head").content, "first");
        producer.await.expect("join").expect("put");
        assert_eq!(store.get(&key).expect("get").expect("head").content, "second");
    }

    #[tokio::test]
    async fn capacity_is_never_exceeded() {
        let store = StreamPartitionStore::new(3, EnqueuePolicy::FailFast);
        for i in 0..10 {
            let _ = store.put(msg("u1", "c1", "add", &i.to_string())).await;
        }
        let key = StreamKey::new("u1", "c1", "add");
        assert_eq!(store.qsize(&key).expect("qsize"), 3);
        assert_eq!(store.stats().full_partitions, 1);
    }

    #[tokio::test]
    async fn drain_respects_batch_limit() {
        let store = StreamPartitionStore::new(10, EnqueuePolicy::Block);
        for i in 0..5 {
            store.put(ScheduleMessage::new("u1", "c1", TaskLabel::Add, i.to_string())).await.expect("put");
        }
        let key = StreamKey::new("u1", "c1", "add");
        let batch = store.drain(&key, 3).expect("drain");
        assert_eq!(batch.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["0", "1", "2"]);
        assert_eq!(store.qsize(&key).expect("qsize"), 2);
    }

    #[tokio::test]
    async fn evict_idle_reaps_only_empty_partitions() {
        let store = StreamPartitionStore::new(4, EnqueuePolicy::Block);
        store.put(msg("u1", "c1", "add", "kept")).await.expect("put");
        store.put(msg("u2", "c2", "add", "drained")).await.expect("put");
        let drained_key = StreamKey::new("u2", "c2", "add");
        store.get(&drained_key).expect("get");

        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert_eq!(store.partition_count(), 1);
        assert!(matches!(store.get(&drained_key), Err(SchedulerError::StreamNotFound(_))));

        // The lane comes back transparently on the next put.
        store.put(msg("u2", "c2", "add", "again")).await.expect("put");
        assert_eq!(store.get(&drained_key).expect("get").expect("msg").content, "again");
    }

    #[tokio::test]
    async fn evict_idle_keeps_recently_active_partitions() {
        let store = StreamPartitionStore::new(4, EnqueuePolicy::Block);
        store.put(msg("u1", "c1", "add", "x")).await.expect("put");
        store.get(&StreamKey::new("u1", "c1", "add")).expect("get");
        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.partition_count(), 1);
    }
}
