//! Task scheduler: the consumer loop tying streams, dispatch and the pool
//! together.
//!
//! Producers call [`TaskScheduler::submit_messages`]. A background consumer
//! ([`TaskScheduler::start`]) ticks every `consume_interval_ms`, drains up to
//! `batch_size` messages from each partition and hands each batch to the
//! worker pool. A partition never has more than one batch in flight, so the
//! FIFO order of a partition is also its processing order.
//!
//! Batches that cannot be dispatched (unknown label, failed validation,
//! pool closed) go to the [`DeadLetterQueue`] and can be retried.

use std::sync::Arc;

use dashmap::DashSet;
use memos_cube::MemCubeStore;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::SchedulerConfig;
use crate::context::HandlerContext;
use crate::dead_letter::DeadLetterQueue;
use crate::dispatch::{DispatchMap, HandlerRegistry};
use crate::error::{Result, SchedulerError};
use crate::metrics::{LatencyTracker, SchedulerCounters, spans};
use crate::pool::{PoolStatus, WorkerPool};
use crate::stream::StreamPartitionStore;
use crate::types::{ScheduleMessage, StreamKey};
use crate::validation::{LabelValidator, MessageValidator};
use crate::web_log::WebLogSink;

/// Releases a partition's in-flight slot when its batch finishes.
struct PartitionLease {
    in_flight: Arc<DashSet<StreamKey>>,
    key: StreamKey,
}

impl Drop for PartitionLease {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// The scheduler.
pub struct TaskScheduler {
    config: SchedulerConfig,
    streams: StreamPartitionStore,
    dispatch: DispatchMap,
    pool: Arc<WorkerPool>,
    context: HandlerContext,
    dead_letters: Arc<DeadLetterQueue>,
    in_flight: Arc<DashSet<StreamKey>>,
    counters: Arc<SchedulerCounters>,
    latency: Arc<LatencyTracker>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Build a scheduler with the standard handlers, a [`LabelValidator`]
    /// and a pool sized from `config.pool`.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` for invalid config.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn MemCubeStore>,
        sink: Arc<dyn WebLogSink>,
    ) -> Result<Self> {
        let validator = Arc::new(LabelValidator::from_config(&config.validation));
        let pool = Arc::new(WorkerPool::from_config(&config.pool));
        Self::with_components(config, store, sink, validator, pool)
    }

    /// Build a scheduler around caller-supplied components.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` for invalid config or an
    /// incomplete dispatch map.
    pub fn with_components(
        config: SchedulerConfig,
        store: Arc<dyn MemCubeStore>,
        sink: Arc<dyn WebLogSink>,
        validator: Arc<dyn MessageValidator>,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        config.validate()?;
        let dispatch = HandlerRegistry::build_dispatch_map()?;
        let streams = StreamPartitionStore::from_config(&config.stream);
        let counters = Arc::new(SchedulerCounters::new());
        let context = HandlerContext::new(store, sink, validator, streams.clone(), Arc::clone(&counters));

        info!(
            maxsize = config.stream.maxsize,
            batch_size = config.consumer.batch_size,
            workers = pool.max_workers(),
            "task scheduler created"
        );

        Ok(Self {
            dead_letters: Arc::new(DeadLetterQueue::new(config.consumer.dead_letter_capacity)),
            config,
            streams,
            dispatch,
            pool,
            context,
            in_flight: Arc::new(DashSet::new()),
            counters,
            latency: Arc::new(LatencyTracker::new(256)),
            shutdown: CancellationToken::new(),
            consumer: Mutex::new(None),
        })
    }

    // -----------------------------------------------------------------------
    // Producer side
    // -----------------------------------------------------------------------

    /// Enqueue messages into their partitions.
    ///
    /// # Errors
    /// Returns the first enqueue failure, e.g. `PartitionFull` under a
    /// fail-fast or timeout policy. Earlier messages stay enqueued.
    pub async fn submit_messages(&self, messages: Vec<ScheduleMessage>) -> Result<()> {
        for message in messages {
            match self.streams.put(message).await {
                Ok(()) => SchedulerCounters::incr(&self.counters.enqueued),
                Err(e) => {
                    SchedulerCounters::incr(&self.counters.enqueue_rejected);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Spawn the consumer loop. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut consumer = self.consumer.lock();
        if consumer.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("task scheduler already running");
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("task scheduler was stopped and cannot be restarted");
            return;
        }

        let this = Arc::clone(self);
        let token = self.shutdown.clone();
        *consumer = Some(tokio::spawn(async move {
            let mut consume = tokio::time::interval(this.config.consumer.consume_interval());
            consume.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut evict = tokio::time::interval(this.config.consumer.eviction_interval());
            evict.set_missed_tick_behavior(MissedTickBehavior::Delay);
            evict.tick().await;

            info!("task scheduler consumer started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = consume.tick() => {
                        this.consume_once();
                    }
                    _ = evict.tick() => {
                        this.evict_idle();
                    }
                }
            }
            info!("task scheduler consumer stopped");
        }));
    }

    /// One drain pass: at most one batch per idle partition is dispatched.
    ///
    /// Returns the number of batches handed to the pool.
    pub fn consume_once(&self) -> usize {
        let _span = info_span!(spans::CONSUME_PASS).entered();
        let mut dispatched = 0;
        for key in self.streams.stream_keys() {
            if !self.in_flight.insert(key.clone()) {
                continue;
            }
            let lease = PartitionLease {
                in_flight: Arc::clone(&self.in_flight),
                key,
            };
            let batch = match self.streams.drain(&lease.key, self.config.consumer.batch_size) {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) | Err(_) => continue,
            };
            if self.dispatch_batch(lease, batch) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Validate, route and submit one drained batch.
    fn dispatch_batch(&self, lease: PartitionLease, batch: Vec<ScheduleMessage>) -> bool {
        let label = lease.key.label.clone();

        let handler = match self.dispatch.route(&label) {
            Ok(h) => h,
            Err(e) => {
                SchedulerCounters::incr(&self.counters.routing_failures);
                self.dead_letter(&label, batch, &e);
                return false;
            }
        };
        if let Err(e) = self.context.validate_messages(&batch, handler.label()) {
            SchedulerCounters::incr(&self.counters.validation_failures);
            self.dead_letter(&label, batch, &e);
            return false;
        }

        let fallback = batch.clone();
        let ctx = self.context.clone();
        let latency = Arc::clone(&self.latency);
        let span = info_span!(
            spans::DISPATCH_BATCH,
            tenant_id = %lease.key.tenant_id,
            mem_cube_id = %lease.key.mem_cube_id,
            label = %label,
            messages = batch.len()
        );
        let task = async move {
            let _lease = lease;
            let _timer = latency.start();
            match crate::handlers::handle(handler.as_ref(), &ctx, batch).await {
                Ok(report) if report.is_clean() => {
                    debug!(groups = report.processed_groups, events = report.events_emitted, "batch handled");
                }
                Ok(report) => {
                    warn!(
                        failed = report.failures.len(),
                        cancelled = report.cancelled_groups,
                        dropped_events = report.events_dropped,
                        "batch handled with failures"
                    );
                }
                Err(e) => error!(error = %e, "batch rejected"),
            }
        }
        .instrument(span);

        match self.pool.submit(task) {
            Ok(_handle) => {
                SchedulerCounters::incr(&self.counters.batches_dispatched);
                true
            }
            Err(e) => {
                self.dead_letter(&label, fallback, &e);
                false
            }
        }
    }

    fn dead_letter(&self, label: &str, batch: Vec<ScheduleMessage>, reason: &SchedulerError) {
        SchedulerCounters::incr(&self.counters.dead_lettered);
        self.dead_letters.push(label, batch, reason.to_string());
    }

    /// Reap idle, empty partitions. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let _span = info_span!(spans::EVICTION_PASS).entered();
        let evicted = self.streams.evict_idle(self.config.stream.idle_ttl());
        if evicted > 0 {
            SchedulerCounters::add(&self.counters.partitions_evicted, evicted as u64);
            debug!(evicted, remaining = self.streams.partition_count(), "idle partitions evicted");
        }
        evicted
    }

    /// Drain and dispatch until no message is queued or in flight.
    ///
    /// Follow-up messages submitted by handlers are processed too.
    pub async fn flush(&self) {
        loop {
            let dispatched = self.consume_once();
            self.pool.wait_idle().await;
            if dispatched == 0 && self.streams.is_empty() {
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Shutdown & recovery
    // -----------------------------------------------------------------------

    /// Stop the consumer loop and let in-flight batches finish.
    ///
    /// Messages still queued stay in their partitions. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "consumer task ended abnormally");
            }
        }
        self.pool.shutdown(true).await;
    }

    /// Ask running handlers to stop at their next group boundary.
    pub fn abort_in_flight(&self) {
        warn!(in_flight = self.in_flight.len(), "aborting in-flight batches");
        self.context.cancellation_token().cancel();
    }

    /// Re-enqueue every dead-lettered message. Returns how many were requeued.
    ///
    /// Messages that cannot be re-enqueued are dead-lettered again.
    pub async fn retry_dead_letters(&self) -> usize {
        let mut requeued = 0;
        for letter in self.dead_letters.drain() {
            let mut pending = letter.messages.into_iter();
            while let Some(msg) = pending.next() {
                if let Err(e) = self.streams.put(msg.clone()).await {
                    let mut rest = vec![msg];
                    rest.extend(pending);
                    self.dead_letter(&letter.label, rest, &e);
                    break;
                }
                SchedulerCounters::incr(&self.counters.enqueued);
                requeued += 1;
            }
        }
        info!(requeued, "dead letters retried");
        requeued
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    /// Dead-lettered batches.
    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> &SchedulerCounters {
        &self.counters
    }

    /// Counters rendered as Prometheus text.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.counters.snapshot().to_prometheus()
    }

    /// Batch handling latency.
    #[must_use]
    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// The partition store.
    #[must_use]
    pub fn streams(&self) -> &StreamPartitionStore {
        &self.streams
    }

    /// The dispatch map.
    #[must_use]
    pub fn dispatch_map(&self) -> &DispatchMap {
        &self.dispatch
    }

    /// Worker pool status.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Whether the consumer loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.consumer.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}
