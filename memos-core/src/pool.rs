//! Bounded worker pool for handler batches.
//!
//! Tasks are spawned onto the tokio runtime immediately but only start
//! running once they hold one of `max_workers` semaphore permits, so at
//! most `max_workers` batches execute concurrently. Excess submissions wait
//! in permit order.
//!
//! The pool is an explicit value owned by the scheduler and shared by
//! `Arc`. There is no process-wide instance.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::error::{Result, SchedulerError};

/// Bounded-concurrency executor.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    permits: Arc<Semaphore>,
    max_workers: usize,
    /// Submitted and not yet finished (queued + running).
    in_flight: AtomicUsize,
    /// Currently holding a permit.
    active: AtomicUsize,
    closed: AtomicBool,
    drained: Notify,
}

/// Point-in-time pool status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Concurrency limit.
    pub max_workers: usize,
    /// Tasks currently running.
    pub active: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Whether `shutdown` has been called.
    pub closed: bool,
}

/// Decrements `in_flight` when a submitted task finishes or is dropped.
struct InFlightGuard(Arc<PoolShared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    /// Create a pool running at most `max_workers` tasks at once.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            shared: Arc::new(PoolShared {
                permits: Arc::new(Semaphore::new(max_workers)),
                max_workers,
                in_flight: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                drained: Notify::new(),
            }),
        }
    }

    /// Size the pool as `min(cap, host parallelism + margin)`.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
        let workers = config.max_workers_cap.min(parallelism + config.worker_margin);
        info!(workers, parallelism, "worker pool sized");
        Self::new(workers)
    }

    /// Concurrency limit.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Submit a future. It runs once a worker is free.
    ///
    /// # Errors
    /// Returns `SchedulerError::PoolClosed` after `shutdown`.
    pub fn submit<F, T>(&self, fut: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::PoolClosed);
        }

        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(Arc::clone(&self.shared));
        let permits = Arc::clone(&self.shared.permits);

        let handle = tokio::spawn(async move {
            let guard = guard;
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SchedulerError::PoolClosed)?;
            guard.0.active.fetch_add(1, Ordering::AcqRel);
            let _active = ActiveGuard(&guard.0.active);
            Ok::<T, SchedulerError>(fut.await)
        });

        Ok(TaskHandle { inner: handle })
    }

    /// Stop accepting work.
    ///
    /// With `wait`, resolves once every submitted task has finished. Without
    /// it, tasks still waiting for a worker are abandoned and resolve to
    /// `PoolClosed`, while running tasks are left to complete. Calling twice
    /// is harmless.
    pub async fn shutdown(&self, wait: bool) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!(wait, in_flight = self.in_flight(), "worker pool shutting down");
        }
        if wait {
            self.wait_idle().await;
        }
        self.shared.permits.close();
    }

    /// Resolve once no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Queued plus running tasks.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let in_flight = self.in_flight();
        let active = self.shared.active.load(Ordering::Acquire);
        PoolStatus {
            max_workers: self.shared.max_workers,
            active,
            queued: in_flight.saturating_sub(active),
            closed: self.is_closed(),
        }
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    inner: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's output.
    ///
    /// # Errors
    /// `TaskPanicked` if the task panicked, `TaskCancelled` if it was
    /// aborted, `PoolClosed` if the pool shut down before it started.
    pub async fn join(self) -> Result<T> {
        self.inner.await.map_err(join_error)?
    }

    /// Cancel the task. Best effort: a task already past its last await
    /// point still completes.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Whether the task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

fn join_error(err: JoinError) -> SchedulerError {
    if err.is_panic() {
        SchedulerError::TaskPanicked(panic_message(err.into_panic().as_ref()))
    } else {
        SchedulerError::TaskCancelled
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
