//! Event-log delivery.
//!
//! Handlers hand finished [`EventLog`]s to a [`WebLogSink`]. The bundled
//! [`BufferedLogSink`] keeps the most recent logs in memory for a poller
//! (a dashboard, an HTTP endpoint) to drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::WebLogConfig;
use crate::error::Result;
use crate::types::EventLog;

/// Destination for event logs.
#[async_trait]
pub trait WebLogSink: Send + Sync {
    /// Deliver a batch of event logs.
    ///
    /// # Errors
    /// Returns `SchedulerError::Sink` if the logs could not be delivered.
    async fn submit(&self, events: Vec<EventLog>) -> Result<()>;
}

/// Bounded in-memory sink. When full, the oldest log is dropped.
pub struct BufferedLogSink {
    buffer: Mutex<VecDeque<EventLog>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl BufferedLogSink {
    /// Keep at most `capacity` logs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Build from the `[web_log]` config section.
    #[must_use]
    pub fn from_config(config: &WebLogConfig) -> Self {
        Self::new(config.buffer_size)
    }

    /// Take every buffered log, oldest first.
    pub fn drain(&self) -> Vec<EventLog> {
        self.buffer.lock().drain(..).collect()
    }

    /// Buffered log count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Logs discarded because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WebLogSink for BufferedLogSink {
    async fn submit(&self, events: Vec<EventLog>) -> Result<()> {
        let mut buffer = self.buffer.lock();
        for event in events {
            if buffer.len() == self.capacity {
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            trace!(label = %event.label, user_id = %event.user_id, "buffering event log");
            buffer.push_back(event);
        }
        Ok(())
    }
}
