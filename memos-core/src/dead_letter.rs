//! Dead-letter queue for batches the scheduler could not dispatch.
//!
//! A batch lands here when its label has no handler, when it fails
//! validation, or when the worker pool refuses it. Nothing is silently
//! dropped: the messages and the reason are kept until an operator
//! drains or retries them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::ScheduleMessage;

/// A batch that could not be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Raw label the batch carried.
    pub label: String,
    /// The undelivered messages, in their original order.
    pub messages: Vec<ScheduleMessage>,
    /// Why dispatch failed.
    pub reason: String,
    /// When the batch was dead-lettered.
    pub at: DateTime<Utc>,
}

/// Bounded FIFO of dead letters. The oldest entry is discarded when full.
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterQueue {
    /// Keep at most `capacity` batches.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Record an undeliverable batch.
    pub fn push(&self, label: impl Into<String>, messages: Vec<ScheduleMessage>, reason: impl Into<String>) {
        let letter = DeadLetter {
            label: label.into(),
            messages,
            reason: reason.into(),
            at: Utc::now(),
        };
        warn!(
            label = %letter.label,
            messages = letter.messages.len(),
            reason = %letter.reason,
            "batch dead-lettered"
        );

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            if let Some(evicted) = entries.pop_front() {
                warn!(label = %evicted.label, messages = evicted.messages.len(), "dead-letter queue full, discarding oldest");
            }
        }
        entries.push_back(letter);
    }

    /// Take every dead letter, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.entries.lock().drain(..).collect()
    }

    /// Copy of the current entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of dead-lettered batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
