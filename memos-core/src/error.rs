//! Error types for the MemOS scheduler.

use memos_cube::CubeError;
use thiserror::Error;

use crate::types::StreamKey;

/// Top-level error type for all scheduler operations.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A message batch failed validation. The whole `handle()` call is aborted.
    #[error("Validation failed for {label} batch: {reason}")]
    Validation {
        /// Label of the handler that rejected the batch.
        label: String,
        /// What was wrong.
        reason: String,
    },

    /// Processing one (tenant, cube) group failed. Sibling groups are unaffected.
    #[error("Processing {label} for tenant {tenant_id} / cube {mem_cube_id} failed: {reason}")]
    GroupProcessing {
        /// Operation label.
        label: String,
        /// Tenant whose group failed.
        tenant_id: String,
        /// Cube whose group failed.
        mem_cube_id: String,
        /// Failure description.
        reason: String,
    },

    /// A message carried a label outside the closed label set.
    #[error("No handler registered for label '{0}'")]
    UnknownLabel(String),

    /// Startup configuration is invalid (bad config values, incomplete dispatch map).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A partition stayed full past the enqueue deadline (or the policy is fail-fast).
    #[error("Partition {key} is full (capacity {capacity}, waited {waited_ms}ms)")]
    PartitionFull {
        /// The saturated partition.
        key: StreamKey,
        /// Partition capacity.
        capacity: usize,
        /// How long the producer waited before giving up.
        waited_ms: u64,
    },

    /// No partition exists for the requested stream key.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamKey),

    /// The worker pool has been shut down.
    #[error("Worker pool is shut down")]
    PoolClosed,

    /// A pool task panicked.
    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    /// A pool task was aborted before completing.
    #[error("Task was cancelled")]
    TaskCancelled,

    /// A message's content could not be decoded for its label.
    #[error("Invalid {label} content in message {item_id}: {reason}")]
    InvalidContent {
        /// Operation label.
        label: String,
        /// Offending message.
        item_id: String,
        /// Decode failure.
        reason: String,
    },

    /// A memory-cube collaborator failed.
    #[error(transparent)]
    Cube(#[from] CubeError),

    /// The observability sink rejected event logs.
    #[error("Web log sink error: {0}")]
    Sink(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// Shorthand for a validation failure.
    pub fn validation(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error signals back-pressure the producer may retry on.
    #[must_use]
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::PartitionFull { .. })
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SchedulerError>;
