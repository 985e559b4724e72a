//! # MemOS Scheduler Core
//!
//! Asynchronous task scheduling and dispatch for agent memory operations.
//!
//! Memory-operation messages (a query arrived, memories should be added,
//! preferences extracted, feedback applied...) are partitioned by
//! (tenant, memory cube, operation label) into bounded FIFO streams,
//! drained by a consumer loop, and executed on a bounded worker pool by
//! label-specific handlers:
//!
//! - **Streams** ([`stream`]): per-partition back-pressure; one saturated
//!   tenant never blocks another
//! - **Pool** ([`pool`]): at most `max_workers` batches run at once
//! - **Dispatch** ([`dispatch`]): a closed label set, checked exhaustively
//! - **Handlers** ([`handlers`]): validate, group by tenant and cube,
//!   isolate failures (and panics) per group, emit event logs
//!
//! Memory stores themselves live behind the `memos-cube` traits.
//!
//! ## Ordering Contract
//!
//! - FIFO within a partition, both for enqueue/dequeue and for processing
//! - No ordering across partitions
//! - A handler failure affects only its own (tenant, cube) group

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod dead_letter;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod stream;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod web_log;

pub use config::{EnqueuePolicy, SchedulerConfig};
pub use context::HandlerContext;
pub use dispatch::{DispatchMap, HandlerRegistry};
pub use error::SchedulerError;
pub use handlers::{BatchError, BatchResult, HandleReport, HandlerBatch, TaskHandler};
pub use pool::WorkerPool;
pub use scheduler::TaskScheduler;
pub use stream::StreamPartitionStore;
pub use types::*;
pub use web_log::{BufferedLogSink, WebLogSink};
