//! Operation handlers and the shared handling template.
//!
//! Every label's handler runs through [`handle`], which owns the parts that
//! must behave identically for all labels:
//!
//! 1. log receipt
//! 2. validate the whole batch (a failure aborts the batch)
//! 3. group messages by (tenant, cube), keeping first-seen group order and
//!    in-group order
//! 4. run the handler once per group, containing errors *and* panics so
//!    that one tenant's failure never reaches its siblings
//! 5. submit each group's event logs, including those a failed group
//!    produced for work it finished before failing
//!
//! Concrete handlers only implement [`TaskHandler::handle_batch`] for one
//! already-validated, single-tenant group.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;
use memos_cube::{CubeError, MemoryRecord};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::context::HandlerContext;
use crate::error::{Result, SchedulerError};
use crate::metrics::SchedulerCounters;
use crate::pool::panic_message;
use crate::types::{EventLog, LogContent, ScheduleMessage, TaskLabel};

pub mod add;
pub mod answer;
pub mod feedback;
pub mod mem_organize;
pub mod mem_read;
pub mod mem_update;
pub mod pref_add;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

pub use add::AddHandler;
pub use answer::AnswerHandler;
pub use feedback::FeedbackHandler;
pub use mem_organize::MemOrganizeHandler;
pub use mem_read::MemReadHandler;
pub use mem_update::MemUpdateHandler;
pub use pref_add::PrefAddHandler;
pub use query::QueryHandler;

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// One memory operation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The label this handler serves.
    fn label(&self) -> TaskLabel;

    /// Process one (tenant, cube) group and return the event logs to emit.
    ///
    /// Errors and panics are contained by [`handle`]; they fail this group only.
    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult;
}

/// A failed group, with the event logs of work that completed before the
/// failure. Those writes are not rolled back, so their logs are still emitted.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct BatchError {
    /// Event logs for messages handled before the failure.
    pub completed: Vec<EventLog>,
    /// Why the group failed.
    pub error: SchedulerError,
}

impl BatchError {
    /// A failure that happened after `completed` was already done.
    #[must_use]
    pub fn partial(completed: Vec<EventLog>, error: impl Into<SchedulerError>) -> Self {
        Self {
            completed,
            error: error.into(),
        }
    }
}

impl From<SchedulerError> for BatchError {
    fn from(error: SchedulerError) -> Self {
        Self::partial(Vec::new(), error)
    }
}

impl From<CubeError> for BatchError {
    fn from(error: CubeError) -> Self {
        Self::partial(Vec::new(), error)
    }
}

/// Outcome of one [`TaskHandler::handle_batch`] call.
pub type BatchResult = std::result::Result<Vec<EventLog>, BatchError>;

/// Turn an error into a [`BatchError`] that keeps the events gathered so far.
pub(crate) trait KeepCompleted<T> {
    fn keep_completed(self, events: &mut Vec<EventLog>) -> std::result::Result<T, BatchError>;
}

impl<T, E: Into<SchedulerError>> KeepCompleted<T> for std::result::Result<T, E> {
    fn keep_completed(self, events: &mut Vec<EventLog>) -> std::result::Result<T, BatchError> {
        self.map_err(|e| BatchError::partial(std::mem::take(events), e))
    }
}

/// Messages of one (tenant, cube) group, in arrival order.
#[derive(Debug, Clone)]
pub struct HandlerBatch {
    /// Tenant shared by every message.
    pub tenant_id: String,
    /// Cube shared by every message.
    pub mem_cube_id: String,
    /// Non-empty, FIFO-ordered messages.
    pub messages: Vec<ScheduleMessage>,
}

impl HandlerBatch {
    /// The most recent message of the group.
    #[must_use]
    pub fn last(&self) -> Option<&ScheduleMessage> {
        self.messages.last()
    }
}

/// Split a batch into (tenant, cube) groups.
///
/// Groups appear in the order their first message appears; messages keep
/// their relative order within a group.
#[must_use]
pub fn group_by_tenant_and_cube(messages: Vec<ScheduleMessage>) -> Vec<HandlerBatch> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut groups: Vec<HandlerBatch> = Vec::new();
    for msg in messages {
        let key = (msg.tenant_id.clone(), msg.mem_cube_id.clone());
        match index.get(&key) {
            Some(&i) => groups[i].messages.push(msg),
            None => {
                index.insert(key, groups.len());
                groups.push(HandlerBatch {
                    tenant_id: msg.tenant_id.clone(),
                    mem_cube_id: msg.mem_cube_id.clone(),
                    messages: vec![msg],
                });
            }
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A group that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    /// Tenant of the failed group.
    pub tenant_id: String,
    /// Cube of the failed group.
    pub mem_cube_id: String,
    /// Error or panic text.
    pub reason: String,
}

/// Outcome of one [`handle`] call.
#[derive(Debug, Clone)]
pub struct HandleReport {
    /// Label that was handled.
    pub label: TaskLabel,
    /// Groups that completed.
    pub processed_groups: usize,
    /// Event logs delivered to the sink.
    pub events_emitted: usize,
    /// Event logs the sink rejected.
    pub events_dropped: usize,
    /// Groups that failed, in processing order.
    pub failures: Vec<GroupFailure>,
    /// Groups skipped because cancellation was requested.
    pub cancelled_groups: usize,
}

impl HandleReport {
    fn new(label: TaskLabel) -> Self {
        Self {
            label,
            processed_groups: 0,
            events_emitted: 0,
            events_dropped: 0,
            failures: Vec::new(),
            cancelled_groups: 0,
        }
    }

    /// Whether every group completed and every event log was delivered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.cancelled_groups == 0 && self.events_dropped == 0
    }

    /// The failures as typed errors.
    #[must_use]
    pub fn errors(&self) -> Vec<SchedulerError> {
        self.failures
            .iter()
            .map(|f| SchedulerError::GroupProcessing {
                label: self.label.to_string(),
                tenant_id: f.tenant_id.clone(),
                mem_cube_id: f.mem_cube_id.clone(),
                reason: f.reason.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Run `handler` over `messages` with validation, grouping and isolation.
///
/// # Errors
/// Returns `SchedulerError::Validation` if the batch is rejected; in that
/// case no group is processed. Per-group failures are reported in the
/// [`HandleReport`], never as an `Err`.
pub async fn handle(
    handler: &dyn TaskHandler,
    ctx: &HandlerContext,
    messages: Vec<ScheduleMessage>,
) -> Result<HandleReport> {
    let label = handler.label();
    info!(label = %label, messages = messages.len(), "handler received batch");

    if let Err(e) = ctx.validate_messages(&messages, label) {
        SchedulerCounters::incr(&ctx.counters().validation_failures);
        warn!(label = %label, error = %e, "batch rejected by validation");
        return Err(e);
    }

    let mut report = HandleReport::new(label);
    for batch in group_by_tenant_and_cube(messages) {
        if ctx.is_cancelled() {
            report.cancelled_groups += 1;
            SchedulerCounters::incr(&ctx.counters().groups_cancelled);
            continue;
        }

        let outcome = AssertUnwindSafe(handler.handle_batch(ctx, &batch))
            .catch_unwind()
            .await;

        let (events, failure) = match outcome {
            Ok(Ok(events)) => (events, None),
            Ok(Err(BatchError { completed, error })) => (completed, Some(error.to_string())),
            Err(payload) => (
                Vec::new(),
                Some(format!("handler panicked: {}", panic_message(payload.as_ref()))),
            ),
        };
        emit(ctx, &batch, events, &mut report).await;

        let Some(reason) = failure else {
            report.processed_groups += 1;
            SchedulerCounters::incr(&ctx.counters().groups_processed);
            continue;
        };

        error!(
            label = %label,
            tenant_id = %batch.tenant_id,
            mem_cube_id = %batch.mem_cube_id,
            messages = batch.messages.len(),
            error = %reason,
            "group processing failed"
        );
        SchedulerCounters::incr(&ctx.counters().groups_failed);
        report.failures.push(GroupFailure {
            tenant_id: batch.tenant_id,
            mem_cube_id: batch.mem_cube_id,
            reason,
        });
    }

    info!(
        label = %label,
        processed = report.processed_groups,
        failed = report.failures.len(),
        cancelled = report.cancelled_groups,
        dropped_events = report.events_dropped,
        "handler finished batch"
    );
    Ok(report)
}

/// Submit one group's event logs, counting any the sink rejects.
async fn emit(ctx: &HandlerContext, batch: &HandlerBatch, events: Vec<EventLog>, report: &mut HandleReport) {
    let n = events.len();
    match ctx.submit_web_logs(events).await {
        Ok(()) => report.events_emitted += n,
        Err(e) => {
            warn!(
                label = %report.label,
                tenant_id = %batch.tenant_id,
                mem_cube_id = %batch.mem_cube_id,
                events = n,
                error = %e,
                "event logs dropped"
            );
            report.events_dropped += n;
            SchedulerCounters::add(&ctx.counters().events_dropped, n as u64);
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers for concrete handlers
// ---------------------------------------------------------------------------

/// Decode a message's JSON content.
pub(crate) fn parse_content<T: DeserializeOwned>(label: TaskLabel, msg: &ScheduleMessage) -> Result<T> {
    serde_json::from_str(&msg.content).map_err(|e| SchedulerError::InvalidContent {
        label: label.to_string(),
        item_id: msg.item_id.clone(),
        reason: e.to_string(),
    })
}

/// Event-log lines and metadata for a set of memory records.
pub(crate) fn record_lines(records: &[MemoryRecord]) -> (Vec<LogContent>, Vec<serde_json::Value>) {
    records
        .iter()
        .map(|r| {
            (
                LogContent::new(&r.memory, &r.memory_id),
                serde_json::json!({
                    "memory_id": r.memory_id,
                    "memory_type": r.memory_type,
                    "cube_id": r.cube_id,
                }),
            )
        })
        .unzip()
}
