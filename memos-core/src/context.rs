//! Handler Context: the collaborator bundle every handler receives.
//!
//! Handlers never reach for globals. Cube lookup, event-log delivery,
//! validation, message re-submission and cancellation all go through the
//! [`HandlerContext`] they are called with.

use std::sync::Arc;

use chrono::Utc;
use memos_cube::{CubeView, MemCube, MemCubeStore};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::metrics::SchedulerCounters;
use crate::stream::StreamPartitionStore;
use crate::types::{EventLog, LogContent, MemoryType, ScheduleMessage, TaskLabel};
use crate::validation::MessageValidator;
use crate::web_log::WebLogSink;

/// Everything a handler may call out to.
///
/// Cloning is cheap; all collaborators are shared.
#[derive(Clone)]
pub struct HandlerContext {
    store: Arc<dyn MemCubeStore>,
    sink: Arc<dyn WebLogSink>,
    validator: Arc<dyn MessageValidator>,
    streams: StreamPartitionStore,
    cancel: CancellationToken,
    counters: Arc<SchedulerCounters>,
}

impl HandlerContext {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn MemCubeStore>,
        sink: Arc<dyn WebLogSink>,
        validator: Arc<dyn MessageValidator>,
        streams: StreamPartitionStore,
        counters: Arc<SchedulerCounters>,
    ) -> Self {
        Self {
            store,
            sink,
            validator,
            streams,
            cancel: CancellationToken::new(),
            counters,
        }
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    // -----------------------------------------------------------------------
    // Cube access
    // -----------------------------------------------------------------------

    /// Resolve a cube for maintenance operations.
    ///
    /// # Errors
    /// Propagates the store's `CubeError`.
    pub async fn get_mem_cube(&self, cube_id: &str) -> Result<Arc<dyn MemCube>> {
        Ok(self.store.get_mem_cube(cube_id).await?)
    }

    /// Resolve a writable view of one cube.
    ///
    /// # Errors
    /// Propagates the store's `CubeError`.
    pub async fn get_cube_view(&self, cube_id: &str) -> Result<Arc<dyn CubeView>> {
        Ok(self.store.get_cube_view(cube_id).await?)
    }

    /// Display name of a cube.
    #[must_use]
    pub fn map_memcube_name(&self, cube_id: &str) -> String {
        self.store.map_memcube_name(cube_id)
    }

    // -----------------------------------------------------------------------
    // Event logs
    // -----------------------------------------------------------------------

    /// Build an event log for a transition triggered by `message`.
    ///
    /// Tenant, cube, display name and `task_id` come from the message;
    /// `memory_len` is the number of content lines.
    #[must_use]
    pub fn create_event_log(
        &self,
        label: &str,
        from_memory_type: MemoryType,
        to_memory_type: MemoryType,
        message: &ScheduleMessage,
        content: Vec<LogContent>,
        metadata: Vec<serde_json::Value>,
    ) -> EventLog {
        EventLog {
            item_id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            from_memory_type,
            to_memory_type,
            user_id: message.tenant_id.clone(),
            mem_cube_id: message.mem_cube_id.clone(),
            memory_len: content.len(),
            content,
            metadata,
            memcube_name: Some(self.map_memcube_name(&message.mem_cube_id)),
            task_id: message.task_id.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Deliver event logs to the sink.
    ///
    /// # Errors
    /// Propagates the sink's failure.
    pub async fn submit_web_logs(&self, events: Vec<EventLog>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let n = events.len() as u64;
        self.sink.submit(events).await?;
        SchedulerCounters::add(&self.counters.events_emitted, n);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation & re-submission
    // -----------------------------------------------------------------------

    /// Run the validator over a whole batch.
    ///
    /// # Errors
    /// Returns `SchedulerError::Validation` from the validator.
    pub fn validate_messages(&self, messages: &[ScheduleMessage], label: TaskLabel) -> Result<()> {
        self.validator.validate(messages, label)
    }

    /// Enqueue follow-up messages from inside a handler.
    ///
    /// Never waits for a slot, whatever the enqueue policy: a full
    /// partition fails the submission immediately. Earlier messages stay
    /// enqueued.
    ///
    /// # Errors
    /// Returns the first enqueue failure (`PartitionFull`).
    pub async fn submit_messages(&self, messages: Vec<ScheduleMessage>) -> Result<()> {
        for message in messages {
            debug!(
                tenant_id = %message.tenant_id,
                mem_cube_id = %message.mem_cube_id,
                label = %message.label,
                "submitting follow-up message"
            );
            match self.streams.try_put(message).await {
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
    // Cancellation & shared state
    // -----------------------------------------------------------------------

    /// Whether handlers should stop at the next group boundary.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The shared cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> &SchedulerCounters {
        &self.counters
    }

    /// The partition store messages are submitted to.
    #[must_use]
    pub fn streams(&self) -> &StreamPartitionStore {
        &self.streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnqueuePolicy;
    use crate::error::SchedulerError;
    use crate::validation::LabelValidator;
    use crate::web_log::BufferedLogSink;
    use async_trait::async_trait;
    use memos_cube::CubeError;

    struct EmptyStore;

    #[async_trait]
    impl MemCubeStore for EmptyStore {
        async fn get_mem_cube(&self, cube_id: &str) -> memos_cube::error::Result<Arc<dyn MemCube>> {
            Err(CubeError::NotFound(cube_id.to_string()))
        }

        async fn get_cube_view(&self, cube_id: &str) -> memos_cube::error::Result<Arc<dyn CubeView>> {
            Err(CubeError::NotFound(cube_id.to_string()))
        }

        fn map_memcube_name(&self, cube_id: &str) -> String {
            format!("cube-{cube_id}")
        }
    }

    fn context(sink: Arc<BufferedLogSink>, maxsize: usize) -> HandlerContext {
        HandlerContext::new(
            Arc::new(EmptyStore),
            sink,
            Arc::new(LabelValidator::default()),
            StreamPartitionStore::new(maxsize, EnqueuePolicy::FailFast),
            Arc::new(SchedulerCounters::new()),
        )
    }

    #[test]
    fn event_log_is_filled_from_message() {
        let ctx = context(Arc::new(BufferedLogSink::new(8)), 8);
        let msg = ScheduleMessage::new("u1", "c1", TaskLabel::Query, "hi").with_task_id("t-1");
        let log = ctx.create_event_log(
            "addMessage",
            MemoryType::UserInput,
            MemoryType::NotApplicable,
            &msg,
            vec![LogContent::new("[User] hi", &msg.item_id)],
            vec![serde_json::json!({"ref_id": msg.item_id})],
        );
        assert_eq!(log.user_id, "u1");
        assert_eq!(log.mem_cube_id, "c1");
        assert_eq!(log.memory_len, 1);
        assert_eq!(log.memcube_name.as_deref(), Some("cube-c1"));
        assert_eq!(log.task_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn submitted_logs_reach_sink_and_are_counted() {
        let sink = Arc::new(BufferedLogSink::new(8));
        let ctx = context(Arc::clone(&sink), 8);
        let msg = ScheduleMessage::new("u1", "c1", TaskLabel::Answer, "ok");
        let log = ctx.create_event_log(
            "addMessage",
            MemoryType::UserInput,
            MemoryType::NotApplicable,
            &msg,
            Vec::new(),
            Vec::new(),
        );
        ctx.submit_web_logs(vec![log]).await.expect("submit");
        ctx.submit_web_logs(Vec::new()).await.expect("empty is a no-op");
        assert_eq!(sink.len(), 1);
        assert_eq!(ctx.counters().snapshot().events_emitted, 1);
    }

    #[tokio::test]
    async fn cube_lookup_errors_propagate() {
        let ctx = context(Arc::new(BufferedLogSink::new(8)), 8);
        let err = ctx.get_mem_cube("missing").await.err().expect("not found");
        assert!(matches!(err, SchedulerError::Cube(CubeError::NotFound(_))));
    }

    #[tokio::test]
    async fn resubmission_reports_back_pressure() {
        let ctx = context(Arc::new(BufferedLogSink::new(8)), 1);
        let first = ScheduleMessage::new("u1", "c1", TaskLabel::MemUpdate, "q1");
        let second = ScheduleMessage::new("u1", "c1", TaskLabel::MemUpdate, "q2");
        let err = ctx.submit_messages(vec![first, second]).await.expect_err("full");
        assert!(err.is_resource_exhaustion());
        let snap = ctx.counters().snapshot();
        assert_eq!(snap.enqueued, 1);
        assert_eq!(snap.enqueue_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resubmission_never_waits_under_blocking_policy() {
        let ctx = HandlerContext::new(
            Arc::new(EmptyStore),
            Arc::new(BufferedLogSink::new(8)),
            Arc::new(LabelValidator::default()),
            StreamPartitionStore::new(1, EnqueuePolicy::Block),
            Arc::new(SchedulerCounters::new()),
        );
        let batch = vec![
            ScheduleMessage::new("u1", "c1", TaskLabel::MemUpdate, "q1"),
            ScheduleMessage::new("u1", "c1", TaskLabel::MemUpdate, "q2"),
        ];
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), ctx.submit_messages(batch))
            .await
            .expect("returns without waiting for a slot");
        assert!(outcome.expect_err("full").is_resource_exhaustion());
        assert_eq!(ctx.streams().size(), 1);
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let ctx = context(Arc::new(BufferedLogSink::new(8)), 8);
        let clone = ctx.clone();
        ctx.cancellation_token().cancel();
        assert!(clone.is_cancelled());
    }
}
