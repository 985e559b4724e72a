//! QUERY: record the user's query and schedule a working-memory refresh.

use async_trait::async_trait;

use super::{BatchResult, HandlerBatch, KeepCompleted, TaskHandler};
use crate::context::HandlerContext;
use crate::types::{EventLog, LogContent, MemoryType, ScheduleMessage, TaskLabel};

/// Handles [`TaskLabel::Query`].
///
/// Each query is re-submitted as a [`TaskLabel::MemUpdate`] message for
/// the same tenant and cube, then logged as an `addMessage` event. A full
/// MEM_UPDATE partition fails the group; queries already re-submitted keep
/// their events.
#[derive(Debug, Default)]
pub struct QueryHandler;

#[async_trait]
impl TaskHandler for QueryHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Query
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let mut events = Vec::with_capacity(batch.messages.len());

        for msg in &batch.messages {
            let mut update = ScheduleMessage::new(
                &msg.tenant_id,
                &msg.mem_cube_id,
                TaskLabel::MemUpdate,
                &msg.content,
            );
            update.task_id.clone_from(&msg.task_id);
            ctx.submit_messages(vec![update]).await.keep_completed(&mut events)?;

            events.push(ctx.create_event_log(
                "addMessage",
                MemoryType::UserInput,
                MemoryType::NotApplicable,
                msg,
                vec![LogContent::new(format!("[User] {}", msg.content), &msg.item_id).with_role("user")],
                vec![serde_json::json!({ "ref_id": msg.item_id, "role": "user" })],
            ));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::handle;
    use crate::config::EnqueuePolicy;
    use crate::handlers::testing::{FakeCube, FakeStore, context_with};
    use crate::metrics::SchedulerCounters;
    use crate::stream::StreamPartitionStore;
    use crate::types::StreamKey;
    use crate::validation::LabelValidator;
    use crate::web_log::BufferedLogSink;
    use std::sync::Arc;

    #[tokio::test]
    async fn logs_query_and_schedules_working_memory_update() {
        let (ctx, sink) = context_with(Arc::new(FakeCube::new("c1")));
        let msg = ScheduleMessage::new("u1", "c1", TaskLabel::Query, "what did I eat?").with_task_id("t-7");

        let report = handle(&QueryHandler, &ctx, vec![msg]).await.expect("handled");
        assert!(report.is_clean());

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "addMessage");
        assert_eq!(events[0].content[0].content, "[User] what did I eat?");
        assert_eq!(events[0].to_memory_type, MemoryType::NotApplicable);
        assert_eq!(events[0].task_id.as_deref(), Some("t-7"));

        let key = StreamKey::new("u1", "c1", "mem_update");
        let follow_up = ctx.streams().get(&key).expect("partition").expect("message");
        assert_eq!(follow_up.content, "what did I eat?");
        assert_eq!(follow_up.task_id.as_deref(), Some("t-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn full_update_lane_fails_without_waiting_and_keeps_earlier_events() {
        let sink = Arc::new(BufferedLogSink::new(16));
        let ctx = HandlerContext::new(
            Arc::new(FakeStore::new(vec![Arc::new(FakeCube::new("c1"))])),
            Arc::clone(&sink) as Arc<dyn crate::web_log::WebLogSink>,
            Arc::new(LabelValidator::default()),
            StreamPartitionStore::new(1, EnqueuePolicy::Block),
            Arc::new(SchedulerCounters::new()),
        );
        let batch = vec![
            ScheduleMessage::new("u1", "c1", TaskLabel::Query, "first"),
            ScheduleMessage::new("u1", "c1", TaskLabel::Query, "second"),
        ];

        let report = tokio::time::timeout(std::time::Duration::from_secs(1), handle(&QueryHandler, &ctx, batch))
            .await
            .expect("a full lane never blocks the handler")
            .expect("validated");
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("mem_update"));

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content[0].content, "[User] first");
        assert_eq!(ctx.streams().qsize(&StreamKey::new("u1", "c1", "mem_update")).expect("qsize"), 1);
    }
}
