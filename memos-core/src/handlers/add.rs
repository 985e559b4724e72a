//! ADD: extract memories from a conversation and write them to every
//! writable cube.
//!
//! Content is either an [`AddRequest`] JSON object or plain text, which is
//! treated as a single user utterance. When the request names no writable
//! cubes the message's own cube is used.

use async_trait::async_trait;
use memos_cube::{AddRequest, CompositeCubeView, CubeError, CubeView, MemoryRecord};
use tracing::debug;

use super::{BatchError, BatchResult, HandlerBatch, KeepCompleted, TaskHandler, parse_content, record_lines};
use crate::context::HandlerContext;
use crate::error::Result;
use crate::types::{EventLog, MemoryType, ScheduleMessage, TaskLabel};

/// Handles [`TaskLabel::Add`].
#[derive(Debug, Default)]
pub struct AddHandler;

impl AddHandler {
    fn request_for(msg: &ScheduleMessage) -> Result<AddRequest> {
        let mut request = if msg.content.trim_start().starts_with('{') {
            parse_content::<AddRequest>(TaskLabel::Add, msg)?
        } else {
            AddRequest::from_text(&msg.tenant_id, &msg.content)
        };
        if request.user_id.is_empty() {
            request.user_id.clone_from(&msg.tenant_id);
        }
        if request.writable_cube_ids.is_empty() {
            request.writable_cube_ids.push(msg.mem_cube_id.clone());
        }
        Ok(request)
    }

    async fn composite_for(ctx: &HandlerContext, request: &AddRequest) -> Result<CompositeCubeView> {
        let mut views = Vec::with_capacity(request.writable_cube_ids.len());
        for cube_id in &request.writable_cube_ids {
            views.push(ctx.get_cube_view(cube_id).await?);
        }
        Ok(CompositeCubeView::new(views))
    }

    fn event(ctx: &HandlerContext, msg: &ScheduleMessage, records: &[MemoryRecord]) -> EventLog {
        let (content, metadata) = record_lines(records);
        ctx.create_event_log(
            "addMemory",
            MemoryType::UserInput,
            MemoryType::LongTermMemory,
            msg,
            content,
            metadata,
        )
    }
}

#[async_trait]
impl TaskHandler for AddHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Add
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let requests = batch
            .messages
            .iter()
            .map(Self::request_for)
            .collect::<Result<Vec<_>>>()?;

        let mut events = Vec::new();
        for (msg, request) in batch.messages.iter().zip(&requests) {
            let composite = Self::composite_for(ctx, request).await.keep_completed(&mut events)?;
            match composite.add_memories(request).await {
                Ok(records) => {
                    debug!(
                        tenant_id = %msg.tenant_id,
                        cubes = %composite.cube_id(),
                        records = records.len(),
                        "memories added"
                    );
                    if !records.is_empty() {
                        events.push(Self::event(ctx, msg, &records));
                    }
                }
                Err(err @ CubeError::FanOut { .. }) => {
                    // Earlier cubes kept their writes.
                    if !err.completed().is_empty() {
                        events.push(Self::event(ctx, msg, err.completed()));
                    }
                    return Err(BatchError::partial(events, err));
                }
                Err(err) => return Err(BatchError::partial(events, err)),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::handle;
    use crate::handlers::testing::{FakeCube, FakeStore, context_with, context_with_store};
    use std::sync::Arc;

    #[tokio::test]
    async fn plain_text_is_written_to_the_message_cube() {
        let cube = Arc::new(FakeCube::new("c1"));
        let (ctx, sink) = context_with(Arc::clone(&cube));
        let msg = ScheduleMessage::new("u1", "c1", TaskLabel::Add, "I like tea");

        let report = handle(&AddHandler, &ctx, vec![msg]).await.expect("handled");
        assert!(report.is_clean());
        assert_eq!(cube.calls(), vec!["add_memories:u1"]);

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].label, "addMemory");
        assert_eq!(events[0].to_memory_type, MemoryType::LongTermMemory);
        assert_eq!(events[0].content[0].content, "I like tea");
    }

    #[tokio::test]
    async fn request_fans_out_over_writable_cubes() {
        let a = Arc::new(FakeCube::new("a"));
        let b = Arc::new(FakeCube::new("b"));
        let (ctx, sink) = context_with_store(FakeStore::new(vec![Arc::clone(&a), Arc::clone(&b)]));
        let request = AddRequest {
            writable_cube_ids: vec!["a".into(), "b".into()],
            ..AddRequest::from_text("u1", "remember this")
        };
        let content = serde_json::to_string(&request).expect("encode");
        let msg = ScheduleMessage::new("u1", "a", TaskLabel::Add, content);

        handle(&AddHandler, &ctx, vec![msg]).await.expect("handled");
        assert_eq!(a.calls().len(), 1);
        assert_eq!(b.calls().len(), 1);

        let events = sink.drain();
        assert_eq!(events[0].memory_len, 2);
        let cubes: Vec<_> = events[0].metadata.iter().map(|m| m["cube_id"].clone()).collect();
        assert_eq!(cubes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn partial_fan_out_emits_completed_then_fails_group() {
        let a = Arc::new(FakeCube::new("a"));
        let b = Arc::new(FakeCube::failing("b"));
        let c = Arc::new(FakeCube::new("c"));
        let (ctx, sink) = context_with_store(FakeStore::new(vec![
            Arc::clone(&a),
            Arc::clone(&b),
            Arc::clone(&c),
        ]));
        let request = AddRequest {
            writable_cube_ids: vec!["a".into(), "b".into(), "c".into()],
            ..AddRequest::from_text("u1", "fan me out")
        };
        let msg = ScheduleMessage::new("u1", "a", TaskLabel::Add, serde_json::to_string(&request).expect("encode"));

        let report = handle(&AddHandler, &ctx, vec![msg]).await.expect("validated");
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("at cube b"));
        assert!(c.calls().is_empty(), "fan-out stops at the failing cube");

        let events = sink.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].memory_len, 1);
        assert_eq!(events[0].metadata[0]["cube_id"], "a");
    }

    #[tokio::test]
    async fn malformed_request_fails_only_its_group() {
        let c1 = Arc::new(FakeCube::new("c1"));
        let (ctx, sink) = context_with(Arc::clone(&c1));
        let batch = vec![
            ScheduleMessage::new("bad", "c1", TaskLabel::Add, "{not json"),
            ScheduleMessage::new("good", "c1", TaskLabel::Add, "hello"),
        ];
        let report = handle(&AddHandler, &ctx, batch).await.expect("validated");
        assert_eq!(report.processed_groups, 1);
        assert_eq!(report.failures[0].tenant_id, "bad");
        assert!(report.failures[0].reason.contains("Invalid add content"));
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn missing_cube_mid_group_keeps_earlier_events() {
        let c1 = Arc::new(FakeCube::new("c1"));
        let (ctx, sink) = context_with(Arc::clone(&c1));
        let orphan = AddRequest {
            writable_cube_ids: vec!["missing".into()],
            ..AddRequest::from_text("u1", "second")
        };
        let batch = vec![
            ScheduleMessage::new("u1", "c1", TaskLabel::Add, "first"),
            ScheduleMessage::new("u1", "c1", TaskLabel::Add, serde_json::to_string(&orphan).expect("encode")),
        ];

        let report = handle(&AddHandler, &ctx, batch).await.expect("validated");
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].reason.contains("missing"));
        assert_eq!(c1.calls(), vec!["add_memories:u1"]);

        let events = sink.drain();
        assert_eq!(events.len(), 1, "the completed write is still logged");
        assert_eq!(events[0].content[0].content, "first");
    }

    #[test]
    fn composite_id_names_all_cubes() {
        let a: Arc<dyn CubeView> = Arc::new(FakeCube::new("a"));
        let b: Arc<dyn CubeView> = Arc::new(FakeCube::new("b"));
        assert_eq!(CompositeCubeView::new(vec![a, b]).cube_id(), "a+b");
    }
}
