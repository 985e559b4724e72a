//! MEM_FEEDBACK: apply user feedback to retrieved memories.

use async_trait::async_trait;
use memos_cube::{FeedbackRequest, MemoryRecord};

use super::{BatchResult, HandlerBatch, KeepCompleted, TaskHandler, parse_content};
use crate::context::HandlerContext;
use crate::error::Result;
use crate::types::{EventLog, LogContent, MemoryType, TaskLabel};

/// Handles [`TaskLabel::MemFeedback`]. Content is a [`FeedbackRequest`] JSON object.
///
/// A `task_id` inside the request overrides the carrying message's.
#[derive(Debug, Default)]
pub struct FeedbackHandler;

fn feedback_lines(
    operation: &str,
    records: &[MemoryRecord],
    content: &mut Vec<LogContent>,
    metadata: &mut Vec<serde_json::Value>,
) {
    for r in records {
        content.push(LogContent::new(&r.memory, &r.memory_id));
        metadata.push(serde_json::json!({
            "operation": operation,
            "memory_id": r.memory_id,
            "memory_type": r.memory_type,
            "cube_id": r.cube_id,
        }));
    }
}

#[async_trait]
impl TaskHandler for FeedbackHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemFeedback
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let requests = batch
            .messages
            .iter()
            .map(|msg| parse_content::<FeedbackRequest>(TaskLabel::MemFeedback, msg))
            .collect::<Result<Vec<_>>>()?;

        let cube = ctx.get_mem_cube(&batch.mem_cube_id).await?;
        let mut events = Vec::new();
        for (msg, request) in batch.messages.iter().zip(&requests) {
            let outcome = cube
                .apply_feedback(&batch.tenant_id, request)
                .await
                .keep_completed(&mut events)?;
            if outcome.is_empty() {
                continue;
            }

            let mut content = Vec::with_capacity(outcome.len());
            let mut metadata = Vec::with_capacity(outcome.len());
            feedback_lines("add", &outcome.added, &mut content, &mut metadata);
            feedback_lines("update", &outcome.updated, &mut content, &mut metadata);

            let mut event = ctx.create_event_log(
                "feedbackMemory",
                MemoryType::UserInput,
                MemoryType::LongTermMemory,
                msg,
                content,
                metadata,
            );
            if request.task_id.is_some() {
                event.task_id.clone_from(&request.task_id);
            }
            events.push(event);
        }
        Ok(events)
    }
}
