//! ANSWER: record the assistant's reply.

use async_trait::async_trait;

use super::{BatchResult, HandlerBatch, TaskHandler};
use crate::context::HandlerContext;
use crate::types::{EventLog, LogContent, MemoryType, TaskLabel};

/// Handles [`TaskLabel::Answer`].
#[derive(Debug, Default)]
pub struct AnswerHandler;

#[async_trait]
impl TaskHandler for AnswerHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::Answer
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        Ok(batch
            .messages
            .iter()
            .map(|msg| {
                ctx.create_event_log(
                    "addMessage",
                    MemoryType::UserInput,
                    MemoryType::NotApplicable,
                    msg,
                    vec![
                        LogContent::new(format!("[Assistant] {}", msg.content), &msg.item_id)
                            .with_role("assistant"),
                    ],
                    vec![serde_json::json!({ "ref_id": msg.item_id, "role": "assistant" })],
                )
            })
            .collect())
    }
}
