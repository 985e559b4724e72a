//! PREF_ADD: extract preferences from a conversation.

use async_trait::async_trait;
use memos_cube::ChatMessage;

use super::{BatchResult, HandlerBatch, KeepCompleted, TaskHandler, parse_content, record_lines};
use crate::context::HandlerContext;
use crate::types::{EventLog, MemoryType, TaskLabel};

/// Handles [`TaskLabel::PrefAdd`]. Content is a JSON array of chat messages.
#[derive(Debug, Default)]
pub struct PrefAddHandler;

#[async_trait]
impl TaskHandler for PrefAddHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::PrefAdd
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let mut work = Vec::with_capacity(batch.messages.len());
        for msg in &batch.messages {
            let conversation: Vec<ChatMessage> = parse_content(TaskLabel::PrefAdd, msg)?;
            if !conversation.is_empty() {
                work.push((msg, conversation));
            }
        }
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let cube = ctx.get_mem_cube(&batch.mem_cube_id).await?;
        let mut events = Vec::new();
        for (msg, conversation) in work {
            let prefs = cube
                .add_preferences(&batch.tenant_id, &conversation)
                .await
                .keep_completed(&mut events)?;
            if prefs.is_empty() {
                continue;
            }
            let (content, metadata) = record_lines(&prefs);
            events.push(ctx.create_event_log(
                "addPreference",
                MemoryType::UserInput,
                MemoryType::PreferenceMemory,
                msg,
                content,
                metadata,
            ));
        }
        Ok(events)
    }
}
