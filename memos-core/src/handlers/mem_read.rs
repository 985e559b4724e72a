//! MEM_READ: run raw memories through the cube's memory reader.

use async_trait::async_trait;

use super::{BatchResult, HandlerBatch, KeepCompleted, TaskHandler, parse_content, record_lines};
use crate::context::HandlerContext;
use crate::types::{EventLog, MemoryType, TaskLabel};

/// Handles [`TaskLabel::MemRead`]. Content is a JSON array of memory ids.
#[derive(Debug, Default)]
pub struct MemReadHandler;

#[async_trait]
impl TaskHandler for MemReadHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemRead
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let mut work = Vec::with_capacity(batch.messages.len());
        for msg in &batch.messages {
            let ids: Vec<String> = parse_content(TaskLabel::MemRead, msg)?;
            if !ids.is_empty() {
                work.push((msg, ids));
            }
        }
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let cube = ctx.get_mem_cube(&batch.mem_cube_id).await?;
        let mut events = Vec::with_capacity(work.len());
        for (msg, ids) in work {
            let records = cube
                .read_memories(&batch.tenant_id, &ids)
                .await
                .keep_completed(&mut events)?;
            let (content, metadata) = record_lines(&records);
            events.push(ctx.create_event_log(
                "readMemory",
                MemoryType::UserInput,
                MemoryType::LongTermMemory,
                msg,
                content,
                metadata,
            ));
        }
        Ok(events)
    }
}
