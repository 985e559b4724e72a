//! MEM_UPDATE: refresh working memory for the group's recent queries.

use async_trait::async_trait;

use super::{BatchResult, HandlerBatch, TaskHandler, record_lines};
use crate::context::HandlerContext;
use crate::types::{EventLog, MemoryType, TaskLabel};

/// Handles [`TaskLabel::MemUpdate`].
///
/// All queries of a group go to the cube in one call; the resulting working
/// memory is logged against the most recent message.
#[derive(Debug, Default)]
pub struct MemUpdateHandler;

#[async_trait]
impl TaskHandler for MemUpdateHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemUpdate
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let Some(latest) = batch.last() else {
            return Ok(Vec::new());
        };
        let queries: Vec<String> = batch.messages.iter().map(|m| m.content.clone()).collect();

        let cube = ctx.get_mem_cube(&batch.mem_cube_id).await?;
        let working = cube.update_working_memory(&batch.tenant_id, &queries).await?;
        if working.is_empty() {
            return Ok(Vec::new());
        }

        let (content, metadata) = record_lines(&working);
        Ok(vec![ctx.create_event_log(
            "updateWorkingMemory",
            MemoryType::LongTermMemory,
            MemoryType::WorkingMemory,
            latest,
            content,
            metadata,
        )])
    }
}
