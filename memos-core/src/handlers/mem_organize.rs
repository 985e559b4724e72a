//! MEM_ORGANIZE: merge related memories.

use async_trait::async_trait;
use tracing::debug;

use super::{BatchResult, HandlerBatch, KeepCompleted, TaskHandler, parse_content, record_lines};
use crate::context::HandlerContext;
use crate::types::{EventLog, MemoryType, TaskLabel};

/// Handles [`TaskLabel::MemOrganize`]. Content is a JSON array of memory ids.
#[derive(Debug, Default)]
pub struct MemOrganizeHandler;

#[async_trait]
impl TaskHandler for MemOrganizeHandler {
    fn label(&self) -> TaskLabel {
        TaskLabel::MemOrganize
    }

    async fn handle_batch(&self, ctx: &HandlerContext, batch: &HandlerBatch) -> BatchResult {
        let mut work = Vec::with_capacity(batch.messages.len());
        for msg in &batch.messages {
            let ids: Vec<String> = parse_content(TaskLabel::MemOrganize, msg)?;
            if !ids.is_empty() {
                work.push((msg, ids));
            }
        }
        if work.is_empty() {
            return Ok(Vec::new());
        }

        let cube = ctx.get_mem_cube(&batch.mem_cube_id).await?;
        let mut events = Vec::new();
        for (msg, ids) in work {
            let merged = cube
                .reorganize(&batch.tenant_id, &ids)
                .await
                .keep_completed(&mut events)?;
            debug!(tenant_id = %batch.tenant_id, sources = ids.len(), targets = merged.len(), "memories merged");
            if merged.is_empty() {
                continue;
            }
            let (content, mut metadata) = record_lines(&merged);
            for entry in &mut metadata {
                entry["merged_from"] = serde_json::json!(ids);
            }
            events.push(ctx.create_event_log(
                "mergeMemory",
                MemoryType::LongTermMemory,
                MemoryType::LongTermMemory,
                msg,
                content,
                metadata,
            ));
        }
        Ok(events)
    }
}
