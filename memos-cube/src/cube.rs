//! Memory-cube maintenance interface and the cube registry.
//!
//! These traits are implemented by the storage subsystems (tree text
//! memory over a graph DB, preference memory over a vector DB, feedback
//! server). The scheduler only ever talks to cubes through them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, FeedbackOutcome, FeedbackRequest, MemoryRecord};
use crate::view::CubeView;

/// Maintenance operations a scheduler handler can run against one cube.
#[async_trait]
pub trait MemCube: Send + Sync {
    /// The cube's id.
    fn cube_id(&self) -> &str;

    /// Refresh working memory for `user_id` given the latest queries.
    ///
    /// Returns the memories now in working memory.
    async fn update_working_memory(
        &self,
        user_id: &str,
        queries: &[String],
    ) -> Result<Vec<MemoryRecord>>;

    /// Run the memory reader over raw memories, promoting them to long-term memory.
    async fn read_memories(&self, user_id: &str, memory_ids: &[String]) -> Result<Vec<MemoryRecord>>;

    /// Merge / reorganize the given memories. Returns the merge targets.
    async fn reorganize(&self, user_id: &str, memory_ids: &[String]) -> Result<Vec<MemoryRecord>>;

    /// Extract and store preferences from a conversation.
    async fn add_preferences(
        &self,
        user_id: &str,
        messages: &[ChatMessage],
    ) -> Result<Vec<MemoryRecord>>;

    /// Apply user feedback to previously retrieved memories.
    async fn apply_feedback(&self, user_id: &str, feedback: &FeedbackRequest)
    -> Result<FeedbackOutcome>;
}

/// Lookup of cubes and cube views by id.
#[async_trait]
pub trait MemCubeStore: Send + Sync {
    /// Resolve a cube for maintenance operations.
    async fn get_mem_cube(&self, cube_id: &str) -> Result<Arc<dyn MemCube>>;

    /// Resolve a writable view of a single cube.
    async fn get_cube_view(&self, cube_id: &str) -> Result<Arc<dyn CubeView>>;

    /// Human-readable cube name for logs. Defaults to the id.
    fn map_memcube_name(&self, cube_id: &str) -> String {
        cube_id.to_string()
    }
}
