//! In-memory cube fakes for handler unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use memos_cube::error::Result as CubeResult;
use memos_cube::{
    AddRequest, ChatMessage, CubeError, CubeView, FeedbackOutcome, FeedbackRequest, MemCube,
    MemCubeStore, MemoryRecord,
};
use parking_lot::Mutex;

use crate::config::EnqueuePolicy;
use crate::context::HandlerContext;
use crate::metrics::SchedulerCounters;
use crate::stream::StreamPartitionStore;
use crate::validation::LabelValidator;
use crate::web_log::BufferedLogSink;

/// A cube that answers every call deterministically and records it.
pub(crate) struct FakeCube {
    id: String,
    failing: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeCube {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            failing: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(id: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(id)
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &str, user_id: &str) -> CubeResult<()> {
        self.calls.lock().push(format!("{op}:{user_id}"));
        if self.failing {
            return Err(CubeError::backend(&self.id, format!("{op} failed")));
        }
        Ok(())
    }

    fn rec(&self, memory: impl Into<String>, id: impl Into<String>, tier: &str) -> MemoryRecord {
        MemoryRecord::new(memory, id, tier, &self.id)
    }
}

#[async_trait]
impl MemCube for FakeCube {
    fn cube_id(&self) -> &str {
        &self.id
    }

    async fn update_working_memory(&self, user_id: &str, queries: &[String]) -> CubeResult<Vec<MemoryRecord>> {
        self.record("update_working_memory", user_id)?;
        Ok(queries
            .iter()
            .enumerate()
            .map(|(i, q)| self.rec(q.clone(), format!("wm-{i}"), "WorkingMemory"))
            .collect())
    }

    async fn read_memories(&self, user_id: &str, memory_ids: &[String]) -> CubeResult<Vec<MemoryRecord>> {
        self.record("read_memories", user_id)?;
        Ok(memory_ids
            .iter()
            .map(|id| self.rec(format!("read {id}"), id.clone(), "LongTermMemory"))
            .collect())
    }

    async fn reorganize(&self, user_id: &str, memory_ids: &[String]) -> CubeResult<Vec<MemoryRecord>> {
        self.record("reorganize", user_id)?;
        Ok(vec![self.rec(
            format!("merged {}", memory_ids.join(",")),
            "merged-0",
            "LongTermMemory",
        )])
    }

    async fn add_preferences(&self, user_id: &str, messages: &[ChatMessage]) -> CubeResult<Vec<MemoryRecord>> {
        self.record("add_preferences", user_id)?;
        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, m)| self.rec(format!("prefers {}", m.content), format!("pref-{i}"), "PreferenceMemory"))
            .collect())
    }

    async fn apply_feedback(&self, user_id: &str, feedback: &FeedbackRequest) -> CubeResult<FeedbackOutcome> {
        self.record("apply_feedback", user_id)?;
        Ok(FeedbackOutcome {
            added: vec![self.rec(feedback.feedback_content.clone(), "fb-0", "LongTermMemory")],
            updated: feedback
                .retrieved_memory_ids
                .iter()
                .map(|id| self.rec(format!("revised {id}"), id.clone(), "LongTermMemory"))
                .collect(),
        })
    }
}

#[async_trait]
impl CubeView for FakeCube {
    fn cube_id(&self) -> &str {
        &self.id
    }

    async fn add_memories(&self, request: &AddRequest) -> CubeResult<Vec<MemoryRecord>> {
        self.record("add_memories", &request.user_id)?;
        Ok(request
            .messages
            .iter()
            .enumerate()
            .map(|(i, m)| self.rec(m.content.clone(), format!("{}-{i}", self.id), "LongTermMemory"))
            .collect())
    }
}

/// Registry over a fixed set of fake cubes.
pub(crate) struct FakeStore {
    cubes: HashMap<String, Arc<FakeCube>>,
}

impl FakeStore {
    pub(crate) fn new(cubes: Vec<Arc<FakeCube>>) -> Self {
        Self {
            cubes: cubes.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    fn lookup(&self, cube_id: &str) -> CubeResult<Arc<FakeCube>> {
        self.cubes
            .get(cube_id)
            .cloned()
            .ok_or_else(|| CubeError::NotFound(cube_id.to_string()))
    }
}

#[async_trait]
impl MemCubeStore for FakeStore {
    async fn get_mem_cube(&self, cube_id: &str) -> CubeResult<Arc<dyn MemCube>> {
        let cube: Arc<dyn MemCube> = self.lookup(cube_id)?;
        Ok(cube)
    }

    async fn get_cube_view(&self, cube_id: &str) -> CubeResult<Arc<dyn CubeView>> {
        let view: Arc<dyn CubeView> = self.lookup(cube_id)?;
        Ok(view)
    }
}

/// Context over a single cube, plus the sink it writes to.
pub(crate) fn context_with(cube: Arc<FakeCube>) -> (HandlerContext, Arc<BufferedLogSink>) {
    context_with_store(FakeStore::new(vec![cube]))
}

/// Context over an arbitrary fake store.
pub(crate) fn context_with_store(store: FakeStore) -> (HandlerContext, Arc<BufferedLogSink>) {
    let sink = Arc::new(BufferedLogSink::new(256));
    let ctx = HandlerContext::new(
        Arc::new(store),
        Arc::clone(&sink) as Arc<dyn crate::web_log::WebLogSink>,
        Arc::new(LabelValidator::default()),
        StreamPartitionStore::new(64, EnqueuePolicy::FailFast),
        Arc::new(SchedulerCounters::new()),
    );
    (ctx, sink)
}
