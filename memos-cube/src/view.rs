//! Cube views: the write path used by the ADD handler.
//!
//! A [`CubeView`] hides whether a request lands in one cube or many. The
//! [`CompositeCubeView`] fans a request out over a fixed, ordered list of
//! child views ("fast mode"):
//!
//! - children are written sequentially, in list order
//! - results are concatenated in the same order
//! - the first child failure stops the fan-out; records already written by
//!   earlier children are **not** rolled back and are returned inside
//!   [`CubeError::FanOut`]

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::{CubeError, Result};
use crate::types::{AddRequest, MemoryRecord};

/// A writable view over one or more logical memory cubes.
#[async_trait]
pub trait CubeView: Send + Sync {
    /// Identifier used in logs and fan-out errors.
    fn cube_id(&self) -> &str;

    /// Extract memories from `request` and write them.
    ///
    /// Every returned record carries at least its memory text, id, type and
    /// the cube it was written to.
    async fn add_memories(&self, request: &AddRequest) -> Result<Vec<MemoryRecord>>;
}

/// Fan-out view over a fixed ordered list of child views.
pub struct CompositeCubeView {
    id: String,
    views: Vec<Arc<dyn CubeView>>,
}

impl CompositeCubeView {
    /// Create a composite over `views`, written in the given order.
    #[must_use]
    pub fn new(views: Vec<Arc<dyn CubeView>>) -> Self {
        let id = views
            .iter()
            .map(|v| v.cube_id())
            .collect::<Vec<_>>()
            .join("+");
        Self { id, views }
    }

    /// Number of child views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether there are no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Child cube ids in write order.
    pub fn cube_ids(&self) -> impl Iterator<Item = &str> {
        self.views.iter().map(|v| v.cube_id())
    }
}

#[async_trait]
impl CubeView for CompositeCubeView {
    fn cube_id(&self) -> &str {
        &self.id
    }

    async fn add_memories(&self, request: &AddRequest) -> Result<Vec<MemoryRecord>> {
        let mut all_results = Vec::new();

        for view in &self.views {
            info!(cube_id = view.cube_id(), "fan-out add to cube");
            match view.add_memories(request).await {
                Ok(results) => all_results.extend(results),
                Err(e) => {
                    warn!(
                        cube_id = view.cube_id(),
                        written = all_results.len(),
                        error = %e,
                        "fan-out add failed; earlier cube writes are kept"
                    );
                    return Err(CubeError::FanOut {
                        failed_cube: view.cube_id().to_string(),
                        completed: all_results,
                        source: Box::new(e),
                    });
                }
            }
        }

        Ok(all_results)
    }
}
