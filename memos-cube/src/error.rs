//! Memory-cube error types.

use thiserror::Error;

use crate::types::MemoryRecord;

/// Errors raised by memory-cube backends and views.
#[derive(Debug, Error)]
pub enum CubeError {
    /// No cube is registered under the given id.
    #[error("Memory cube not found: {0}")]
    NotFound(String),

    /// The backing store (graph DB, vector DB, LLM reader) failed.
    #[error("Cube backend failure in {cube_id}: {reason}")]
    Backend {
        /// Cube whose backend failed.
        cube_id: String,
        /// Backend-specific failure description.
        reason: String,
    },

    /// The request could not be interpreted by the cube.
    #[error("Invalid cube request: {0}")]
    InvalidRequest(String),

    /// A fan-out write failed part way through.
    ///
    /// Writes made by earlier cubes are not rolled back; their records are
    /// carried in `completed`.
    #[error("Fan-out add failed at cube {failed_cube} after {} record(s) were written: {source}", .completed.len())]
    FanOut {
        /// Cube that raised the failure.
        failed_cube: String,
        /// Records already written by the cubes before `failed_cube`.
        completed: Vec<MemoryRecord>,
        /// The child failure.
        #[source]
        source: Box<CubeError>,
    },
}

impl CubeError {
    /// Shorthand for a backend failure.
    pub fn backend(cube_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Backend {
            cube_id: cube_id.into(),
            reason: reason.into(),
        }
    }

    /// Records that were durably written before the failure, if any.
    #[must_use]
    pub fn completed(&self) -> &[MemoryRecord] {
        match self {
            Self::FanOut { completed, .. } => completed,
            _ => &[],
        }
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, CubeError>;
