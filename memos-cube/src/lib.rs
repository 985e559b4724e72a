//! # memos-cube: Memory-Cube Interfaces for MemOS
//!
//! A *memory cube* is a logical memory store (tree text memory, preference
//! memory, ...) addressed by an id. This crate defines the narrow surface the
//! scheduler uses to reach them:
//!
//!   - [`MemCube`]: maintenance operations run by scheduler handlers
//!   - [`MemCubeStore`]: id → cube / view lookup
//!   - [`CubeView`]: the write path for extracted memories
//!   - [`CompositeCubeView`]: fan-out of one write over several cubes
//!
//! Backends (graph DBs, vector DBs, LLM readers) live elsewhere and
//! implement these traits.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]

pub mod cube;
pub mod error;
pub mod types;
pub mod view;

pub use cube::{MemCube, MemCubeStore};
pub use error::CubeError;
pub use types::{AddRequest, ChatMessage, FeedbackOutcome, FeedbackRequest, MemoryRecord};
pub use view::{CompositeCubeView, CubeView};
