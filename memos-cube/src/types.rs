//! Request and result payloads exchanged with memory cubes.

use serde::{Deserialize, Serialize};

/// A memory item written to, or read from, a cube.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The memory text.
    pub memory: String,
    /// Backend-assigned memory id.
    pub memory_id: String,
    /// Memory tier the item lives in (e.g. `LongTermMemory`, `UserMemory`).
    pub memory_type: String,
    /// Cube the item was written to.
    pub cube_id: String,
}

impl MemoryRecord {
    /// Create a new record.
    #[must_use]
    pub fn new(
        memory: impl Into<String>,
        memory_id: impl Into<String>,
        memory_type: impl Into<String>,
        cube_id: impl Into<String>,
    ) -> Self {
        Self {
            memory: memory.into(),
            memory_id: memory_id.into(),
            memory_type: memory_type.into(),
            cube_id: cube_id.into(),
        }
    }
}

/// One turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `user`, `assistant`, `system` or `tool`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A `user` turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// An `assistant` turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A request to extract and store memories from a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRequest {
    /// Owner of the memories.
    #[serde(default)]
    pub user_id: String,
    /// Conversation to extract memories from.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Cubes the memories should be written to. Empty means "the message's own cube".
    #[serde(default)]
    pub writable_cube_ids: Vec<String>,
    /// Optional session the conversation belongs to.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Tags attached to every extracted memory.
    #[serde(default)]
    pub custom_tags: Vec<String>,
}

impl AddRequest {
    /// Build a request from a single user utterance.
    #[must_use]
    pub fn from_text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            messages: vec![ChatMessage::user(text)],
            ..Self::default()
        }
    }
}

/// User feedback on previously retrieved memories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// The feedback text.
    #[serde(default)]
    pub feedback_content: String,
    /// Memories the feedback refers to.
    #[serde(default)]
    pub retrieved_memory_ids: Vec<String>,
    /// Conversation leading up to the feedback.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Session the feedback was given in.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Correlation id overriding the carrying message's task id.
    #[serde(default)]
    pub task_id: Option<String>,
}

/// What a cube did in response to feedback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackOutcome {
    /// Memories created from the feedback.
    pub added: Vec<MemoryRecord>,
    /// Memories rewritten because of the feedback.
    pub updated: Vec<MemoryRecord>,
}

impl FeedbackOutcome {
    /// Total number of touched memories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len()
    }

    /// Whether the feedback changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }
}
