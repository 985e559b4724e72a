//! Core type definitions for the MemOS scheduler.
//!
//! Messages, stream keys, operation labels and event logs. Everything that
//! crosses a process boundary is serde-serializable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulerError;

// ---------------------------------------------------------------------------
// Operation labels
// ---------------------------------------------------------------------------

/// The closed set of memory operations the scheduler routes.
///
/// Adding a variant forces every exhaustive `match` over labels (the
/// dispatch registry in particular) to be extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLabel {
    /// A user query arrived.
    Query,
    /// An assistant answer was produced.
    Answer,
    /// New memories should be extracted and written.
    Add,
    /// Working memory should be refreshed for recent queries.
    MemUpdate,
    /// Raw memories should be run through the memory reader.
    MemRead,
    /// Memories should be merged / reorganized.
    MemOrganize,
    /// Preferences should be extracted from a conversation.
    PrefAdd,
    /// User feedback should be applied to memories.
    MemFeedback,
}

impl TaskLabel {
    /// Every label, in dispatch-table order.
    pub const ALL: [TaskLabel; 8] = [
        TaskLabel::Query,
        TaskLabel::Answer,
        TaskLabel::Add,
        TaskLabel::MemUpdate,
        TaskLabel::MemRead,
        TaskLabel::MemOrganize,
        TaskLabel::PrefAdd,
        TaskLabel::MemFeedback,
    ];

    /// Wire name of the label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Answer => "answer",
            Self::Add => "add",
            Self::MemUpdate => "mem_update",
            Self::MemRead => "mem_read",
            Self::MemOrganize => "mem_organize",
            Self::PrefAdd => "pref_add",
            Self::MemFeedback => "mem_feedback",
        }
    }

    /// Position of the label in [`TaskLabel::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskLabel {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownLabel(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Memory tiers (event-log vocabulary)
// ---------------------------------------------------------------------------

/// Memory tiers referenced by event logs as transition endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// Raw user / assistant input.
    UserInput,
    /// No memory tier involved.
    NotApplicable,
    /// Short-lived working memory.
    WorkingMemory,
    /// Long-term textual memory.
    LongTermMemory,
    /// Facts about the user.
    UserMemory,
    /// Extracted preferences.
    PreferenceMemory,
}

impl MemoryType {
    /// Wire name of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserInput => "UserInput",
            Self::NotApplicable => "NotApplicable",
            Self::WorkingMemory => "WorkingMemory",
            Self::LongTermMemory => "LongTermMemory",
            Self::UserMemory => "UserMemory",
            Self::PreferenceMemory => "PreferenceMemory",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A tagged memory-operation event submitted to the scheduler.
///
/// Consumed exactly once, by exactly one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMessage {
    /// Unique message id.
    #[serde(default = "new_item_id")]
    pub item_id: String,
    /// Tenant (user / account) the operation belongs to.
    #[serde(alias = "user_id")]
    pub tenant_id: String,
    /// Memory cube the operation targets.
    #[serde(alias = "cube_id")]
    pub mem_cube_id: String,
    /// Operation label. Kept as the raw wire string so that unknown labels
    /// still partition and can be dead-lettered at dispatch.
    pub label: String,
    /// Label-specific payload.
    pub content: String,
    /// Correlation id for event logs.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Submission time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

impl ScheduleMessage {
    /// Create a message for a known label.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        mem_cube_id: impl Into<String>,
        label: TaskLabel,
        content: impl Into<String>,
    ) -> Self {
        Self::with_raw_label(tenant_id, mem_cube_id, label.as_str(), content)
    }

    /// Create a message with an arbitrary label string.
    #[must_use]
    pub fn with_raw_label(
        tenant_id: impl Into<String>,
        mem_cube_id: impl Into<String>,
        label: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            item_id: new_item_id(),
            tenant_id: tenant_id.into(),
            mem_cube_id: mem_cube_id.into(),
            label: label.into(),
            content: content.into(),
            task_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Back-fill the correlation id.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Parse the label into the closed label set.
    ///
    /// # Errors
    /// Returns `SchedulerError::UnknownLabel` for labels outside the set.
    pub fn task_label(&self) -> Result<TaskLabel, SchedulerError> {
        self.label.parse()
    }

    /// The partition this message belongs to.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.tenant_id, &self.mem_cube_id, &self.label)
    }
}

/// Identifies one FIFO partition: (tenant, memory cube, operation label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Tenant id.
    pub tenant_id: String,
    /// Memory cube id.
    pub mem_cube_id: String,
    /// Raw operation label.
    pub label: String,
}

impl StreamKey {
    /// Build a key from its parts.
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        mem_cube_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            mem_cube_id: mem_cube_id.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.tenant_id, self.mem_cube_id, self.label)
    }
}

// ---------------------------------------------------------------------------
// Event logs
// ---------------------------------------------------------------------------

/// One line of event-log content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogContent {
    /// Human-readable content.
    pub content: String,
    /// Id of the message or memory this line refers to.
    pub ref_id: String,
    /// Speaker role, when the line is a chat turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl LogContent {
    /// A content line without a role.
    #[must_use]
    pub fn new(content: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ref_id: ref_id.into(),
            role: None,
        }
    }

    /// Attach a chat role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Append-only audit record of a memory-state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    /// Unique log id.
    pub item_id: String,
    /// Event kind, e.g. `addMessage`, `mergeMemory`.
    pub label: String,
    /// Source tier.
    pub from_memory_type: MemoryType,
    /// Destination tier.
    pub to_memory_type: MemoryType,
    /// Tenant the event belongs to.
    pub user_id: String,
    /// Cube the event belongs to.
    pub mem_cube_id: String,
    /// Content lines.
    pub content: Vec<LogContent>,
    /// Per-line structured metadata.
    pub metadata: Vec<serde_json::Value>,
    /// Number of memories involved.
    pub memory_len: usize,
    /// Display name of the cube.
    pub memcube_name: Option<String>,
    /// Correlation id of the originating message.
    pub task_id: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}
