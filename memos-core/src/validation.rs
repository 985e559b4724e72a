//! Batch validation run before any handler touches a message.

use crate::config::ValidationConfig;
use crate::error::{Result, SchedulerError};
use crate::types::{ScheduleMessage, TaskLabel};

/// Checks a batch before it is handled. A failure aborts the whole batch.
pub trait MessageValidator: Send + Sync {
    /// Validate every message in `messages` for `label`.
    ///
    /// # Errors
    /// Returns `SchedulerError::Validation` describing the first offending message.
    fn validate(&self, messages: &[ScheduleMessage], label: TaskLabel) -> Result<()>;
}

/// Default validator: label match, addressing and content length.
#[derive(Debug, Clone)]
pub struct LabelValidator {
    max_content_chars: usize,
}

impl LabelValidator {
    /// Accept content up to `max_content_chars` characters.
    #[must_use]
    pub fn new(max_content_chars: usize) -> Self {
        Self { max_content_chars }
    }

    /// Build from the `[validation]` config section.
    #[must_use]
    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(config.max_content_chars)
    }
}

impl Default for LabelValidator {
    fn default() -> Self {
        Self::from_config(&ValidationConfig::default())
    }
}

impl MessageValidator for LabelValidator {
    fn validate(&self, messages: &[ScheduleMessage], label: TaskLabel) -> Result<()> {
        for msg in messages {
            if msg.label != label.as_str() {
                return Err(SchedulerError::validation(
                    label.as_str(),
                    format!("message {} carries label '{}'", msg.item_id, msg.label),
                ));
            }
            if msg.tenant_id.is_empty() || msg.mem_cube_id.is_empty() {
                return Err(SchedulerError::validation(
                    label.as_str(),
                    format!("message {} has an empty tenant or cube id", msg.item_id),
                ));
            }
            let chars = msg.content.chars().count();
            if chars > self.max_content_chars {
                return Err(SchedulerError::validation(
                    label.as_str(),
                    format!(
                        "message {} content is {chars} chars (limit {})",
                        msg.item_id, self.max_content_chars
                    ),
                ));
            }
        }
        Ok(())
    }
}
