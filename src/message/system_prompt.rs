//! Immutable table of named system prompts.
//!
//! Built once at startup (usually from [`crate::config::TxtRlConfig`]) and
//! shared read-only as `Arc<SystemPromptTable>` by every environment and
//! reward scorer in the process.

use std::collections::HashMap;

use crate::error::RolloutError;
use crate::message::types::{ChatMessage, Conversation, DEFAULT_PROMPT_KEY};

/// Mapping from prompt key to literal system-prompt text.
#[derive(Debug, Clone, Default)]
pub struct SystemPromptTable {
    prompts: HashMap<String, String>,
}

impl SystemPromptTable {
    /// Build a table from `(key, text)` pairs.
    pub fn new(prompts: HashMap<String, String>) -> Self {
        Self { prompts }
    }

    /// Number of registered prompts.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Look up the text registered for `key`.
    pub fn get(&self, key: &str) -> Result<&str, RolloutError> {
        self.prompts
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| RolloutError::UnknownPromptKey(key.to_string()))
    }

    /// Return `turns` with the system turn for `key` prepended, or an
    /// unchanged copy when `key` is `"default"`.
    pub fn inject(&self, key: &str, turns: &[ChatMessage]) -> Result<Conversation, RolloutError> {
        if key == DEFAULT_PROMPT_KEY {
            return Ok(turns.to_vec());
        }
        let mut conversation = Vec::with_capacity(turns.len() + 1);
        conversation.push(ChatMessage::system(self.get(key)?));
        conversation.extend_from_slice(turns);
        Ok(conversation)
    }
}

impl FromIterator<(String, String)> for SystemPromptTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            prompts: iter.into_iter().collect(),
        }
    }
}
