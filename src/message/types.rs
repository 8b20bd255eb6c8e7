//! Message records: the atomic unit of rollout input.
//!
//! A [`MessageRecord`] carries one conversation (prompt turns or pretraining
//! text) together with the keys that select optional system prompts for the
//! policy and the reward model.

use serde::{Deserialize, Serialize};

/// Key meaning "no system prompt injection".
pub const DEFAULT_PROMPT_KEY: &str = "default";

/// A batch of records as yielded by a record iterator.
pub type MessageBatch = Vec<MessageRecord>;

/// An ordered sequence of chat turns.
pub type Conversation = Vec<ChatMessage>;

// ---------------------------------------------------------------------------
// Chat turns
// ---------------------------------------------------------------------------

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the author: `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// The textual content of the turn.
    pub content: String,
}

impl ChatMessage {
    /// Convenience constructor for a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Convenience constructor for a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Convenience constructor for an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Which iterator a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Prompt,
    Pretrain,
}

/// One input record drawn from a dataset iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Prompt or pretrain; must match the iterator it came from.
    #[serde(rename = "mes_type")]
    pub kind: MessageKind,
    /// The conversation turns.
    pub message: Conversation,
    /// Key into the system-prompt table for generation, or `"default"`.
    #[serde(default = "default_key")]
    pub sys_prompt: String,
    /// Key into the system-prompt table for conditional reward scoring, or
    /// `"default"`.
    #[serde(default = "default_key")]
    pub rm_prompt: String,
}

fn default_key() -> String {
    DEFAULT_PROMPT_KEY.to_string()
}

impl MessageRecord {
    /// A prompt record with no system-prompt injection.
    pub fn prompt(message: Conversation) -> Self {
        Self {
            kind: MessageKind::Prompt,
            message,
            sys_prompt: default_key(),
            rm_prompt: default_key(),
        }
    }

    /// A pretraining record.
    pub fn pretrain(message: Conversation) -> Self {
        Self {
            kind: MessageKind::Pretrain,
            message,
            sys_prompt: default_key(),
            rm_prompt: default_key(),
        }
    }

    /// Select a generation system prompt.
    pub fn with_sys_prompt(mut self, key: impl Into<String>) -> Self {
        self.sys_prompt = key.into();
        self
    }

    /// Select a conditional reward-model system prompt.
    pub fn with_rm_prompt(mut self, key: impl Into<String>) -> Self {
        self.rm_prompt = key.into();
        self
    }
}

/// Content of the last user turn, if any.
pub fn last_user_turn(conversation: &[ChatMessage]) -> Option<&str> {
    conversation
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
}
