//! Input data contracts.
//!
//! - [`types::MessageRecord`] -- one prompt or pretraining conversation plus
//!   its system-prompt selectors.
//! - [`system_prompt::SystemPromptTable`] -- the shared, immutable table those
//!   selectors index into.

pub mod system_prompt;
pub mod types;

pub use system_prompt::SystemPromptTable;
pub use types::{
    last_user_turn, ChatMessage, Conversation, MessageBatch, MessageKind, MessageRecord,
    DEFAULT_PROMPT_KEY,
};
