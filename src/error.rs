//! Error taxonomy for the rollout core.
//!
//! Collaborator traits (policy, reward, tokenizer) return [`anyhow::Result`];
//! the environment maps their failures into [`RolloutError::RemoteService`] so
//! callers can tell data-pipeline bugs apart from service outages.

use crate::message::MessageKind;

/// Every way a rollout (or reward collection) can fail.
///
/// There is no partial-success mode: any of these aborts the current call.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// A record iterator has no further batches. The caller owns epoch
    /// boundaries and decides whether to stop or rebuild the iterator.
    #[error("{source_name} record source is exhausted")]
    SourceExhausted { source_name: &'static str },

    /// A record's kind does not match the iterator it was drawn from.
    #[error("record {index} has kind {found:?}, expected {expected:?}")]
    RecordKindMismatch {
        expected: MessageKind,
        found: MessageKind,
        index: usize,
    },

    /// A record references a system-prompt key that is not in the table.
    #[error("unknown system prompt key: {0}")]
    UnknownPromptKey(String),

    /// The generation or reward service failed.
    #[error("{service} service failed")]
    RemoteService {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The policy tokenizer could not encode a batch.
    #[error("tokenizer failed")]
    Tokenize(#[source] anyhow::Error),

    /// Parallel arrays (answers, rewards, token matrices) disagree in shape.
    #[error("shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The batch's reward has already been resolved.
    #[error("reward for this batch has already been collected")]
    RewardAlreadyCollected,

    /// Reward collection was requested but no scorer produced a handle.
    #[error("no reward scorer is configured for this environment")]
    NoRewardScorer,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RolloutError {
    /// Wrap a collaborator failure.
    pub fn remote(service: &'static str, source: anyhow::Error) -> Self {
        Self::RemoteService { service, source }
    }
}
