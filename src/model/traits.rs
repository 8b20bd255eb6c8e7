//! Collaborator contracts: the policy (generation) service and the reward
//! (scoring) service.
//!
//! Both are consumed, never implemented, by the rollout core. Methods return
//! `Send` futures so deferred reward inference can run on a spawned tokio
//! task while the trainer keeps working.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::message::Conversation;
use crate::model::tokenizer::Tokenizer;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// One blocking generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Conversations to answer, in order.
    pub inputs: Vec<Conversation>,
    /// Sub-batch size the service should use internally.
    pub micro_batch_size: usize,
    /// Upper bound on generated tokens per answer.
    pub max_new_tokens: usize,
    /// Whether decoded answer strings are wanted (not just token ids).
    pub output_str: bool,
    /// Opaque sampling configuration, forwarded verbatim.
    pub generate_kwargs: serde_json::Map<String, serde_json::Value>,
}

/// What the policy service returns for a [`GenerateRequest`].
///
/// Every per-input vector is index-aligned with `GenerateRequest::inputs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Decoded answer per input.
    pub output_ans_str: Vec<String>,
    /// Generated token ids per input, when the service reports them.
    #[serde(default)]
    pub output_ids: Option<Vec<Vec<i64>>>,
    /// Per-token log-probabilities per input, when the service reports them.
    #[serde(default)]
    pub logprobs: Option<Vec<Vec<f64>>>,
    /// Anything else the service attaches. Opaque to the rollout core.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl GenerationOutput {
    /// Output carrying only answer strings.
    pub fn from_answers(answers: Vec<String>) -> Self {
        Self {
            output_ans_str: answers,
            ..Self::default()
        }
    }

    /// Number of answers.
    pub fn len(&self) -> usize {
        self.output_ans_str.len()
    }

    pub fn is_empty(&self) -> bool {
        self.output_ans_str.is_empty()
    }
}

/// The policy model server.
pub trait PolicyService: Send + Sync {
    type Tokenizer: Tokenizer;

    /// Generate one answer per input conversation. Blocks (awaits) until the
    /// whole batch is done.
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> impl Future<Output = Result<GenerationOutput>> + Send;

    /// The tokenizer matching this policy, used to encode pretrain batches.
    fn tokenizer(&self) -> &Self::Tokenizer;
}

// ---------------------------------------------------------------------------
// Reward inference
// ---------------------------------------------------------------------------

/// Options for a reward inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferOptions {
    /// Whether per-token log-probabilities are wanted. The scorer never asks.
    pub output_logprobs: bool,
    /// Sub-batch size the service should use internally.
    pub micro_batch_size: usize,
}

/// Raw reward-model output: one logit row per example.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardOutput {
    pub logits: Vec<Vec<f64>>,
}

/// An in-flight reward inference.
///
/// Dropping it detaches the underlying task: the remote computation keeps
/// running and its result is discarded.
pub struct PendingInference {
    id: Uuid,
    task: JoinHandle<Result<RewardOutput>>,
}

impl PendingInference {
    /// Run `fut` on the tokio runtime and return immediately.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<RewardOutput>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            task: tokio::spawn(fut),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the inference has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the inference to resolve.
    pub async fn resolve(self) -> Result<RewardOutput> {
        self.task
            .await
            .with_context(|| format!("reward inference task {} did not complete", self.id))?
    }
}

impl fmt::Debug for PendingInference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingInference")
            .field("id", &self.id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// The reward model server.
pub trait RewardService: Send + Sync + 'static {
    /// Score a batch of conversations, each ending with the assistant answer.
    fn infer(
        &self,
        inputs: Vec<Conversation>,
        options: InferOptions,
    ) -> impl Future<Output = Result<RewardOutput>> + Send;

    /// Issue [`infer`](Self::infer) without waiting for it.
    fn infer_async(
        self: Arc<Self>,
        inputs: Vec<Conversation>,
        options: InferOptions,
    ) -> PendingInference {
        PendingInference::spawn(async move { self.infer(inputs, options).await })
    }

    /// Wait for a request issued with [`infer_async`](Self::infer_async).
    fn infer_collect(
        &self,
        pending: PendingInference,
    ) -> impl Future<Output = Result<RewardOutput>> + Send {
        pending.resolve()
    }
}
