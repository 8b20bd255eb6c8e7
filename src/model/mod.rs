//! Model-service abstractions consumed by the rollout environment.
//!
//! This module provides:
//! - [`traits::PolicyService`] and [`traits::RewardService`] -- the contracts
//!   the environment needs from the generation and reward model servers.
//! - [`tokenizer`] -- the tokenizer contract, batch [`tokenizer::encode`], the
//!   policy model's Hugging Face tokenizer and a byte-level one for mocks.
//! - [`api`] -- HTTP clients for OpenAI-compatible generation and a `/reward`
//!   scoring endpoint.
//! - [`mock`] -- deterministic in-process services for tests and dry runs.

pub mod api;
pub mod mock;
pub mod tokenizer;
pub mod traits;

pub use api::{HttpPolicyService, HttpRewardService};
pub use mock::{MockPolicy, MockReward};
pub use tokenizer::{encode, ByteTokenizer, EncodedBatch, HfTokenizer, Tokenizer};
pub use traits::{
    GenerateRequest, GenerationOutput, InferOptions, PendingInference, PolicyService,
    RewardOutput, RewardService,
};
