//! txtrl: the rollout core of an RLHF training loop.
//!
//! Drives a policy model server to answer a batch of prompts, scores the
//! answers with a reward model server (synchronously or deferred), optionally
//! interleaves a tokenized pretraining batch, and hands the resulting
//! [`trajectory::TrajectoryBatch`] to a PPO trainer.

pub mod config;
pub mod data;
pub mod env;
pub mod error;
pub mod message;
pub mod model;
pub mod timer;
pub mod trajectory;

pub use env::{RewardScorer, TxtEnv};
pub use error::RolloutError;
