//! The rollout environment and its reward scorer.
//!
//! - [`rollout::TxtEnv`] -- pulls prompt (and pretrain) batches, drives the
//!   policy service and attaches rewards and pretrain tensors to a
//!   [`crate::trajectory::TrajectoryBatch`].
//! - [`reward::RewardScorer`] -- builds reward-model inputs and scores them
//!   synchronously or behind a deferred handle.

pub mod reward;
pub mod rollout;

pub use reward::{squeeze_logits, RewardScorer};
pub use rollout::{RecordIter, TxtEnv};
