//! Rollout output types.
//!
//! This module provides:
//! - [`types::TrajectoryBatch`] -- generated answers, reward state and
//!   optional pretrain tensors for one rollout.
//! - [`types::RewardState`] / [`types::RewardHandle`] -- the reward lifecycle
//!   (unscored, pending, ready).
//! - [`types::PretrainData`] -- the interleaved language-modeling batch.
//! - [`recorder::RolloutRecorder`] -- JSONL dump of scored rollouts.

pub mod recorder;
pub mod types;

pub use recorder::{RolloutRecord, RolloutRecorder};
pub use types::{
    shift_labels, PretrainData, RewardHandle, RewardState, TrajectoryBatch, IGNORE_INDEX,
};
