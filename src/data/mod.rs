//! Dataset plumbing that feeds the rollout environment's record iterators.

pub mod dataset;

pub use dataset::{DatasetSpec, MessageDataset};
