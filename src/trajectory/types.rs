//! The trajectory batch produced by one rollout.
//!
//! A [`TrajectoryBatch`] is created by [`crate::env::TxtEnv::rollout`],
//! populated in order (generation, reward, pretrain), handed to the trainer
//! and then dropped.

use uuid::Uuid;

use crate::error::RolloutError;
use crate::message::MessageRecord;
use crate::model::tokenizer::EncodedBatch;
use crate::model::traits::{GenerationOutput, PendingInference};

/// Label value the loss ignores.
pub const IGNORE_INDEX: i64 = -100;

// ---------------------------------------------------------------------------
// Reward state
// ---------------------------------------------------------------------------

/// A deferred reward request, resolved by
/// [`crate::env::RewardScorer::collect`].
#[derive(Debug)]
pub struct RewardHandle {
    pub(crate) pending: PendingInference,
    /// Number of conversations submitted for scoring.
    pub(crate) expected: usize,
}

impl RewardHandle {
    pub fn new(pending: PendingInference, expected: usize) -> Self {
        Self { pending, expected }
    }

    /// Number of rewards this handle will resolve to.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Whether the reward service has already answered.
    pub fn is_finished(&self) -> bool {
        self.pending.is_finished()
    }
}

/// Where a batch's rewards are in their lifecycle.
///
/// Populated rewards and a pending handle can never coexist.
#[derive(Debug)]
pub enum RewardState {
    /// No reward scorer was configured; reward is computed elsewhere.
    Unscored,
    /// Scoring was issued and must be collected before optimization.
    Pending(RewardHandle),
    /// One scalar per prompt, index-aligned.
    Ready(Vec<f64>),
}

// ---------------------------------------------------------------------------
// Pretrain data
// ---------------------------------------------------------------------------

/// A tokenized language-modeling batch interleaved with the RL update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainData {
    /// `[batch, seq_len]` token ids.
    pub input_ids: Vec<Vec<i64>>,
    /// `input_ids` shifted left by one, last column [`IGNORE_INDEX`].
    pub labels: Vec<Vec<i64>>,
    /// `[batch, seq_len]`, 1 for real tokens.
    pub attention_mask: Vec<Vec<i64>>,
}

impl PretrainData {
    /// Derive labels for an encoded batch, checking that the mask matches the
    /// token matrix.
    pub fn from_encoded(encoded: EncodedBatch) -> Result<Self, RolloutError> {
        let (rows, width) = encoded.shape();
        let EncodedBatch {
            input_ids,
            attention_mask,
        } = encoded;

        if attention_mask.len() != rows {
            return Err(RolloutError::ShapeMismatch {
                what: "pretrain attention_mask rows",
                expected: rows,
                actual: attention_mask.len(),
            });
        }
        for (ids, mask) in input_ids.iter().zip(&attention_mask) {
            if ids.len() != width {
                return Err(RolloutError::ShapeMismatch {
                    what: "pretrain input_ids columns",
                    expected: width,
                    actual: ids.len(),
                });
            }
            if mask.len() != width {
                return Err(RolloutError::ShapeMismatch {
                    what: "pretrain attention_mask columns",
                    expected: width,
                    actual: mask.len(),
                });
            }
        }

        let labels = shift_labels(&input_ids);
        Ok(Self {
            input_ids,
            labels,
            attention_mask,
        })
    }

    /// `(rows, columns)` of the token matrix.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.input_ids.len(),
            self.input_ids.first().map_or(0, Vec::len),
        )
    }
}

/// Shift every row left by one and pad the final position with
/// [`IGNORE_INDEX`].
pub fn shift_labels(input_ids: &[Vec<i64>]) -> Vec<Vec<i64>> {
    input_ids
        .iter()
        .map(|row| {
            if row.is_empty() {
                return Vec::new();
            }
            let mut labels = Vec::with_capacity(row.len());
            labels.extend_from_slice(&row[1..]);
            labels.push(IGNORE_INDEX);
            labels
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Trajectory batch
// ---------------------------------------------------------------------------

/// Everything one rollout produced.
#[derive(Debug)]
pub struct TrajectoryBatch {
    /// Unique identifier (UUID v4).
    pub id: Uuid,
    /// The prompt records this batch was generated from.
    pub prompts: Vec<MessageRecord>,
    /// Policy output, index-aligned with `prompts`.
    pub generation: GenerationOutput,
    /// Reward lifecycle.
    pub reward: RewardState,
    /// `None` when no pretrain iterator is configured.
    pub pretrain_data: Option<PretrainData>,
}

impl TrajectoryBatch {
    pub fn new(prompts: Vec<MessageRecord>, generation: GenerationOutput) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompts,
            generation,
            reward: RewardState::Unscored,
            pretrain_data: None,
        }
    }

    /// Number of prompts (and answers) in the batch.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Generated answers, index-aligned with `prompts`.
    pub fn answers(&self) -> &[String] {
        &self.generation.output_ans_str
    }

    /// Resolved rewards, if any.
    pub fn rewards(&self) -> Option<&[f64]> {
        match &self.reward {
            RewardState::Ready(rewards) => Some(rewards),
            _ => None,
        }
    }

    /// Whether a reward request is still outstanding.
    pub fn is_pending(&self) -> bool {
        matches!(self.reward, RewardState::Pending(_))
    }

    /// Take the pending handle out of the batch.
    ///
    /// Leaves the batch `Unscored` until the caller stores the resolved
    /// rewards; a `Ready` batch is left untouched.
    pub(crate) fn take_pending(&mut self) -> Result<RewardHandle, RolloutError> {
        match std::mem::replace(&mut self.reward, RewardState::Unscored) {
            RewardState::Pending(handle) => Ok(handle),
            RewardState::Ready(rewards) => {
                self.reward = RewardState::Ready(rewards);
                Err(RolloutError::RewardAlreadyCollected)
            }
            RewardState::Unscored => Err(RolloutError::NoRewardScorer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;

    #[test]
    fn test_shift_labels() {
        let labels = shift_labels(&[vec![5, 6, 7, 8], vec![0, 0, 9, 10]]);
        assert_eq!(labels[0], vec![6, 7, 8, IGNORE_INDEX]);
        assert_eq!(labels[1], vec![0, 9, 10, IGNORE_INDEX]);
    }

    #[test]
    fn test_shift_labels_property() {
        let input_ids: Vec<Vec<i64>> = (0..4)
            .map(|r| (0..7).map(|c| r * 100 + c).collect())
            .collect();
        let labels = shift_labels(&input_ids);
        for (ids, lbl) in input_ids.iter().zip(&labels) {
            assert_eq!(lbl.len(), ids.len());
            for i in 0..ids.len() - 1 {
                assert_eq!(lbl[i], ids[i + 1]);
            }
            assert_eq!(*lbl.last().unwrap(), IGNORE_INDEX);
        }
    }

    #[test]
    fn test_shift_labels_empty_row() {
        assert_eq!(shift_labels(&[vec![]]), vec![Vec::<i64>::new()]);
    }

    #[test]
    fn test_pretrain_from_encoded_rejects_ragged_mask() {
        let encoded = EncodedBatch {
            input_ids: vec![vec![1, 2, 3]],
            attention_mask: vec![vec![1, 1]],
        };
        let err = PretrainData::from_encoded(encoded).unwrap_err();
        assert!(matches!(
            err,
            RolloutError::ShapeMismatch { expected: 3, actual: 2, .. }
        ));
    }

    #[test]
    fn test_take_pending_on_ready_keeps_rewards() {
        let mut batch = TrajectoryBatch::new(
            vec![MessageRecord::prompt(vec![ChatMessage::user("q")])],
            GenerationOutput::from_answers(vec!["a".into()]),
        );
        batch.reward = RewardState::Ready(vec![0.5]);
        let err = batch.take_pending().unwrap_err();
        assert!(matches!(err, RolloutError::RewardAlreadyCollected));
        assert_eq!(batch.rewards(), Some(&[0.5][..]));
    }

    #[test]
    fn test_take_pending_on_unscored() {
        let mut batch = TrajectoryBatch::new(Vec::new(), GenerationOutput::default());
        assert!(matches!(
            batch.take_pending().unwrap_err(),
            RolloutError::NoRewardScorer
        ));
    }
}
