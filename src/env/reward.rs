//! Reward scoring of (prompt, generated answer) pairs.
//!
//! For every prompt record the scorer builds
//!
//! ```text
//! [system(rm_prompt) if rm_prompt != "default"] ++ record.message ++ [assistant(answer)]
//! ```
//!
//! and sends the batch to the reward model, either waiting for the result
//! ([`RewardScorer::score`]) or returning a [`RewardHandle`] to collect later
//! ([`RewardScorer::score_async`] / [`RewardScorer::collect`]). Failures of the
//! reward service are never retried and never replaced by a fallback value.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::RolloutError;
use crate::message::{ChatMessage, Conversation, MessageKind, MessageRecord, SystemPromptTable};
use crate::model::traits::{InferOptions, RewardOutput, RewardService};
use crate::timer::Timer;
use crate::trajectory::types::RewardHandle;

/// Wraps a reward service with input construction and logit extraction.
#[derive(Debug)]
pub struct RewardScorer<R> {
    service: Arc<R>,
    system_prompts: Arc<SystemPromptTable>,
    micro_batch_size: usize,
}

impl<R> Clone for RewardScorer<R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            system_prompts: Arc::clone(&self.system_prompts),
            micro_batch_size: self.micro_batch_size,
        }
    }
}

impl<R: RewardService> RewardScorer<R> {
    pub fn new(service: Arc<R>, system_prompts: Arc<SystemPromptTable>) -> Self {
        Self {
            service,
            system_prompts,
            micro_batch_size: 32,
        }
    }

    /// Sub-batch size forwarded to the reward service (default: 32).
    pub fn with_micro_batch_size(mut self, micro_batch_size: usize) -> Self {
        self.micro_batch_size = micro_batch_size;
        self
    }

    pub fn micro_batch_size(&self) -> usize {
        self.micro_batch_size
    }

    fn options(&self) -> InferOptions {
        InferOptions {
            output_logprobs: false,
            micro_batch_size: self.micro_batch_size,
        }
    }

    /// Build one reward-model conversation per Prompt-kind record.
    ///
    /// Records of any other kind are skipped.
    pub fn build_inputs(
        &self,
        records: &[MessageRecord],
        answers: &[String],
    ) -> Result<Vec<Conversation>, RolloutError> {
        if answers.len() != records.len() {
            return Err(RolloutError::ShapeMismatch {
                what: "answers per prompt",
                expected: records.len(),
                actual: answers.len(),
            });
        }

        let mut inputs = Vec::with_capacity(records.len());
        for (index, (record, answer)) in records.iter().zip(answers).enumerate() {
            if record.kind != MessageKind::Prompt {
                debug!(index, kind = ?record.kind, "skipping non-prompt record for reward");
                continue;
            }
            // Conditional reward model: domain-specific system prompt.
            let mut conversation = self.system_prompts.inject(&record.rm_prompt, &record.message)?;
            conversation.push(ChatMessage::assistant(answer.as_str()));
            inputs.push(conversation);
        }
        Ok(inputs)
    }

    /// Score synchronously. Returns one reward per Prompt-kind record.
    pub async fn score(
        &self,
        records: &[MessageRecord],
        answers: &[String],
        display: bool,
    ) -> Result<Vec<f64>, RolloutError> {
        let inputs = self.build_inputs(records, answers)?;
        log_first_input(&inputs, display);
        let expected = inputs.len();

        let output = {
            let _t = Timer::new("reward_model.infer");
            self.service
                .infer(inputs, self.options())
                .await
                .map_err(|e| RolloutError::remote("reward", e))?
        };
        squeeze_logits(output, expected)
    }

    /// Issue scoring without waiting. The returned handle must be passed to
    /// [`collect`](Self::collect).
    pub fn score_async(
        &self,
        records: &[MessageRecord],
        answers: &[String],
        display: bool,
    ) -> Result<RewardHandle, RolloutError> {
        let inputs = self.build_inputs(records, answers)?;
        log_first_input(&inputs, display);
        let expected = inputs.len();

        let _t = Timer::new("reward_model.infer_async");
        let pending = Arc::clone(&self.service).infer_async(inputs, self.options());
        debug!(request = %pending.id(), expected, "reward inference issued");
        Ok(RewardHandle::new(pending, expected))
    }

    /// Wait for a deferred scoring request and extract its rewards.
    ///
    /// Consumes the handle: each request resolves exactly once.
    pub async fn collect(&self, handle: RewardHandle) -> Result<Vec<f64>, RolloutError> {
        let RewardHandle { pending, expected } = handle;
        let output = {
            let _t = Timer::new("reward_model.infer_get");
            self.service
                .infer_collect(pending)
                .await
                .map_err(|e| RolloutError::remote("reward", e))?
        };
        squeeze_logits(output, expected)
    }
}

/// Squeeze the trailing singleton dimension of the reward logits.
///
/// Every row must hold exactly one value and there must be `expected` rows.
pub fn squeeze_logits(output: RewardOutput, expected: usize) -> Result<Vec<f64>, RolloutError> {
    if output.logits.len() != expected {
        return Err(RolloutError::ShapeMismatch {
            what: "reward logits rows",
            expected,
            actual: output.logits.len(),
        });
    }
    output
        .logits
        .into_iter()
        .map(|row| match row.as_slice() {
            [value] => Ok(*value),
            _ => Err(RolloutError::ShapeMismatch {
                what: "reward logits per example",
                expected: 1,
                actual: row.len(),
            }),
        })
        .collect()
}

fn log_first_input(inputs: &[Conversation], display: bool) {
    let Some(first) = inputs.first() else {
        return;
    };
    if display {
        info!(input = ?first, "[For Reward]");
    } else {
        debug!(input = ?first, "[For Reward]");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::mock::MockReward;

    fn table() -> Arc<SystemPromptTable> {
        Arc::new(
            [("helpful".to_string(), "Judge helpfulness.".to_string())]
                .into_iter()
                .collect(),
        )
    }

    fn records() -> Vec<MessageRecord> {
        vec![
            MessageRecord::prompt(vec![ChatMessage::user("hello")]),
            MessageRecord::prompt(vec![ChatMessage::user("how are you")]).with_rm_prompt("helpful"),
        ]
    }

    fn answers() -> Vec<String> {
        vec!["hi".into(), "fine, thanks".into()]
    }

    #[test]
    fn test_build_inputs_appends_answer_and_conditional_prompt() {
        let scorer = RewardScorer::new(Arc::new(MockReward::new()), table());
        let inputs = scorer.build_inputs(&records(), &answers()).unwrap();

        assert_eq!(inputs.len(), 2);
        assert_eq!(
            inputs[0],
            vec![ChatMessage::user("hello"), ChatMessage::assistant("hi")]
        );
        assert_eq!(inputs[1][0], ChatMessage::system("Judge helpfulness."));
        assert_eq!(inputs[1][2], ChatMessage::assistant("fine, thanks"));
    }

    #[test]
    fn test_build_inputs_skips_pretrain_records() {
        let scorer = RewardScorer::new(Arc::new(MockReward::new()), table());
        let mut recs = records();
        recs[0].kind = MessageKind::Pretrain;
        let inputs = scorer.build_inputs(&recs, &answers()).unwrap();
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn test_build_inputs_rejects_length_mismatch() {
        let scorer = RewardScorer::new(Arc::new(MockReward::new()), table());
        let err = scorer.build_inputs(&records(), &["only one".into()]).unwrap_err();
        assert!(matches!(err, RolloutError::ShapeMismatch { expected: 2, actual: 1, .. }));
    }

    #[tokio::test]
    async fn test_score_blocking() {
        let scorer = RewardScorer::new(Arc::new(MockReward::new()), table());
        let rewards = scorer.score(&records(), &answers(), false).await.unwrap();
        assert_eq!(rewards, vec![2.0, 12.0]);
    }

    #[tokio::test]
    async fn test_async_matches_blocking() {
        let service = Arc::new(MockReward::new().with_delay(Duration::from_millis(5)));
        let scorer = RewardScorer::new(service, table()).with_micro_batch_size(1);

        let blocking = scorer.score(&records(), &answers(), false).await.unwrap();
        let handle = scorer.score_async(&records(), &answers(), false).unwrap();
        assert_eq!(handle.expected(), 2);
        let deferred = scorer.collect(handle).await.unwrap();

        assert_eq!(blocking, deferred);
    }

    #[tokio::test]
    async fn test_score_async_returns_before_service_resolves() {
        let service = Arc::new(MockReward::new().with_delay(Duration::from_millis(200)));
        let scorer = RewardScorer::new(service, table());
        let handle = scorer.score_async(&records(), &answers(), false).unwrap();
        assert!(!handle.is_finished());
        assert_eq!(scorer.collect(handle).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_service_failure_propagates() {
        let scorer = RewardScorer::new(Arc::new(MockReward::failing()), table());
        let err = scorer.score(&records(), &answers(), false).await.unwrap_err();
        assert!(matches!(err, RolloutError::RemoteService { service: "reward", .. }));

        let handle = scorer.score_async(&records(), &answers(), false).unwrap();
        let err = scorer.collect(handle).await.unwrap_err();
        assert!(matches!(err, RolloutError::RemoteService { .. }));
    }

    #[tokio::test]
    async fn test_unknown_rm_prompt_fails_before_inference() {
        let service = Arc::new(MockReward::new());
        let scorer = RewardScorer::new(Arc::clone(&service), table());
        let recs = vec![MessageRecord::prompt(vec![ChatMessage::user("q")]).with_rm_prompt("legal")];
        let err = scorer.score(&recs, &["a".into()], false).await.unwrap_err();
        assert!(matches!(err, RolloutError::UnknownPromptKey(_)));
        assert!(service.requests().is_empty());
    }

    #[test]
    fn test_squeeze_logits() {
        let out = RewardOutput {
            logits: vec![vec![0.25], vec![-1.0]],
        };
        assert_eq!(squeeze_logits(out, 2).unwrap(), vec![0.25, -1.0]);
    }

    #[test]
    fn test_squeeze_rejects_wide_rows() {
        let out = RewardOutput {
            logits: vec![vec![0.25, 0.5]],
        };
        let err = squeeze_logits(out, 1).unwrap_err();
        assert!(matches!(err, RolloutError::ShapeMismatch { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn test_squeeze_rejects_row_count_mismatch() {
        let out = RewardOutput {
            logits: vec![vec![1.0]],
        };
        assert!(squeeze_logits(out, 3).is_err());
    }
}
