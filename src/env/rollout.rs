//! The text rollout environment.
//!
//! [`TxtEnv::rollout`] drives one environment-interaction cycle:
//!
//! 1. pull one batch of prompt records,
//! 2. build generation inputs (optionally prepending a system prompt),
//! 3. generate answers with the policy service,
//! 4. score them (blocking, or deferred behind a [`RewardHandle`]),
//! 5. pull, encode and attach one pretrain batch when a pretrain iterator is
//!    configured.
//!
//! The steps run strictly in sequence. Iterator cursors are owned by the
//! environment, so rollouts on one instance are serialized by `&mut self`.
//!
//! [`RewardHandle`]: crate::trajectory::RewardHandle

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RolloutConfig;
use crate::env::reward::RewardScorer;
use crate::error::RolloutError;
use crate::message::{Conversation, MessageBatch, MessageKind, MessageRecord, SystemPromptTable};
use crate::model::tokenizer::{encode, Tokenizer};
use crate::model::traits::{GenerateRequest, PolicyService, RewardService};
use crate::timer::Timer;
use crate::trajectory::types::{PretrainData, RewardState, TrajectoryBatch};

/// A pull-based source of record batches. `None` means exhausted.
pub type RecordIter = Box<dyn Iterator<Item = MessageBatch> + Send>;

/// A generic RL environment that generates textual sequences.
pub struct TxtEnv<R> {
    prompt_iter: RecordIter,
    pretrain_iter: Option<RecordIter>,
    system_prompts: Arc<SystemPromptTable>,
    reward_scorer: Option<RewardScorer<R>>,
    max_new_tokens: usize,
    actor_micro_bs: usize,
    reward_micro_bs: usize,
    async_reward: bool,
    max_pretrain_len: Option<usize>,
    generate_kwargs: serde_json::Map<String, serde_json::Value>,
}

impl<R: RewardService> TxtEnv<R> {
    /// Create an environment over `prompts` with default settings:
    /// 1024 new tokens, micro-batches of 32, asynchronous reward, no pretrain
    /// data and no reward scorer.
    pub fn new<I>(prompts: I, system_prompts: Arc<SystemPromptTable>) -> Self
    where
        I: IntoIterator<Item = MessageBatch>,
        I::IntoIter: Send + 'static,
    {
        Self {
            prompt_iter: Box::new(prompts.into_iter()),
            pretrain_iter: None,
            system_prompts,
            reward_scorer: None,
            max_new_tokens: 1024,
            actor_micro_bs: 32,
            reward_micro_bs: 32,
            async_reward: true,
            max_pretrain_len: None,
            generate_kwargs: serde_json::Map::new(),
        }
    }

    /// Interleave one batch from `pretrain` into every rollout.
    pub fn with_pretrain<I>(mut self, pretrain: I) -> Self
    where
        I: IntoIterator<Item = MessageBatch>,
        I::IntoIter: Send + 'static,
    {
        self.pretrain_iter = Some(Box::new(pretrain.into_iter()));
        self
    }

    /// Attach a reward scorer. Its micro-batch size is set to the
    /// environment's `reward_micro_bs`.
    pub fn with_reward_scorer(mut self, scorer: RewardScorer<R>) -> Self {
        self.reward_scorer = Some(scorer.with_micro_batch_size(self.reward_micro_bs));
        self
    }

    /// Apply rollout settings from configuration.
    pub fn with_config(mut self, config: &RolloutConfig) -> Self {
        self.max_new_tokens = config.max_new_tokens;
        self.actor_micro_bs = config.actor_micro_bs;
        self.reward_micro_bs = config.reward_micro_bs;
        self.async_reward = config.async_reward;
        self.generate_kwargs = config.generate_kwargs.clone();
        self.reward_scorer = self
            .reward_scorer
            .take()
            .map(|s| s.with_micro_batch_size(config.reward_micro_bs));
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_async_reward(mut self, async_reward: bool) -> Self {
        self.async_reward = async_reward;
        self
    }

    /// Truncate pretrain sequences to `max_len` tokens.
    pub fn with_max_pretrain_len(mut self, max_len: Option<usize>) -> Self {
        self.max_pretrain_len = max_len;
        self
    }

    pub fn reward_scorer(&self) -> Option<&RewardScorer<R>> {
        self.reward_scorer.as_ref()
    }

    /// Run one rollout.
    ///
    /// The prompt (and pretrain) batch is pulled before any service call, so
    /// a failed rollout has already consumed its batch: retrying the call
    /// moves on to the next batch rather than replaying the failed one.
    pub async fn rollout<P: PolicyService>(
        &mut self,
        policy: &P,
        display: bool,
    ) -> Result<TrajectoryBatch, RolloutError> {
        let prompt_datas = self
            .prompt_iter
            .next()
            .ok_or(RolloutError::SourceExhausted {
                source_name: "prompt",
            })?;

        let inputs = self.build_generation_inputs(&prompt_datas)?;
        if let Some(first) = inputs.first() {
            if display {
                info!(input = ?first, "[For Generate]");
            } else {
                debug!(input = ?first, "[For Generate]");
            }
        }

        let request = GenerateRequest {
            inputs,
            micro_batch_size: self.actor_micro_bs,
            max_new_tokens: self.max_new_tokens,
            output_str: true,
            generate_kwargs: self.generate_kwargs.clone(),
        };
        let generation = {
            let _t = Timer::new("policy_model.generate");
            policy
                .generate(request)
                .await
                .map_err(|e| RolloutError::remote("policy", e))?
        };
        if generation.len() != prompt_datas.len() {
            return Err(RolloutError::ShapeMismatch {
                what: "generated answers",
                expected: prompt_datas.len(),
                actual: generation.len(),
            });
        }
        info!(len = prompt_datas.len(), "[generate]");

        let mut batch = TrajectoryBatch::new(prompt_datas, generation);

        batch.reward = match &self.reward_scorer {
            Some(scorer) if self.async_reward => RewardState::Pending(scorer.score_async(
                &batch.prompts,
                batch.answers(),
                display,
            )?),
            Some(scorer) => {
                RewardState::Ready(scorer.score(&batch.prompts, batch.answers(), display).await?)
            }
            None => RewardState::Unscored,
        };

        batch.pretrain_data = self.next_pretrain(policy.tokenizer())?;

        Ok(batch)
    }

    /// Resolve a batch's pending reward, blocking until the reward service
    /// answers.
    ///
    /// Fails with [`RolloutError::RewardAlreadyCollected`] when the batch is
    /// already scored. If the reward service fails, the handle is spent and
    /// the batch is left unscored.
    pub async fn collect_rewards<'b>(
        &self,
        batch: &'b mut TrajectoryBatch,
    ) -> Result<&'b [f64], RolloutError> {
        let scorer = self
            .reward_scorer
            .as_ref()
            .ok_or(RolloutError::NoRewardScorer)?;
        let handle = batch.take_pending()?;
        let rewards = scorer.collect(handle).await?;
        if rewards.len() != batch.len() {
            return Err(RolloutError::ShapeMismatch {
                what: "rewards per prompt",
                expected: batch.len(),
                actual: rewards.len(),
            });
        }
        batch.reward = RewardState::Ready(rewards);
        Ok(batch.rewards().unwrap_or(&[]))
    }

    /// Generation input per record, with the system prompt prepended for
    /// non-default `sys_prompt` keys.
    fn build_generation_inputs(
        &self,
        records: &[MessageRecord],
    ) -> Result<Vec<Conversation>, RolloutError> {
        records
            .iter()
            .enumerate()
            .map(|(index, record)| {
                ensure_kind(record, MessageKind::Prompt, index)?;
                self.system_prompts.inject(&record.sys_prompt, &record.message)
            })
            .collect()
    }

    /// Pull and encode one pretrain batch, or `None` when no pretrain
    /// iterator is configured.
    fn next_pretrain<T: Tokenizer>(
        &mut self,
        tokenizer: &T,
    ) -> Result<Option<PretrainData>, RolloutError> {
        let Some(iter) = self.pretrain_iter.as_mut() else {
            return Ok(None);
        };
        let pretrain_datas = iter.next().ok_or(RolloutError::SourceExhausted {
            source_name: "pretrain",
        })?;

        let mut messages = Vec::with_capacity(pretrain_datas.len());
        for (index, record) in pretrain_datas.into_iter().enumerate() {
            ensure_kind(&record, MessageKind::Pretrain, index)?;
            messages.push(record.message);
        }

        let encoded =
            encode(&messages, tokenizer, self.max_pretrain_len).map_err(RolloutError::Tokenize)?;
        let data = PretrainData::from_encoded(encoded)?;
        let (rows, cols) = data.shape();
        info!(rows, cols, "[TxtEnv] gets pretrain data");
        Ok(Some(data))
    }
}

fn ensure_kind(
    record: &MessageRecord,
    expected: MessageKind,
    index: usize,
) -> Result<(), RolloutError> {
    if record.kind != expected {
        return Err(RolloutError::RecordKindMismatch {
            expected,
            found: record.kind,
            index,
        });
    }
    Ok(())
}
