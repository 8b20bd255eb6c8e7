//! Deterministic in-process services.
//!
//! [`MockPolicy`] and [`MockReward`] replay canned behaviour so the rollout
//! environment can be exercised end to end without model servers. Both keep
//! a log of the requests they received.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use crate::message::{last_user_turn, Conversation};
use crate::model::tokenizer::ByteTokenizer;
use crate::model::traits::{
    GenerateRequest, GenerationOutput, InferOptions, PolicyService, RewardOutput, RewardService,
};

/// A policy that answers `"answer: {last user turn}"` for every input.
#[derive(Debug, Default)]
pub struct MockPolicy {
    tokenizer: ByteTokenizer,
    fail: bool,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl MockPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy whose every generate call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: ByteTokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn answer(conversation: &Conversation) -> String {
        format!("answer: {}", last_user_turn(conversation).unwrap_or(""))
    }
}

impl PolicyService for MockPolicy {
    type Tokenizer = ByteTokenizer;

    async fn generate(&self, request: GenerateRequest) -> Result<GenerationOutput> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        if self.fail {
            anyhow::bail!("mock policy generation failed");
        }
        let answers: Vec<String> = request.inputs.iter().map(Self::answer).collect();
        let output_ids = answers
            .iter()
            .map(|a| a.bytes().map(i64::from).collect())
            .collect();
        Ok(GenerationOutput {
            output_ans_str: answers,
            output_ids: Some(output_ids),
            logprobs: None,
            metadata: serde_json::Value::Null,
        })
    }

    fn tokenizer(&self) -> &ByteTokenizer {
        &self.tokenizer
    }
}

/// A reward model that scores each conversation by the character length of
/// its final turn.
#[derive(Debug, Default)]
pub struct MockReward {
    delay: Option<Duration>,
    logit_width: Option<usize>,
    fail: bool,
    requests: Mutex<Vec<Vec<Conversation>>>,
}

impl MockReward {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before answering each inference.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Return `width` copies of the score per example instead of one.
    pub fn with_logit_width(mut self, width: usize) -> Self {
        self.logit_width = Some(width);
        self
    }

    /// A reward model whose every inference fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every batch of inputs received so far.
    pub fn requests(&self) -> Vec<Vec<Conversation>> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// The score this model assigns to `conversation`.
    pub fn score_of(conversation: &Conversation) -> f64 {
        conversation
            .last()
            .map_or(0.0, |m| m.content.chars().count() as f64)
    }
}

impl RewardService for MockReward {
    async fn infer(&self, inputs: Vec<Conversation>, _options: InferOptions) -> Result<RewardOutput> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("mock reward inference failed");
        }
        let width = self.logit_width.unwrap_or(1);
        let logits = inputs
            .iter()
            .map(|conv| vec![Self::score_of(conv); width])
            .collect();
        if let Ok(mut log) = self.requests.lock() {
            log.push(inputs);
        }
        Ok(RewardOutput { logits })
    }
}
