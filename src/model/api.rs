//! HTTP-backed policy and reward services.
//!
//! [`HttpPolicyService`] talks to an OpenAI-compatible chat completions API
//! (vLLM, TGI, ...). [`HttpRewardService`] posts batches of scored
//! conversations to a reward server's `/reward` endpoint and expects one
//! logit row per conversation back.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::message::{ChatMessage, Conversation};
use crate::model::tokenizer::HfTokenizer;
use crate::model::traits::{
    GenerateRequest, GenerationOutput, InferOptions, PolicyService, RewardOutput, RewardService,
};

// ---------------------------------------------------------------------------
// Chat completion wire types
// ---------------------------------------------------------------------------

/// Token-level log-probability information returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLogProb {
    pub token: String,
    pub logprob: f64,
}

/// Log-probability information attached to a choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceLogProbs {
    pub content: Option<Vec<TokenLogProb>>,
}

/// A single completion choice returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: ChatMessage,
    /// The reason the model stopped generating (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<ChoiceLogProbs>,
}

/// Token usage statistics for a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// A chat completion response from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

/// One generated answer extracted from a [`ChatResponse`].
#[derive(Debug, Clone, Default)]
struct Completion {
    text: String,
    logprobs: Vec<f64>,
    completion_tokens: usize,
}

impl From<ChatResponse> for Completion {
    fn from(resp: ChatResponse) -> Self {
        let completion_tokens = resp.usage.completion_tokens;
        let first = resp.choices.into_iter().next();
        let logprobs = first
            .as_ref()
            .and_then(|c| c.logprobs.as_ref())
            .and_then(|lp| lp.content.as_ref())
            .map(|tokens| tokens.iter().map(|t| t.logprob).collect())
            .unwrap_or_default();
        Self {
            text: first.map(|c| c.message.content).unwrap_or_default(),
            logprobs,
            completion_tokens,
        }
    }
}

/// Build the request body for one conversation.
///
/// `generate_kwargs` are merged in verbatim but never override `model`,
/// `messages` or `max_tokens`.
fn chat_body(
    model: &str,
    messages: &[ChatMessage],
    max_new_tokens: usize,
    generate_kwargs: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    let mut body = generate_kwargs.clone();
    body.insert("model".into(), model.into());
    body.insert("messages".into(), serde_json::json!(messages));
    body.insert("max_tokens".into(), max_new_tokens.into());
    serde_json::Value::Object(body)
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("failed to build reqwest client")
}

// ---------------------------------------------------------------------------
// Policy service
// ---------------------------------------------------------------------------

/// Policy service backed by an OpenAI-compatible `/chat/completions` API.
///
/// One request is issued per conversation; at most `micro_batch_size`
/// requests are in flight at a time. Answers are returned in input order.
#[derive(Debug, Clone)]
pub struct HttpPolicyService {
    api_base: String,
    api_key: String,
    model_id: String,
    http: reqwest::Client,
    tokenizer: HfTokenizer,
}

impl HttpPolicyService {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model_id: &str,
        tokenizer: HfTokenizer,
    ) -> Result<Self> {
        Ok(Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            http: http_client()?,
            tokenizer,
        })
    }

    /// Calls `POST {base_url}/chat/completions` for a single conversation.
    async fn complete(
        http: reqwest::Client,
        url: String,
        api_key: String,
        body: serde_json::Value,
    ) -> Result<Completion> {
        let resp = http
            .post(&url)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send chat completion request")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion API returned {status}: {text}");
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .context("failed to parse chat completion response")?;
        Ok(chat.into())
    }
}

/// Put completions back in input order. `JoinSet::join_next` yields them in
/// finish order.
fn reassemble(indexed: Vec<(usize, Completion)>, n: usize) -> Result<Vec<Completion>> {
    let mut slots: Vec<Option<Completion>> = vec![None; n];
    for (index, completion) in indexed {
        let slot = slots
            .get_mut(index)
            .with_context(|| format!("completion index {index} out of range for {n} inputs"))?;
        *slot = Some(completion);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.with_context(|| format!("no completion for input {index}")))
        .collect()
}

/// Logprobs are reported only when the server returned some for at least
/// one answer.
fn generation_output(completions: Vec<Completion>) -> GenerationOutput {
    let completion_tokens: usize = completions.iter().map(|c| c.completion_tokens).sum();
    let logprobs = if completions.iter().all(|c| c.logprobs.is_empty()) {
        None
    } else {
        Some(completions.iter().map(|c| c.logprobs.clone()).collect())
    };
    GenerationOutput {
        output_ans_str: completions.into_iter().map(|c| c.text).collect(),
        output_ids: None,
        logprobs,
        metadata: serde_json::json!({ "completion_tokens": completion_tokens }),
    }
}

impl PolicyService for HttpPolicyService {
    type Tokenizer = HfTokenizer;

    async fn generate(&self, request: GenerateRequest) -> Result<GenerationOutput> {
        let url = format!("{}/chat/completions", self.api_base);
        let micro_bs = request.micro_batch_size.max(1);
        let mut indexed = Vec::with_capacity(request.inputs.len());

        for (chunk_idx, chunk) in request.inputs.chunks(micro_bs).enumerate() {
            debug!(chunk = chunk_idx, size = chunk.len(), "sending generation micro-batch");
            let mut set = JoinSet::new();
            for (offset, conversation) in chunk.iter().enumerate() {
                let index = chunk_idx * micro_bs + offset;
                let body = chat_body(
                    &self.model_id,
                    conversation,
                    request.max_new_tokens,
                    &request.generate_kwargs,
                );
                let fut = Self::complete(
                    self.http.clone(),
                    url.clone(),
                    self.api_key.clone(),
                    body,
                );
                set.spawn(async move { (index, fut.await) });
            }
            while let Some(joined) = set.join_next().await {
                let (index, completion) = joined.context("generation task did not complete")?;
                indexed.push((index, completion?));
            }
        }

        let output = generation_output(reassemble(indexed, request.inputs.len())?);
        info!(
            model = %self.model_id,
            answers = output.len(),
            completion_tokens = %output.metadata["completion_tokens"],
            "generation succeeded"
        );
        Ok(output)
    }

    fn tokenizer(&self) -> &HfTokenizer {
        &self.tokenizer
    }
}

// ---------------------------------------------------------------------------
// Reward service
// ---------------------------------------------------------------------------

/// Reward service backed by `POST {base_url}/reward`.
///
/// Request body: `{"model": .., "messages": [[turn, ..], ..], "output_logprobs": false}`.
/// Response body: `{"logits": [[f64, ..], ..]}`, one row per conversation.
/// Micro-batches are sent one after another.
#[derive(Debug, Clone)]
pub struct HttpRewardService {
    api_base: String,
    api_key: String,
    model_id: String,
    http: reqwest::Client,
}

impl HttpRewardService {
    pub fn new(base_url: &str, api_key: &str, model_id: &str) -> Result<Self> {
        Ok(Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            http: http_client()?,
        })
    }
}

impl RewardService for HttpRewardService {
    async fn infer(&self, inputs: Vec<Conversation>, options: InferOptions) -> Result<RewardOutput> {
        let url = format!("{}/reward", self.api_base);
        let mut logits = Vec::with_capacity(inputs.len());

        for chunk in inputs.chunks(options.micro_batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.model_id,
                "messages": chunk,
                "output_logprobs": options.output_logprobs,
            });

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .context("failed to send reward request")?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                anyhow::bail!("reward API returned {status}: {text}");
            }

            let out: RewardOutput = resp
                .json()
                .await
                .context("failed to parse reward response")?;
            logits.extend(out.logits);
        }

        debug!(model = %self.model_id, scored = logits.len(), "reward inference succeeded");
        Ok(RewardOutput { logits })
    }
}
