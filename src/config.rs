use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete configuration for a rollout run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TxtRlConfig {
    pub rollout: RolloutConfig,
    pub tokenizer: TokenizerConfig,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    /// System-prompt table contents (key -> literal prompt text).
    pub system_prompts: HashMap<String, String>,
}

/// Rollout environment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Sub-batch size for the generation service (default: 32).
    pub actor_micro_bs: usize,
    /// Sub-batch size for the reward service (default: 32).
    pub reward_micro_bs: usize,
    /// Upper bound on generated answer length in tokens (default: 1024).
    pub max_new_tokens: usize,
    /// Defer reward computation until the trainer collects it (default: true).
    pub async_reward: bool,
    /// Append every scored (prompt, answer, reward) to a JSONL file.
    pub write_to_file: bool,
    /// Sampling configuration forwarded verbatim to the generation service.
    pub generate_kwargs: serde_json::Map<String, serde_json::Value>,
}

/// Which side of a sequence receives padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingSide {
    Left,
    Right,
}

/// Tokenizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Token id used for padding (default: 0).
    pub pad_token_id: i64,
    /// End-of-sequence token id (default: 92542).
    pub eos_token_id: i64,
    /// Padding side (default: left).
    pub padding_side: PaddingSide,
    /// The policy model's `tokenizer.json`. Required for live runs.
    pub tokenizer_path: Option<PathBuf>,
}

/// Dataset sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Prompt records per epoch (and per rollout batch) (default: 256).
    pub prompt_samples_each_epoch: usize,
    /// Pretrain records per epoch (and per rollout batch) (default: 32).
    pub pretrain_samples_each_epoch: usize,
    /// Maximum prompt length in tokens (default: 1024).
    pub max_prompt_len: usize,
    /// Maximum pretrain sequence length in tokens (default: 8192).
    pub max_pretrain_len: usize,
    /// Seed for shuffling and weighted sampling (default: 1024).
    pub random_seed: u64,
    /// Prompt dataset specs, `"path::ratio"`.
    pub prompt_datasets: Vec<String>,
    /// Pretrain dataset specs, `"path::ratio"`.
    pub pretrain_datasets: Vec<String>,
}

/// Service endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL for the policy generation API.
    pub policy_api_base: String,
    /// Model identifier for the policy.
    pub policy_model_id: String,
    /// API key for the policy service.
    pub policy_api_key: String,
    /// Base URL for the reward scoring API.
    pub reward_api_base: String,
    /// Model identifier for the reward model.
    pub reward_model_id: String,
    /// API key for the reward service.
    pub reward_api_key: String,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        let generate_kwargs = serde_json::json!({
            "do_sample": true,
            "temperature": 1.0,
            "top_k": 0,
            "top_p": 0.9,
            "min_new_tokens": 1,
            "num_beams": 1,
            "early_stopping": true,
            "eos_token_id": 92542,
            "pad_token_id": 0,
        });
        Self {
            actor_micro_bs: 32,
            reward_micro_bs: 32,
            max_new_tokens: 1024,
            async_reward: true,
            write_to_file: false,
            generate_kwargs: match generate_kwargs {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    }
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            pad_token_id: 0,
            eos_token_id: 92542,
            padding_side: PaddingSide::Left,
            tokenizer_path: None,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            prompt_samples_each_epoch: 256,
            pretrain_samples_each_epoch: 32,
            max_prompt_len: 1024,
            max_pretrain_len: 8192,
            random_seed: 1024,
            prompt_datasets: Vec::new(),
            pretrain_datasets: Vec::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            policy_api_base: "http://localhost:8000/v1".into(),
            policy_model_id: "internlm/internlm2-chat-1_8b-sft".into(),
            policy_api_key: String::new(),
            reward_api_base: "http://localhost:8001".into(),
            reward_model_id: "reward".into(),
            reward_api_key: String::new(),
        }
    }
}

impl TxtRlConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Fill empty API keys from `key`.
    pub fn fill_api_keys(&mut self, key: &str) {
        if self.model.policy_api_key.is_empty() {
            self.model.policy_api_key = key.to_string();
        }
        if self.model.reward_api_key.is_empty() {
            self.model.reward_api_key = key.to_string();
        }
    }
}
