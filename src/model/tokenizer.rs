//! Tokenizer contract and batch encoding.
//!
//! The rollout core only needs one thing from a tokenizer: turn a batch of
//! conversations into a padded `input_ids` matrix and its attention mask.
//! [`encode`] does the padding according to [`TokenizerConfig`]; concrete
//! tokenizers only implement [`Tokenizer::tokenize`] for a single
//! conversation.
//!
//! [`HfTokenizer`] wraps the policy model's own `tokenizer.json` and is what
//! live runs use. [`ByteTokenizer`] backs the in-process mocks.

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::config::{PaddingSide, TokenizerConfig};
use crate::message::{ChatMessage, Conversation};

/// A deterministic, stateless tokenizer.
pub trait Tokenizer: Send + Sync {
    /// Token ids for one conversation rendered through the chat template.
    fn tokenize(&self, conversation: &[ChatMessage]) -> Result<Vec<i64>>;

    /// Padding and special-token configuration.
    fn config(&self) -> &TokenizerConfig;
}

/// A padded batch of token ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedBatch {
    /// `[batch, seq_len]` token ids.
    pub input_ids: Vec<Vec<i64>>,
    /// `[batch, seq_len]`, 1 for real tokens and 0 for padding.
    pub attention_mask: Vec<Vec<i64>>,
}

impl EncodedBatch {
    /// `(rows, columns)` of the token matrix.
    pub fn shape(&self) -> (usize, usize) {
        (
            self.input_ids.len(),
            self.input_ids.first().map_or(0, Vec::len),
        )
    }
}

/// Encode a batch of conversations into a rectangular, padded matrix.
///
/// Sequences longer than `max_len` are truncated from the right. Every row is
/// padded to the longest (post-truncation) row on the configured side.
pub fn encode<T: Tokenizer + ?Sized>(
    conversations: &[Conversation],
    tokenizer: &T,
    max_len: Option<usize>,
) -> Result<EncodedBatch> {
    let cfg = tokenizer.config();
    let mut rows: Vec<Vec<i64>> = conversations
        .iter()
        .map(|conv| {
            let mut ids = tokenizer.tokenize(conv)?;
            if let Some(limit) = max_len {
                ids.truncate(limit);
            }
            Ok(ids)
        })
        .collect::<Result<_>>()?;

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut attention_mask = Vec::with_capacity(rows.len());

    for row in rows.iter_mut() {
        let pad = width - row.len();
        let mut mask = vec![1i64; row.len()];
        match cfg.padding_side {
            PaddingSide::Left => {
                let mut padded = vec![cfg.pad_token_id; pad];
                padded.append(row);
                *row = padded;
                let mut padded_mask = vec![0i64; pad];
                padded_mask.append(&mut mask);
                mask = padded_mask;
            }
            PaddingSide::Right => {
                row.resize(width, cfg.pad_token_id);
                mask.resize(width, 0);
            }
        }
        attention_mask.push(mask);
    }

    Ok(EncodedBatch {
        input_ids: rows,
        attention_mask,
    })
}

// ---------------------------------------------------------------------------
// Hugging Face tokenizer
// ---------------------------------------------------------------------------

/// The policy model's tokenizer, loaded from a Hugging Face `tokenizer.json`.
///
/// Turns are rendered with the InternLM2 chat template
/// (`<|im_start|>{role}\n{content}<|im_end|>\n`) and encoded without extra
/// special tokens; the configured EOS id closes the sequence.
#[derive(Debug, Clone)]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    config: TokenizerConfig,
}

impl HfTokenizer {
    pub fn from_file(path: &Path, config: TokenizerConfig) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", path.display()))?;
        Ok(Self { inner, config })
    }
}

fn render_chat(conversation: &[ChatMessage]) -> String {
    conversation
        .iter()
        .map(|turn| format!("<|im_start|>{}\n{}<|im_end|>\n", turn.role, turn.content))
        .collect()
}

impl Tokenizer for HfTokenizer {
    fn tokenize(&self, conversation: &[ChatMessage]) -> Result<Vec<i64>> {
        let rendered = render_chat(conversation);
        let encoding = self
            .inner
            .encode(rendered.as_str(), false)
            .map_err(|e| anyhow!("tokenizer encode failed: {e}"))?;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        ids.push(self.config.eos_token_id);
        Ok(ids)
    }

    fn config(&self) -> &TokenizerConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Byte-level tokenizer
// ---------------------------------------------------------------------------

/// Ids below this value are reserved for special tokens.
const BYTE_OFFSET: i64 = 3;

/// A byte-level tokenizer with a role-tagged chat template.
///
/// Each turn renders as `<|{role}|>\n{content}\n`, bytes map to
/// `byte + 3`, and the sequence ends with the configured EOS id. Only the
/// mock services use it.
#[derive(Debug, Clone, Default)]
pub struct ByteTokenizer {
    config: TokenizerConfig,
}

impl ByteTokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }
}

impl Tokenizer for ByteTokenizer {
    fn tokenize(&self, conversation: &[ChatMessage]) -> Result<Vec<i64>> {
        let mut ids = Vec::new();
        for turn in conversation {
            let rendered = format!("<|{}|>\n{}\n", turn.role, turn.content);
            ids.extend(rendered.bytes().map(|b| i64::from(b) + BYTE_OFFSET));
        }
        ids.push(self.config.eos_token_id);
        Ok(ids)
    }

    fn config(&self) -> &TokenizerConfig {
        &self.config
    }
}

/// A tiny word-level `tokenizer.json` for tests.
#[cfg(test)]
pub(crate) mod fixture {
    use std::path::{Path, PathBuf};

    pub(crate) const VOCAB: &[(&str, u32)] = &[
        ("[UNK]", 0),
        ("user", 1),
        ("assistant", 2),
        ("hello", 3),
        ("world", 4),
    ];

    pub(crate) fn write_word_level(dir: &Path) -> PathBuf {
        let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
            .iter()
            .map(|(token, id)| (token.to_string(), serde_json::json!(id)))
            .collect();
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"},
        });
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }
}
