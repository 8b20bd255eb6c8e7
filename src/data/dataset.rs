//! JSONL-backed message datasets.
//!
//! Each dataset is given as a spec string `"path::ratio"`. Every line of the
//! file is one record:
//!
//! ```json
//! {"message": [{"role": "user", "content": "..."}], "sys_prompt": "default", "rm_prompt": "default"}
//! ```
//!
//! An epoch draws `samples_each_epoch` records across all sources in
//! proportion to their ratios, shuffles them with a seeded RNG, and splits
//! them into batches. Iteration stops at the end of the requested epochs;
//! nothing here restarts silently.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::message::{Conversation, MessageBatch, MessageKind, MessageRecord};
use crate::model::tokenizer::Tokenizer;

// ---------------------------------------------------------------------------
// Dataset spec
// ---------------------------------------------------------------------------

/// A dataset path and its sampling ratio.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub path: PathBuf,
    pub ratio: f64,
}

impl DatasetSpec {
    /// Parse `"path::ratio"`; the ratio defaults to 1.0 when omitted.
    pub fn parse(spec: &str) -> Result<Self> {
        let (path, ratio) = match spec.rsplit_once("::") {
            Some((path, ratio)) => {
                let ratio: f64 = ratio
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid ratio in dataset spec {spec:?}"))?;
                (path, ratio)
            }
            None => (spec, 1.0),
        };
        if path.is_empty() {
            bail!("empty path in dataset spec {spec:?}");
        }
        if !(ratio.is_finite() && ratio >= 0.0) {
            bail!("ratio must be a non-negative number in dataset spec {spec:?}");
        }
        Ok(Self {
            path: PathBuf::from(path),
            ratio,
        })
    }
}

/// One JSONL line. The record kind comes from the dataset, not the file.
#[derive(Debug, Deserialize)]
struct RawRecord {
    message: Conversation,
    #[serde(default = "default_key")]
    sys_prompt: String,
    #[serde(default = "default_key")]
    rm_prompt: String,
}

fn default_key() -> String {
    crate::message::DEFAULT_PROMPT_KEY.to_string()
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// A weighted collection of record sources of a single kind.
#[derive(Debug, Clone)]
pub struct MessageDataset {
    kind: MessageKind,
    sources: Vec<(f64, Vec<MessageRecord>)>,
}

impl MessageDataset {
    /// Build a dataset from in-memory `(ratio, records)` sources.
    ///
    /// Every record is stamped with `kind`.
    pub fn from_sources(kind: MessageKind, sources: Vec<(f64, Vec<MessageRecord>)>) -> Self {
        let sources = sources
            .into_iter()
            .map(|(ratio, records)| {
                let records = records
                    .into_iter()
                    .map(|mut r| {
                        r.kind = kind;
                        r
                    })
                    .collect();
                (ratio, records)
            })
            .collect();
        Self { kind, sources }
    }

    /// Load every spec (`"path::ratio"`) as a JSONL file.
    pub fn load(kind: MessageKind, specs: &[String]) -> Result<Self> {
        let mut sources = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = DatasetSpec::parse(spec)?;
            let records = read_jsonl(&spec.path, kind)?;
            info!(
                path = %spec.path.display(),
                ratio = spec.ratio,
                records = records.len(),
                kind = ?kind,
                "loaded dataset"
            );
            sources.push((spec.ratio, records));
        }
        Ok(Self { kind, sources })
    }

    /// Drop records whose conversation encodes to more than `max_len`
    /// tokens. Returns how many were dropped.
    pub fn drop_overlong<T: Tokenizer + ?Sized>(
        &mut self,
        tokenizer: &T,
        max_len: usize,
    ) -> Result<usize> {
        let mut dropped = 0;
        for (_, records) in &mut self.sources {
            let before = records.len();
            let mut kept = Vec::with_capacity(before);
            for record in records.drain(..) {
                if tokenizer.tokenize(&record.message)?.len() <= max_len {
                    kept.push(record);
                }
            }
            dropped += before - kept.len();
            *records = kept;
        }
        if dropped > 0 {
            warn!(
                dropped,
                max_len,
                kind = ?self.kind,
                "dropped records longer than the token limit"
            );
        }
        Ok(dropped)
    }

    /// Total number of records across all sources.
    pub fn len(&self) -> usize {
        self.sources.iter().map(|(_, r)| r.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Draw one epoch of `samples` records, proportionally to the source
    /// ratios, shuffled with `seed`.
    ///
    /// A source smaller than its share is cycled (each pass reshuffled).
    pub fn sample_epoch(&self, samples: usize, seed: u64) -> Vec<MessageRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let live: Vec<&(f64, Vec<MessageRecord>)> = self
            .sources
            .iter()
            .filter(|(ratio, records)| *ratio > 0.0 && !records.is_empty())
            .collect();
        let total_ratio: f64 = live.iter().map(|(ratio, _)| ratio).sum();
        if live.is_empty() || samples == 0 {
            return Vec::new();
        }

        let mut out = Vec::with_capacity(samples);
        let mut allocated = 0usize;
        for (i, (ratio, records)) in live.iter().enumerate() {
            let share = if i + 1 == live.len() {
                samples - allocated
            } else {
                ((ratio / total_ratio) * samples as f64).floor() as usize
            };
            allocated += share;

            let mut indices: Vec<usize> = Vec::with_capacity(share);
            while indices.len() < share {
                let mut pass: Vec<usize> = (0..records.len()).collect();
                pass.shuffle(&mut rng);
                let need = share - indices.len();
                indices.extend(pass.into_iter().take(need));
            }
            out.extend(indices.into_iter().map(|idx| records[idx].clone()));
        }

        out.shuffle(&mut rng);
        out
    }

    /// Batches for `epochs` consecutive epochs, each seeded with
    /// `seed + epoch`.
    pub fn batches(
        &self,
        batch_size: usize,
        samples_each_epoch: usize,
        seed: u64,
        epochs: usize,
    ) -> Vec<MessageBatch> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        for epoch in 0..epochs {
            let records = self.sample_epoch(samples_each_epoch, seed.wrapping_add(epoch as u64));
            if records.len() % batch_size != 0 {
                warn!(
                    records = records.len(),
                    batch_size, "epoch does not divide evenly; last batch is short"
                );
            }
            batches.extend(records.chunks(batch_size).map(<[MessageRecord]>::to_vec));
        }
        batches
    }
}

fn read_jsonl(path: &Path, kind: MessageKind) -> Result<Vec<MessageRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(lineno, line)| {
            let raw: RawRecord = serde_json::from_str(line).with_context(|| {
                format!("Failed to parse {} line {}", path.display(), lineno + 1)
            })?;
            Ok(MessageRecord {
                kind,
                message: raw.message,
                sys_prompt: raw.sys_prompt,
                rm_prompt: raw.rm_prompt,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::model::tokenizer::ByteTokenizer;

    fn records(prefix: &str, n: usize) -> Vec<MessageRecord> {
        (0..n)
            .map(|i| MessageRecord::prompt(vec![ChatMessage::user(format!("{prefix}{i}"))]))
            .collect()
    }

    #[test]
    fn test_parse_spec_with_ratio() {
        let spec = DatasetSpec::parse("data/helpful.jsonl::0.5").unwrap();
        assert_eq!(spec.path, PathBuf::from("data/helpful.jsonl"));
        assert!((spec.ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_spec_default_ratio() {
        let spec = DatasetSpec::parse("data/harmless.jsonl").unwrap();
        assert!((spec.ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_spec_rejects_garbage() {
        assert!(DatasetSpec::parse("a.jsonl::lots").is_err());
        assert!(DatasetSpec::parse("::1.0").is_err());
        assert!(DatasetSpec::parse("a.jsonl::-1").is_err());
    }

    #[test]
    fn test_sample_epoch_respects_ratios() {
        let ds = MessageDataset::from_sources(
            MessageKind::Prompt,
            vec![(1.0, records("a", 100)), (0.5, records("b", 100))],
        );
        let epoch = ds.sample_epoch(30, 7);
        assert_eq!(epoch.len(), 30);
        let from_a = epoch
            .iter()
            .filter(|r| r.message[0].content.starts_with('a'))
            .count();
        assert_eq!(from_a, 20);
    }

    #[test]
    fn test_sample_epoch_is_seeded() {
        let ds = MessageDataset::from_sources(MessageKind::Prompt, vec![(1.0, records("a", 50))]);
        assert_eq!(ds.sample_epoch(10, 1024), ds.sample_epoch(10, 1024));
        assert_ne!(ds.sample_epoch(10, 1024), ds.sample_epoch(10, 1025));
    }

    #[test]
    fn test_small_source_is_cycled() {
        let ds = MessageDataset::from_sources(MessageKind::Prompt, vec![(1.0, records("a", 3))]);
        assert_eq!(ds.sample_epoch(8, 0).len(), 8);
    }

    #[test]
    fn test_from_sources_stamps_kind() {
        let ds = MessageDataset::from_sources(MessageKind::Pretrain, vec![(1.0, records("a", 2))]);
        assert!(ds
            .sample_epoch(2, 0)
            .iter()
            .all(|r| r.kind == MessageKind::Pretrain));
    }

    #[test]
    fn test_batches_split_epochs() {
        let ds = MessageDataset::from_sources(MessageKind::Prompt, vec![(1.0, records("a", 10))]);
        let batches = ds.batches(4, 8, 1, 2);
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn test_load_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.jsonl");
        std::fs::write(
            &path,
            concat!(
                r#"{"message":[{"role":"user","content":"hi"}]}"#,
                "\n\n",
                r#"{"message":[{"role":"user","content":"x"}],"sys_prompt":"math"}"#,
                "\n"
            ),
        )
        .unwrap();

        let spec = format!("{}::2.0", path.display());
        let ds = MessageDataset::load(MessageKind::Prompt, &[spec]).unwrap();
        assert_eq!(ds.len(), 2);
        let epoch = ds.sample_epoch(2, 0);
        assert!(epoch.iter().any(|r| r.sys_prompt == "math"));
        assert!(epoch.iter().all(|r| r.kind == MessageKind::Prompt));
    }

    #[test]
    fn test_drop_overlong_measures_tokens() {
        let tok = ByteTokenizer::default();
        let short = vec![ChatMessage::user("hi")];
        let limit = tok.tokenize(&short).unwrap().len();
        let mut ds = MessageDataset::from_sources(
            MessageKind::Prompt,
            vec![
                (1.0, vec![MessageRecord::prompt(short.clone())]),
                (
                    1.0,
                    vec![
                        MessageRecord::prompt(vec![ChatMessage::user("far too long a question")]),
                        MessageRecord::prompt(short),
                    ],
                ),
            ],
        );

        assert_eq!(ds.drop_overlong(&tok, limit).unwrap(), 1);
        assert_eq!(ds.len(), 2);
        assert!(ds
            .sample_epoch(4, 0)
            .iter()
            .all(|r| r.message[0].content == "hi"));
        assert_eq!(ds.drop_overlong(&tok, limit).unwrap(), 0);
    }

    #[test]
    fn test_load_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        let err = MessageDataset::load(MessageKind::Prompt, &[path.display().to_string()])
            .unwrap_err();
        assert!(format!("{err:#}").contains("line 1"));
    }
}
