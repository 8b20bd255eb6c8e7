//! Append-only JSONL dump of scored rollouts.
//!
//! Enabled by `rollout.write_to_file`. Each line holds one
//! (prompt, answer, reward) triple tagged with the rollout step.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RolloutError;
use crate::message::Conversation;
use crate::trajectory::types::TrajectoryBatch;

/// One line of the rollout log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRecord {
    pub step: usize,
    pub batch_id: String,
    pub index: usize,
    pub prompt: Conversation,
    pub answer: String,
    /// `None` while the reward is pending or when no scorer is configured.
    pub reward: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Writes [`RolloutRecord`]s to a JSONL file.
#[derive(Debug)]
pub struct RolloutRecorder {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RolloutRecorder {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, RolloutError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append every prompt of `batch`. Returns the number of lines written.
    pub fn record(&mut self, step: usize, batch: &TrajectoryBatch) -> Result<usize, RolloutError> {
        let rewards = batch.rewards();
        let batch_id = batch.id.to_string();
        let now = Utc::now();

        for (index, (prompt, answer)) in batch.prompts.iter().zip(batch.answers()).enumerate() {
            let record = RolloutRecord {
                step,
                batch_id: batch_id.clone(),
                index,
                prompt: prompt.message.clone(),
                answer: answer.clone(),
                reward: rewards.and_then(|r| r.get(index).copied()),
                recorded_at: now,
            };
            serde_json::to_writer(&mut self.writer, &record)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;

        debug!(step, lines = batch.len(), path = %self.path.display(), "recorded rollout");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatMessage, MessageRecord};
    use crate::model::traits::GenerationOutput;
    use crate::trajectory::types::RewardState;

    fn batch() -> TrajectoryBatch {
        let mut batch = TrajectoryBatch::new(
            vec![
                MessageRecord::prompt(vec![ChatMessage::user("q0")]),
                MessageRecord::prompt(vec![ChatMessage::user("q1")]),
            ],
            GenerationOutput::from_answers(vec!["a0".into(), "a1".into()]),
        );
        batch.reward = RewardState::Ready(vec![1.0, -1.0]);
        batch
    }

    #[test]
    fn test_record_writes_one_line_per_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/rollout.jsonl");
        let mut recorder = RolloutRecorder::open(&path).unwrap();

        assert_eq!(recorder.record(3, &batch()).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<RolloutRecord> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].step, 3);
        assert_eq!(records[1].answer, "a1");
        assert_eq!(records[1].reward, Some(-1.0));
        assert_eq!(records[0].prompt[0].content, "q0");
    }

    #[test]
    fn test_record_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollout.jsonl");
        RolloutRecorder::open(&path).unwrap().record(0, &batch()).unwrap();
        RolloutRecorder::open(&path).unwrap().record(1, &batch()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4);
    }
}
