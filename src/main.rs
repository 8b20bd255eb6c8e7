//! txtrl: RLHF rollout driver.
//!
//! Provides subcommands:
//!
//! - `rollout` -- Run rollout steps (generate, score, interleave pretrain data)
//! - `config`  -- Print the effective configuration as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use txtrl::config::TxtRlConfig;
use txtrl::data::MessageDataset;
use txtrl::message::{ChatMessage, MessageBatch, MessageKind, MessageRecord, SystemPromptTable};
use txtrl::model::{
    ByteTokenizer, HfTokenizer, HttpPolicyService, HttpRewardService, MockPolicy, MockReward,
    PolicyService, RewardService,
};
use txtrl::trajectory::RolloutRecorder;
use txtrl::{RewardScorer, RolloutError, TxtEnv};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// txtrl: rollout core for RLHF training
#[derive(Parser)]
#[command(name = "txtrl", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to live policy/reward servers instead of in-process mocks.
    #[arg(long, global = true)]
    live: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rollout steps and resolve their rewards.
    Rollout {
        /// Number of rollout steps.
        #[arg(long, default_value_t = 1)]
        steps: usize,

        /// Where scored rollouts are appended when `write_to_file` is set.
        #[arg(long, default_value = "data/rollouts.jsonl")]
        output: PathBuf,
    },

    /// Print the effective configuration.
    Config,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TxtRlConfig::load(path)?,
        None => TxtRlConfig::default(),
    };

    // Fill in API keys from the environment when not set in the config file.
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        config.fill_api_keys(&key);
    }

    match cli.command {
        Commands::Rollout { steps, output } => cmd_rollout(&config, cli.live, steps, &output).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_rollout(config: &TxtRlConfig, live: bool, steps: usize, output: &Path) -> Result<()> {
    if live {
        let tokenizer_path = config
            .tokenizer
            .tokenizer_path
            .as_deref()
            .context("tokenizer.tokenizer_path must be set for live runs")?;
        let tokenizer = HfTokenizer::from_file(tokenizer_path, config.tokenizer.clone())?;
        tracing::info!(
            policy = %config.model.policy_api_base,
            reward = %config.model.reward_api_base,
            "Using live model servers"
        );
        let policy = HttpPolicyService::new(
            &config.model.policy_api_base,
            &config.model.policy_api_key,
            &config.model.policy_model_id,
            tokenizer,
        )?;
        let reward = HttpRewardService::new(
            &config.model.reward_api_base,
            &config.model.reward_api_key,
            &config.model.reward_model_id,
        )?;
        run_rollouts(config, &policy, Arc::new(reward), steps, output).await
    } else {
        tracing::info!("Using mock model servers");
        let tokenizer = ByteTokenizer::new(config.tokenizer.clone());
        let policy = MockPolicy::new().with_tokenizer(tokenizer);
        run_rollouts(config, &policy, Arc::new(MockReward::new()), steps, output).await
    }
}

async fn run_rollouts<P, R>(
    config: &TxtRlConfig,
    policy: &P,
    reward: Arc<R>,
    steps: usize,
    output: &Path,
) -> Result<()>
where
    P: PolicyService,
    R: RewardService,
{
    let system_prompts = Arc::new(SystemPromptTable::new(config.system_prompts.clone()));
    let ds = &config.dataset;

    let prompt_batches = if ds.prompt_datasets.is_empty() {
        tracing::warn!("No prompt datasets configured, using built-in demo prompts");
        demo_prompts()
    } else {
        let mut prompts = MessageDataset::load(MessageKind::Prompt, &ds.prompt_datasets)?;
        prompts
            .drop_overlong(policy.tokenizer(), ds.max_prompt_len)
            .context("Failed to measure prompt lengths")?;
        prompts.batches(
            ds.prompt_samples_each_epoch,
            ds.prompt_samples_each_epoch,
            ds.random_seed,
            steps,
        )
    };

    let scorer = RewardScorer::new(reward, Arc::clone(&system_prompts));
    let mut env = TxtEnv::new(prompt_batches, system_prompts)
        .with_config(&config.rollout)
        .with_reward_scorer(scorer)
        .with_max_pretrain_len(Some(ds.max_pretrain_len));

    if !ds.pretrain_datasets.is_empty() {
        let pretrain = MessageDataset::load(MessageKind::Pretrain, &ds.pretrain_datasets)?.batches(
            ds.pretrain_samples_each_epoch,
            ds.pretrain_samples_each_epoch,
            ds.random_seed,
            steps,
        );
        env = env.with_pretrain(pretrain);
    }

    let mut recorder = if config.rollout.write_to_file {
        Some(RolloutRecorder::open(output).context("Failed to open rollout log")?)
    } else {
        None
    };

    for step in 0..steps {
        let mut batch = match env.rollout(policy, step == 0).await {
            Ok(batch) => batch,
            Err(RolloutError::SourceExhausted { source_name }) => {
                tracing::info!(step, source = source_name, "Data exhausted, stopping");
                break;
            }
            Err(e) => return Err(e).with_context(|| format!("rollout step {step} failed")),
        };

        if batch.is_pending() {
            env.collect_rewards(&mut batch).await?;
        }

        let mean_reward = batch
            .rewards()
            .filter(|r| !r.is_empty())
            .map(|r| r.iter().sum::<f64>() / r.len() as f64);
        tracing::info!(
            step,
            prompts = batch.len(),
            mean_reward = ?mean_reward,
            pretrain = ?batch.pretrain_data.as_ref().map(|d| d.shape()),
            "Rollout step complete"
        );

        if let Some(recorder) = recorder.as_mut() {
            recorder.record(step, &batch)?;
        }
    }

    if let Some(recorder) = &recorder {
        tracing::info!(path = %recorder.path().display(), "Saved rollouts");
    }
    Ok(())
}

/// A few conversational prompts for smoke runs without datasets.
fn demo_prompts() -> Vec<MessageBatch> {
    let questions = [
        "What are some good ways to fall asleep faster?",
        "How do I politely decline a wedding invitation?",
        "Can you explain how vaccines train the immune system?",
        "What should I pack for a three-day hiking trip?",
    ];
    let batch = questions
        .iter()
        .map(|q| MessageRecord::prompt(vec![ChatMessage::user(*q)]))
        .collect();
    vec![batch]
}
