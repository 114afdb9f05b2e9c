//! smx-trainer - training cycle CLI
//!
//! Aggregates the dataset manifest over a time window and writes the
//! recommender parameters artifact, printing the run summary as JSON.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smx_trainer::run_training_cycle;

#[derive(Parser)]
#[command(name = "smx-trainer", version, about = "SoundMaxx training-window aggregator")]
struct Cli {
    /// Dataset root holding manifest.jsonl
    #[arg(long, env = "DATASET_ROOT", default_value = "data/consented")]
    dataset_root: PathBuf,

    /// Output root for recommender artifacts
    #[arg(long, env = "MODEL_ARTIFACT_ROOT", default_value = "data/models")]
    model_artifact_root: PathBuf,

    /// Aggregation window in hours (floored to 1)
    #[arg(long, env = "TRAINING_WINDOW_HOURS", default_value_t = 48)]
    window_hours: i64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    info!(
        dataset_root = %cli.dataset_root.display(),
        window_hours = cli.window_hours,
        "Starting training cycle"
    );

    let report = run_training_cycle(&cli.dataset_root, &cli.model_artifact_root, cli.window_hours)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
