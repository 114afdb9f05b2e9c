//! QA harness subcommand
//!
//! Runs the inline tool runner over every fixture in a directory and writes
//! one JSON report of the models used and the artifacts produced. Meant for
//! pre-release smoke runs against known audio material.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use smx_common::ToolType;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::tools;

/// Arguments for the `qa` subcommand
#[derive(Debug, Args)]
pub struct QaArgs {
    /// Directory containing input audio fixtures
    #[arg(long)]
    pub fixtures: PathBuf,

    /// Output JSON report path
    #[arg(long, default_value = "data/qa-results.json")]
    pub out: PathBuf,

    /// Comma-separated tool list; defaults to every tool
    #[arg(long, value_delimiter = ',')]
    pub tools: Vec<String>,

    /// Working directory for per-fixture tool outputs
    #[arg(long, default_value = "data/qa")]
    pub work_dir: PathBuf,
}

const ALL_TOOLS: &[&str] = &[
    "stem_isolation",
    "mastering",
    "key_bpm",
    "loudness_report",
    "midi_extract",
];

/// Run the harness and write the report.
pub fn run(config: &WorkerConfig, args: &QaArgs) -> Result<()> {
    let tool_names: Vec<String> = if args.tools.is_empty() {
        ALL_TOOLS.iter().map(|t| t.to_string()).collect()
    } else {
        args.tools.clone()
    };

    let mut fixtures: Vec<PathBuf> = std::fs::read_dir(&args.fixtures)
        .with_context(|| format!("reading fixtures dir {}", args.fixtures.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    fixtures.sort();

    let mut report = serde_json::Map::new();
    for fixture in &fixtures {
        let fixture_stem = fixture
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("fixture")
            .to_string();
        let mut fixture_report = serde_json::Map::new();

        for tool_name in &tool_names {
            let tool: ToolType = match tool_name.parse() {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(tool = %tool_name, error = %e, "Skipping unknown tool");
                    continue;
                }
            };

            let output_dir = args.work_dir.join(&fixture_stem).join(tool_name);
            std::fs::create_dir_all(&output_dir)?;

            let entry = match tools::run(config, tool, fixture, &output_dir, &serde_json::Map::new())
            {
                Ok((model, outputs)) => {
                    let existing: Vec<String> = outputs
                        .iter()
                        .filter(|p| p.exists())
                        .map(|p| p.display().to_string())
                        .collect();
                    json!({"model": model, "outputs": existing})
                }
                Err(e) => {
                    warn!(fixture = %fixture.display(), tool = %tool_name, error = %e, "QA tool run failed");
                    json!({"error": e.to_string()})
                }
            };
            fixture_report.insert(tool_name.clone(), entry);
        }

        let fixture_name = fixture
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&fixture_stem)
            .to_string();
        report.insert(fixture_name, serde_json::Value::Object(fixture_report));
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        &args.out,
        serde_json::to_string_pretty(&serde_json::Value::Object(report))?,
    )?;
    info!(out = %args.out.display(), fixtures = fixtures.len(), "Wrote QA report");
    Ok(())
}
