//! smx-trainer - Training-Window Aggregator
//!
//! Reads the dataset manifest written by the worker's capture ledger,
//! filters rows to a time window, and distills per-tool recommender
//! parameters (modes and means over job params) into a versioned JSON
//! artifact. The ledger is treated strictly read-only.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smx_common::time::{format_compact_utc, format_iso_utc, parse_iso_utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inclusive time window over `captured_at`
#[derive(Debug, Clone)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrainingWindow {
    /// Window ending now, `window_hours` long (floored to one hour).
    pub fn ending_now(window_hours: i64) -> Self {
        let end = Utc::now();
        let start = end - Duration::hours(window_hours.max(1));
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Recommender parameters per tool group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemRecommendation {
    pub recommended_stems: i64,
    pub recommended_variant: String,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteringRecommendation {
    pub recommended_preset: String,
    pub recommended_intensity: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiRecommendation {
    pub recommended_sensitivity: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendations {
    pub stem_isolation: StemRecommendation,
    pub mastering: MasteringRecommendation,
    pub midi_extract: MidiRecommendation,
}

/// The artifact written to the model output root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub generated_at: String,
    pub window_start: String,
    pub window_end: String,
    pub rows_used: usize,
    pub recommendations: Recommendations,
}

/// Summary returned to the caller / printed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub artifact: String,
    pub rows_used: usize,
    pub recommendations: Recommendations,
}

/// Load manifest rows whose `captured_at` falls inside the window.
///
/// Blank, malformed and out-of-window lines are skipped; a missing manifest
/// reads as empty.
pub fn load_manifest_rows(manifest: &Path, window: &TrainingWindow) -> Result<Vec<Value>> {
    if !manifest.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("reading manifest {}", manifest.display()))?;

    let mut rows = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(row) = serde_json::from_str::<Value>(line) else {
            debug!("Skipping malformed manifest line");
            continue;
        };
        let Some(captured_at) = row
            .get("captured_at")
            .and_then(Value::as_str)
            .and_then(parse_iso_utc)
        else {
            continue;
        };
        if !window.contains(captured_at) {
            continue;
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Distill per-tool recommendations from in-window rows.
pub fn train_lightweight_recommenders(rows: &[Value]) -> Recommendations {
    let mut by_tool: HashMap<&str, Vec<&Value>> = HashMap::new();
    for row in rows {
        let Some(tool_type) = row.get("tool_type").and_then(Value::as_str) else {
            continue;
        };
        if tool_type.is_empty() {
            continue;
        }
        by_tool.entry(tool_type).or_default().push(row);
    }

    let empty = Vec::new();
    let stem_rows = by_tool.get("stem_isolation").unwrap_or(&empty);
    let mastering_rows = by_tool.get("mastering").unwrap_or(&empty);
    let midi_rows = by_tool.get("midi_extract").unwrap_or(&empty);

    let stem_counts: Vec<i64> = collect_params(stem_rows, "stems", Value::as_i64);
    let stem_variants: Vec<String> =
        collect_params(stem_rows, "fallbackModel", |v| v.as_str().map(String::from));
    let mastering_presets: Vec<String> =
        collect_params(mastering_rows, "preset", |v| v.as_str().map(String::from));
    let mastering_intensities: Vec<f64> = collect_params(mastering_rows, "intensity", Value::as_f64);
    let midi_sensitivities: Vec<f64> = collect_params(midi_rows, "sensitivity", Value::as_f64);

    Recommendations {
        stem_isolation: StemRecommendation {
            recommended_stems: mode(&stem_counts).unwrap_or(4),
            recommended_variant: mode(&stem_variants)
                .unwrap_or_else(|| "mel_band_roformer".to_string()),
            samples: stem_rows.len(),
        },
        mastering: MasteringRecommendation {
            recommended_preset: mode(&mastering_presets)
                .unwrap_or_else(|| "streaming_clean".to_string()),
            recommended_intensity: round_to(mean(&mastering_intensities).unwrap_or(60.0), 2),
            samples: mastering_rows.len(),
        },
        midi_extract: MidiRecommendation {
            recommended_sensitivity: round_to(mean(&midi_sensitivities).unwrap_or(0.5), 3),
            samples: midi_rows.len(),
        },
    }
}

/// One full training cycle: window the manifest, aggregate, write the
/// artifact file.
pub fn run_training_cycle(
    dataset_root: &Path,
    model_artifact_root: &Path,
    window_hours: i64,
) -> Result<TrainingReport> {
    let window = TrainingWindow::ending_now(window_hours);
    let manifest = dataset_root.join("manifest.jsonl");

    let rows = load_manifest_rows(&manifest, &window)?;
    let recommendations = train_lightweight_recommenders(&rows);

    info!(
        rows_used = rows.len(),
        window_start = %format_iso_utc(window.start),
        window_end = %format_iso_utc(window.end),
        "Training cycle aggregated"
    );

    let artifact = TrainingArtifact {
        generated_at: format_iso_utc(window.end),
        window_start: format_iso_utc(window.start),
        window_end: format_iso_utc(window.end),
        rows_used: rows.len(),
        recommendations: recommendations.clone(),
    };

    std::fs::create_dir_all(model_artifact_root)?;
    let filename = format!(
        "lightweight-recommenders-{}.json",
        format_compact_utc(window.end)
    );
    let artifact_path: PathBuf = model_artifact_root.join(filename);
    std::fs::write(&artifact_path, serde_json::to_string_pretty(&artifact)?)?;

    Ok(TrainingReport {
        artifact: artifact_path.display().to_string(),
        rows_used: rows.len(),
        recommendations,
    })
}

/// Values of `params.<key>` across rows, converted by `extract`.
fn collect_params<T>(rows: &[&Value], key: &str, extract: fn(&Value) -> Option<T>) -> Vec<T> {
    rows.iter()
        .filter_map(|row| row.get("params"))
        .filter(|params| params.is_object())
        .filter_map(|params| params.get(key))
        .filter_map(extract)
        .collect()
}

/// Most frequent value; first-seen wins ties. `None` when empty.
fn mode<T: PartialEq + Clone>(values: &[T]) -> Option<T> {
    let mut best: Option<(usize, &T)> = None;
    for value in values {
        let count = values.iter().filter(|v| *v == value).count();
        match best {
            Some((best_count, _)) if best_count >= count => {}
            _ => best = Some((count, value)),
        }
    }
    best.map(|(_, v)| v.clone())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
