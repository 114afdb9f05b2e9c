//! Mastering engine selection and the distinctness policy
//!
//! Candidates are tried in a fixed order: the requested engine, the other of
//! the sonicmaster/matchering pair, then the always-available internal DSP
//! path. An engine's output is accepted only when it is measurably distinct
//! from the source; non-distinct output advances to the next candidate.

use smx_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::audio::dsp::{self, PEAK_TARGET};
use crate::audio::{read_audio, write_wav_24bit, AudioData};
use crate::config::WorkerConfig;
use crate::stems::input_stem;
use crate::tools::params::{param_f64, param_str};

/// Engine name pair the requested engine is completed from.
const ENGINE_PAIR: &[&str] = &["sonicmaster", "matchering_2_0"];

/// Internal path appended as the last candidate.
const ADAPTIVE_ENGINE: &str = "adaptive_dsp_mastering";

/// Cap on the aggregated all-engine failure message.
const ERROR_BUDGET: usize = 1200;

/// Run mastering: first candidate with distinct output wins.
pub fn run(
    config: &WorkerConfig,
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let mastered_path = output_dir.join(format!("{}-mastered.wav", input_stem(input)));
    let report_path = output_dir.join("mastering-report.json");

    let mut errors: Vec<String> = Vec::new();
    for engine in candidate_order(&config.mastering_engine) {
        let attempt = match engine.as_str() {
            "sonicmaster" => run_sonicmaster(config, input, &mastered_path, &report_path, params),
            "matchering_2_0" => run_matchering(input, &mastered_path, &report_path, params),
            ADAPTIVE_ENGINE => run_adaptive_dsp(input, &mastered_path, &report_path, params),
            other => Err(Error::ToolFailure(format!("unknown mastering engine: {other}"))),
        };

        match attempt {
            Ok(model) => match is_distinct(input, &mastered_path) {
                Ok(true) => {
                    info!(engine = %model, "Mastering engine accepted");
                    return Ok((model, vec![mastered_path.clone(), report_path.clone()]));
                }
                Ok(false) => {
                    warn!(engine = %engine, "Mastered output not distinct from source, rejecting");
                    errors.push(format!("{engine}: output not distinct from source"));
                }
                Err(e) => errors.push(format!("{engine}: distinctness check failed: {e}")),
            },
            Err(e) => {
                warn!(engine = %engine, error = %e, "Mastering engine failed");
                errors.push(format!("{engine}: {e}"));
            }
        }
    }

    let mut combined = errors.join("; ");
    if combined.len() > ERROR_BUDGET {
        combined = combined.chars().take(ERROR_BUDGET).collect();
    }
    Err(Error::ToolFailure(format!("mastering failed: {combined}")))
}

/// Requested engine, the other of the standard pair, then the internal path.
fn candidate_order(requested: &str) -> Vec<String> {
    let mut candidates = vec![requested.to_string()];
    for engine in ENGINE_PAIR {
        if *engine != requested {
            candidates.push(engine.to_string());
        }
    }
    candidates.push(ADAPTIVE_ENGINE.to_string());
    candidates.dedup();
    candidates
}

/// Distinctness of a mastered file against its source.
///
/// Holds when file sizes, sample rates or shapes differ, or the mean
/// absolute sample difference clears an absolute or source-relative floor.
/// Empty buffers are never distinct.
pub fn is_distinct(source_path: &Path, mastered_path: &Path) -> Result<bool> {
    let source_len = std::fs::metadata(source_path)?.len();
    let mastered_len = std::fs::metadata(mastered_path)?.len();
    if source_len != mastered_len {
        return Ok(true);
    }

    let source = read_audio(source_path)?;
    let mastered = read_audio(mastered_path)?;

    if source.is_empty() || mastered.is_empty() {
        return Ok(false);
    }
    if source.sample_rate != mastered.sample_rate {
        return Ok(true);
    }
    if source.channel_count() != mastered.channel_count()
        || source.frames() != mastered.frames()
    {
        return Ok(true);
    }

    let diff = dsp::subtract(&mastered, &source)?;
    let mean_abs_diff = diff.mean_abs();
    if mean_abs_diff >= 1e-5 {
        return Ok(true);
    }
    let relative = mean_abs_diff / source.mean_abs().max(1e-8);
    Ok(relative >= 5e-4)
}

/// External engine: `python $SONICMASTER_SCRIPT_PATH --input .. --output ..`
fn run_sonicmaster(
    config: &WorkerConfig,
    input: &Path,
    mastered_path: &Path,
    report_path: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<String> {
    let script = config.sonicmaster_script.as_ref().ok_or_else(|| {
        Error::Config("SONICMASTER_SCRIPT_PATH must be set when MASTERING_ENGINE=sonicmaster".to_string())
    })?;

    let preset = param_str(params, "preset", "streaming_clean");
    let intensity = param_f64(params, "intensity", 50.0);

    let output = Command::new("python")
        .arg(script)
        .arg("--input")
        .arg(input)
        .arg("--output")
        .arg(mastered_path)
        .arg("--preset")
        .arg(&preset)
        .arg("--intensity")
        .arg(intensity.to_string())
        .output()
        .map_err(|e| Error::ToolFailure(format!("failed to spawn sonicmaster: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(Error::ToolFailure(format!(
            "sonicmaster failed with {}: {}",
            output.status,
            detail.trim()
        )));
    }

    write_report(
        report_path,
        serde_json::json!({
            "preset": preset,
            "intensity": intensity,
            "engine": "sonicmaster",
            "stdout": String::from_utf8_lossy(&output.stdout).trim(),
        }),
    )?;
    Ok("sonicmaster".to_string())
}

/// Reference-matching engine: match loudness to the reference (the source
/// itself unless `referencePath` is given), then normalize the peak.
fn run_matchering(
    input: &Path,
    mastered_path: &Path,
    report_path: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<String> {
    let reference_path = params
        .get("referencePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| input.to_path_buf());

    let target = read_audio(input)?;
    let reference = read_audio(&reference_path)?;
    if target.is_empty() {
        return Err(Error::ToolFailure("matchering: empty target audio".to_string()));
    }

    let target_rms = rms(&target);
    let reference_rms = rms(&reference);
    let gain = if target_rms > 1e-8 {
        (reference_rms / target_rms).clamp(0.1, 10.0)
    } else {
        1.0
    };

    let mut mastered = target.clone();
    for channel in &mut mastered.channels {
        for sample in channel.iter_mut() {
            *sample *= gain;
        }
    }

    // Brickwall normalization to the output ceiling
    let peak = mastered.peak();
    if peak > 1e-8 {
        let scale = PEAK_TARGET / peak;
        for channel in &mut mastered.channels {
            for sample in channel.iter_mut() {
                *sample *= scale;
            }
        }
    }

    write_wav_24bit(mastered_path, &mastered)?;
    write_report(
        report_path,
        serde_json::json!({
            "preset": param_str(params, "preset", "streaming_clean"),
            "intensity": param_f64(params, "intensity", 50.0),
            "engine": "matchering_2_0",
        }),
    )?;
    Ok("matchering_2_0".to_string())
}

/// Internal DSP path: tanh soft clip with intensity-scaled drive, wet/dry
/// blend, a subtle high-frequency tilt, then a final tanh + peak limit.
fn run_adaptive_dsp(
    input: &Path,
    mastered_path: &Path,
    report_path: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<String> {
    let intensity = param_f64(params, "intensity", 50.0).clamp(0.0, 100.0);
    let drive = 1.0 + 3.0 * (intensity / 100.0) as f32;
    let wet = 0.25 + 0.55 * (intensity / 100.0) as f32;
    let tilt = 0.05f32;

    let mut audio = read_audio(input)?;
    if audio.is_empty() {
        return Err(Error::ToolFailure("adaptive mastering: empty source audio".to_string()));
    }

    for channel in &mut audio.channels {
        let mut previous = 0.0f32;
        for sample in channel.iter_mut() {
            let driven = (*sample * drive).tanh();
            let blended = (1.0 - wet) * *sample + wet * driven;
            let tilted = blended + tilt * (blended - previous);
            previous = blended;
            *sample = tilted.tanh();
        }
    }
    dsp::peak_limit(&mut audio, PEAK_TARGET);

    write_wav_24bit(mastered_path, &audio)?;
    write_report(
        report_path,
        serde_json::json!({
            "preset": param_str(params, "preset", "streaming_clean"),
            "intensity": intensity,
            "engine": ADAPTIVE_ENGINE,
        }),
    )?;
    Ok(ADAPTIVE_ENGINE.to_string())
}

fn rms(audio: &AudioData) -> f32 {
    let total: usize = audio.channels.iter().map(|c| c.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let sum: f32 = audio
        .channels
        .iter()
        .flat_map(|c| c.iter())
        .map(|s| s * s)
        .sum();
    (sum / total as f32).sqrt()
}

fn write_report(path: &Path, report: serde_json::Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::Internal(format!("mastering report: {e}")))?;
    std::fs::write(path, rendered)?;
    Ok(())
}
