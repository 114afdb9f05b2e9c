//! Separator model selection and execution
//!
//! The worker does not embed a separation model; it drives the external
//! `audio-separator` CLI, one invocation per candidate model checkpoint.
//! Tests inject closures instead.

use smx_common::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::config::WorkerConfig;

/// Checkpoints tried after the preferred model, in order.
const STABLE_FALLBACK_MODELS: &[&str] = &[
    "UVR-MDX-NET-Inst_HQ_5.onnx",
    "UVR-MDX-NET-Inst_HQ_3.onnx",
    "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt",
];

/// A separation engine: load `model_filename` and split `input` into stem
/// files under `output_dir`.
pub trait SeparatorBackend: Send + Sync {
    fn separate(&self, model_filename: &str, input: &Path, output_dir: &Path)
        -> Result<Vec<PathBuf>>;
}

impl<F> SeparatorBackend for F
where
    F: Fn(&str, &Path, &Path) -> Result<Vec<PathBuf>> + Send + Sync,
{
    fn separate(
        &self,
        model_filename: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        self(model_filename, input, output_dir)
    }
}

/// Ordered candidate model list for the chosen variant.
///
/// Preferred model first, then the stable fallbacks; duplicates and empty
/// names are dropped.
pub fn model_candidates(config: &WorkerConfig, preferred_variant: &str) -> Vec<String> {
    let first = if preferred_variant == "demucs_v4" {
        config.demucs_model.clone()
    } else {
        config.roformer_model.clone()
    };

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for name in std::iter::once(first.as_str()).chain(STABLE_FALLBACK_MODELS.iter().copied()) {
        if !name.is_empty() && seen.insert(name.to_string()) {
            candidates.push(name.to_string());
        }
    }
    candidates
}

/// Production backend: the `audio-separator` command-line tool.
///
/// Produced files are discovered by diffing the output directory around the
/// invocation, since the CLI names outputs after the model.
pub struct AudioSeparatorCli {
    command: String,
}

impl Default for AudioSeparatorCli {
    fn default() -> Self {
        Self {
            command: "audio-separator".to_string(),
        }
    }
}

impl SeparatorBackend for AudioSeparatorCli {
    fn separate(
        &self,
        model_filename: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let before = list_files(output_dir)?;

        debug!(model = %model_filename, input = %input.display(), "Invoking audio-separator");
        let output = Command::new(&self.command)
            .arg(input)
            .arg("--model_filename")
            .arg(model_filename)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("WAV")
            .output()
            .map_err(|e| Error::ToolFailure(format!("failed to spawn {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(Error::ToolFailure(format!(
                "audio-separator exited with {}: {}",
                output.status,
                detail.trim()
            )));
        }

        let after = list_files(output_dir)?;
        let produced: Vec<PathBuf> = after.into_iter().filter(|p| !before.contains(p)).collect();
        Ok(produced)
    }
}

fn list_files(dir: &Path) -> Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.insert(entry.path());
        }
    }
    Ok(files)
}
