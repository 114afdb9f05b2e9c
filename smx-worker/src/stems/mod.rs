//! Stem isolation: model selection, canonicalization, bundling
//!
//! Separation itself is delegated to a [`separator::SeparatorBackend`];
//! candidate models are tried in order and the first success wins. Raw
//! separator output is then canonicalized to the required stem set (with
//! synthesis from vocals + accompaniment when stems are missing) and packed
//! into a stems zip.

pub mod canonical;
pub mod fallback;
pub mod separator;

use smx_common::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::tools::params::{param_i64, param_str};

/// Run stem isolation with the production separator backend.
pub fn run_stem_isolation(
    config: &WorkerConfig,
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    let backend = separator::AudioSeparatorCli::default();
    run_with_backend(&backend, config, input, output_dir, params)
}

/// Run stem isolation with an injected separator backend.
pub fn run_with_backend(
    backend: &dyn separator::SeparatorBackend,
    config: &WorkerConfig,
    input: &Path,
    output_dir: &Path,
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<(String, Vec<PathBuf>)> {
    std::fs::create_dir_all(output_dir)?;

    let stems = param_i64(params, "stems", 4);
    let preferred = param_str(params, "fallbackModel", "mel_band_roformer");
    let candidates = separator::model_candidates(config, &preferred);

    let mut resolved_model = String::new();
    let mut produced: Option<Vec<PathBuf>> = None;
    let mut last_error: Option<String> = None;

    for model in &candidates {
        match backend.separate(model, input, output_dir) {
            Ok(files) if !files.is_empty() => {
                info!(model = %model, files = files.len(), "Separator succeeded");
                resolved_model = model.clone();
                produced = Some(files);
                break;
            }
            Ok(_) => {
                warn!(model = %model, "Separator produced no files");
                last_error = Some(format!("model {model} produced no output files"));
            }
            Err(e) => {
                warn!(model = %model, error = %e, "Separator candidate failed");
                last_error = Some(e.to_string());
            }
        }
    }

    let produced = produced.ok_or_else(|| {
        Error::SeparationFailed(last_error.unwrap_or_else(|| "no candidate models".to_string()))
    })?;

    let produced: Vec<PathBuf> = produced
        .iter()
        .map(|p| resolve_output_file(p, output_dir))
        .collect();

    let canonical = canonical::canonicalize(input, output_dir, &produced, stems)?;
    let zip_path = bundle_stems_zip(input, output_dir, &canonical, config.stem_zip_deflate)?;

    let mut artifacts = canonical;
    artifacts.push(zip_path);
    Ok((resolved_model, artifacts))
}

/// Resolve a backend-returned path against the output directory.
///
/// Backends may return absolute paths or bare file names.
pub fn resolve_output_file(path: &Path, output_dir: &Path) -> PathBuf {
    if path.is_absolute() && path.exists() {
        return path.to_path_buf();
    }

    if let Some(name) = path.file_name() {
        let resolved = output_dir.join(name);
        if resolved.exists() {
            return resolved;
        }
    }

    path.to_path_buf()
}

/// File stem of the staged input, used to name every stem artifact.
pub fn input_stem(input: &Path) -> String {
    input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("input")
        .to_string()
}

/// Pack the canonical stems into `<inputStem>-stems.zip`.
///
/// STORED by default; DEFLATE when configured. Missing files are skipped.
pub fn bundle_stems_zip(
    input: &Path,
    output_dir: &Path,
    files: &[PathBuf],
    deflate: bool,
) -> Result<PathBuf> {
    let zip_path = output_dir.join(format!("{}-stems.zip", input_stem(input)));
    let file = std::fs::File::create(&zip_path)?;
    let mut writer = zip::ZipWriter::new(file);

    let method = if deflate {
        zip::CompressionMethod::Deflated
    } else {
        zip::CompressionMethod::Stored
    };
    let options =
        zip::write::SimpleFileOptions::default().compression_method(method);

    for path in files {
        if !path.exists() {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Internal(format!("unzippable path {}", path.display())))?;
        writer
            .start_file(name, options)
            .map_err(|e| Error::Internal(format!("zip entry {name}: {e}")))?;
        let content = std::fs::read(path)?;
        writer.write_all(&content)?;
    }

    writer
        .finish()
        .map_err(|e| Error::Internal(format!("finalize {}: {e}", zip_path.display())))?;
    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav_24bit, AudioData};
    use tempfile::tempdir;

    fn test_config() -> WorkerConfig {
        WorkerConfig {
            api_key: "test-key".to_string(),
            public_base_url: "http://localhost:8000".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            output_root: PathBuf::from("data/outputs"),
            tmp_root: PathBuf::from("data/tmp"),
            source_cache_root: PathBuf::from("data/source-cache"),
            dataset_root: PathBuf::from("data/consented"),
            model_artifact_root: PathBuf::from("data/models"),
            cache_max_bytes: 0,
            cache_max_files: 0,
            stem_timeout_sec: 30,
            stem_zip_deflate: false,
            roformer_model: "roformer-main.ckpt".to_string(),
            demucs_model: "demucs-main.onnx".to_string(),
            mastering_engine: "matchering_2_0".to_string(),
            sonicmaster_script: None,
            dataset_salt: "test-salt".to_string(),
            raw_retention_days: 90,
            derived_retention_days: 365,
        }
    }

    fn write_tone(path: &Path, freq: f32) {
        let frames = 4096;
        let samples: Vec<f32> = (0..frames)
            .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44_100.0).sin())
            .collect();
        write_wav_24bit(
            path,
            &AudioData {
                sample_rate: 44_100,
                channels: vec![samples],
            },
        )
        .unwrap();
    }

    #[test]
    fn first_successful_model_wins() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("track.wav");
        write_tone(&input, 440.0);
        let out_dir = dir.path().join("out");

        let backend = |model: &str, _input: &Path, output_dir: &Path| -> Result<Vec<PathBuf>> {
            if model == "roformer-main.ckpt" {
                return Err(Error::ToolFailure("checkpoint corrupt".to_string()));
            }
            let mut files = Vec::new();
            for name in ["sep-vocals.wav", "sep-drums.wav", "sep-bass.wav", "sep-other.wav"] {
                let path = output_dir.join(name);
                write_tone(&path, 220.0);
                files.push(path);
            }
            Ok(files)
        };

        let (model, artifacts) = run_with_backend(
            &backend,
            &test_config(),
            &input,
            &out_dir,
            &serde_json::Map::new(),
        )
        .unwrap();

        // Preferred roformer failed; the first stable fallback succeeded
        assert_eq!(model, "UVR-MDX-NET-Inst_HQ_5.onnx");
        assert_eq!(artifacts.len(), 5);
        assert!(artifacts[4].to_str().unwrap().ends_with("track-stems.zip"));
        for name in ["track-vocals.wav", "track-drums.wav", "track-bass.wav", "track-other.wav"] {
            assert!(out_dir.join(name).exists(), "missing {name}");
        }
    }

    #[test]
    fn all_models_failing_surfaces_last_error() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("track.wav");
        write_tone(&input, 440.0);

        let backend = |_model: &str, _input: &Path, _output_dir: &Path| -> Result<Vec<PathBuf>> {
            Err(Error::ToolFailure("onnxruntime missing".to_string()))
        };

        let err = run_with_backend(
            &backend,
            &test_config(),
            &input,
            &dir.path().join("out"),
            &serde_json::Map::new(),
        )
        .unwrap_err();

        match err {
            Error::SeparationFailed(inner) => assert!(inner.contains("onnxruntime missing")),
            other => panic!("expected SeparationFailed, got {other:?}"),
        }
    }

    #[test]
    fn resolve_output_file_prefers_output_dir() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("vocals.wav");
        std::fs::write(&existing, b"x").unwrap();

        let resolved = resolve_output_file(Path::new("vocals.wav"), dir.path());
        assert_eq!(resolved, existing);

        let missing = resolve_output_file(Path::new("ghost.wav"), dir.path());
        assert_eq!(missing, PathBuf::from("ghost.wav"));
    }

    #[test]
    fn zip_contains_each_stem_once() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("song.wav");
        let a = dir.path().join("song-vocals.wav");
        let b = dir.path().join("song-accompaniment.wav");
        write_tone(&input, 440.0);
        write_tone(&a, 440.0);
        write_tone(&b, 220.0);

        let zip_path =
            bundle_stems_zip(&input, dir.path(), &[a, b], false).unwrap();
        assert!(zip_path.to_str().unwrap().ends_with("song-stems.zip"));

        let reader = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(reader).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("song-vocals.wav").is_ok());
        assert!(archive.by_name("song-accompaniment.wav").is_ok());
    }
}
