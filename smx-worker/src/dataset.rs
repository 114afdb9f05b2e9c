//! Dataset capture ledger
//!
//! Successful implied-use jobs contribute a sample: inputs and outputs are
//! copied into a content-addressed sample directory, every file gets a
//! SHA-256 digest, and `metadata.json` is written last (atomically, via a
//! temp file rename). The same record is appended as one JSON line to the
//! append-only `manifest.jsonl`, serialized by an internal mutex. Capture is
//! best-effort: failures are surfaced by the caller's logging, never as job
//! failures.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use smx_common::{hash, time, Error, Result, ToolType};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// One captured file inside a sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleFile {
    pub name: String,
    /// Path relative to the dataset root
    pub path: String,
    pub sha256: String,
}

/// Aggregate size features recorded for trainers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleFeatures {
    pub input_size_bytes: u64,
    pub output_count: u64,
    pub output_size_bytes_total: u64,
    /// Truncating integer mean
    pub output_size_bytes_average: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub output_count: u64,
}

/// The per-sample record: written as `metadata.json` and appended to the
/// manifest verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub sample_id: String,
    pub job_id: String,
    pub session_fingerprint: String,
    pub tool_type: String,
    pub capture_mode: String,
    pub policy_version: String,
    pub captured_at: String,
    pub raw_expires_at: String,
    pub derived_expires_at: String,
    pub input: SampleFile,
    pub outputs: Vec<SampleFile>,
    pub params: serde_json::Value,
    pub outcome: SampleOutcome,
    pub features: SampleFeatures,
}

/// Capture request, borrowed from the executing job
pub struct CaptureSample<'a> {
    pub job_id: &'a str,
    pub tool_type: ToolType,
    pub source_session_id: &'a str,
    pub policy_version: &'a str,
    pub input_file: &'a Path,
    pub output_files: &'a [PathBuf],
    pub params: &'a serde_json::Map<String, serde_json::Value>,
}

/// Append-only training dataset store
pub struct DatasetLedger {
    root: PathBuf,
    salt: String,
    raw_retention_days: i64,
    derived_retention_days: i64,
    manifest_lock: Mutex<()>,
}

impl DatasetLedger {
    pub fn new(
        root: PathBuf,
        salt: String,
        raw_retention_days: i64,
        derived_retention_days: i64,
    ) -> Self {
        Self {
            root,
            salt,
            raw_retention_days: raw_retention_days.max(1),
            derived_retention_days: derived_retention_days.max(raw_retention_days.max(1)),
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.jsonl")
    }

    /// Capture one sample; returns its id.
    pub async fn capture_training_sample(&self, sample: CaptureSample<'_>) -> Result<String> {
        let sample_id = Uuid::new_v4().to_string();
        let sample_dir = self.root.join("samples").join(&sample_id);

        let request = OwnedCapture {
            sample_id: sample_id.clone(),
            sample_dir: sample_dir.clone(),
            root: self.root.clone(),
            salt: self.salt.clone(),
            raw_retention_days: self.raw_retention_days,
            derived_retention_days: self.derived_retention_days,
            job_id: sample.job_id.to_string(),
            tool_type: sample.tool_type,
            source_session_id: sample.source_session_id.to_string(),
            policy_version: sample.policy_version.to_string(),
            input_file: sample.input_file.to_path_buf(),
            output_files: sample.output_files.to_vec(),
            params: serde_json::Value::Object(sample.params.clone()),
        };

        let metadata = tokio::task::spawn_blocking(move || write_sample(request))
            .await
            .map_err(|e| Error::Internal(format!("dataset capture task: {e}")))??;

        // Single-line append, serialized across concurrent jobs
        let line = serde_json::to_string(&metadata)
            .map_err(|e| Error::Internal(format!("manifest encode: {e}")))?;
        {
            let _guard = self.manifest_lock.lock().await;
            let manifest = self.manifest_path();
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                std::fs::create_dir_all(&root)?;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&manifest)?;
                writeln!(file, "{line}")?;
                Ok(())
            })
            .await
            .map_err(|e| Error::Internal(format!("manifest append task: {e}")))??;
        }

        info!(sample_id = %sample_id, job_id = %metadata.job_id, "Training sample captured");
        Ok(sample_id)
    }
}

struct OwnedCapture {
    sample_id: String,
    sample_dir: PathBuf,
    root: PathBuf,
    salt: String,
    raw_retention_days: i64,
    derived_retention_days: i64,
    job_id: String,
    tool_type: ToolType,
    source_session_id: String,
    policy_version: String,
    input_file: PathBuf,
    output_files: Vec<PathBuf>,
    params: serde_json::Value,
}

/// Blocking sample write. A sample directory without `metadata.json` is a
/// failed capture and is removed before returning the error.
fn write_sample(req: OwnedCapture) -> Result<SampleMetadata> {
    let result = write_sample_inner(&req);
    if result.is_err() && !req.sample_dir.join("metadata.json").exists() {
        let _ = std::fs::remove_dir_all(&req.sample_dir);
    }
    result
}

fn write_sample_inner(req: &OwnedCapture) -> Result<SampleMetadata> {
    std::fs::create_dir_all(&req.sample_dir)?;

    let session_fingerprint =
        hash::sha256_hex(format!("{}:{}", req.salt, req.source_session_id).as_bytes());

    let input = copy_into_sample(&req.input_file, req)?;
    let input_size = std::fs::metadata(req.sample_dir.join(&input.name))?.len();

    let mut outputs = Vec::new();
    let mut output_total: u64 = 0;
    for file in &req.output_files {
        if !file.exists() {
            debug!(path = %file.display(), "Skipping missing output during capture");
            continue;
        }
        let record = copy_into_sample(file, req)?;
        output_total += std::fs::metadata(req.sample_dir.join(&record.name))?.len();
        outputs.push(record);
    }

    let captured_at = Utc::now();
    let raw_expires_at = captured_at + ChronoDuration::days(req.raw_retention_days);
    let derived_expires_at = captured_at + ChronoDuration::days(req.derived_retention_days);

    let output_count = outputs.len() as u64;
    let metadata = SampleMetadata {
        sample_id: req.sample_id.clone(),
        job_id: req.job_id.clone(),
        session_fingerprint,
        tool_type: req.tool_type.as_str().to_string(),
        capture_mode: "implied_use".to_string(),
        policy_version: req.policy_version.clone(),
        captured_at: time::format_iso_utc(captured_at),
        raw_expires_at: time::format_iso_utc(raw_expires_at),
        derived_expires_at: time::format_iso_utc(derived_expires_at),
        input,
        outputs,
        params: req.params.clone(),
        outcome: SampleOutcome { output_count },
        features: SampleFeatures {
            input_size_bytes: input_size,
            output_count,
            output_size_bytes_total: output_total,
            output_size_bytes_average: if output_count > 0 {
                output_total / output_count
            } else {
                0
            },
        },
    };

    // metadata.json lands last, atomically
    let rendered = serde_json::to_string_pretty(&metadata)
        .map_err(|e| Error::Internal(format!("metadata encode: {e}")))?;
    let temp = req.sample_dir.join("metadata.json.tmp");
    std::fs::write(&temp, rendered)?;
    std::fs::rename(&temp, req.sample_dir.join("metadata.json"))?;

    Ok(metadata)
}

/// Copy one file into the sample directory and digest it.
fn copy_into_sample(source: &Path, req: &OwnedCapture) -> Result<SampleFile> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Internal(format!("uncopyable path {}", source.display())))?
        .to_string();
    let target = req.sample_dir.join(&name);
    std::fs::copy(source, &target)?;

    let sha256 = hash::sha256_file(&target)?;
    let relative = target
        .strip_prefix(&req.root)
        .unwrap_or(&target)
        .to_string_lossy()
        .to_string();

    Ok(SampleFile {
        name,
        path: relative,
        sha256,
    })
}
