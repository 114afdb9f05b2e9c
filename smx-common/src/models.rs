//! Wire types for the worker HTTP surface and webhook callbacks
//!
//! Field names follow the external camelCase wire format. A `JobRequest` is
//! immutable once accepted; `WorkerJobStatus` is mutated only by the single
//! task executing the job.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Tool families the worker can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    StemIsolation,
    Mastering,
    KeyBpm,
    LoudnessReport,
    MidiExtract,
}

impl ToolType {
    /// Wire/ledger name of the tool type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::StemIsolation => "stem_isolation",
            ToolType::Mastering => "mastering",
            ToolType::KeyBpm => "key_bpm",
            ToolType::LoudnessReport => "loudness_report",
            ToolType::MidiExtract => "midi_extract",
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stem_isolation" => Ok(ToolType::StemIsolation),
            "mastering" => Ok(ToolType::Mastering),
            "key_bpm" => Ok(ToolType::KeyBpm),
            "loudness_report" => Ok(ToolType::LoudnessReport),
            "midi_extract" => Ok(ToolType::MidiExtract),
            other => Err(Error::UnsupportedTool(other.to_string())),
        }
    }
}

/// Source audio reference supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAsset {
    pub id: String,
    pub blob_url: String,
    pub duration_sec: f64,
}

/// Webhook target for progress callbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackConfig {
    pub webhook_url: String,
    pub webhook_secret: String,
}

/// Dataset capture consent attached to the job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetConfig {
    #[serde(default = "default_capture_mode")]
    pub capture_mode: String,
    pub policy_version: String,
    pub source_session_id: String,
}

fn default_capture_mode() -> String {
    "implied_use".to_string()
}

/// A job submission, immutable once accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: String,
    pub tool_type: ToolType,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub source_asset: SourceAsset,
    pub callback: CallbackConfig,
    pub dataset: DatasetConfig,
}

impl JobRequest {
    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(Error::Validation("jobId must not be empty".to_string()));
        }
        if !is_http_url(&self.source_asset.blob_url) {
            return Err(Error::Validation(
                "sourceAsset.blobUrl must be an http(s) URL".to_string(),
            ));
        }
        if self.source_asset.duration_sec < 0.0 {
            return Err(Error::Validation(
                "sourceAsset.durationSec must be >= 0".to_string(),
            ));
        }
        if !is_http_url(&self.callback.webhook_url) {
            return Err(Error::Validation(
                "callback.webhookUrl must be an http(s) URL".to_string(),
            ));
        }
        if self.callback.webhook_secret.len() < 16 {
            return Err(Error::Validation(
                "callback.webhookSecret must be at least 16 characters".to_string(),
            ));
        }
        if self.dataset.capture_mode != "implied_use" {
            return Err(Error::Validation(
                "dataset.captureMode must be \"implied_use\"".to_string(),
            ));
        }
        if self.dataset.policy_version.is_empty() || self.dataset.policy_version.len() > 64 {
            return Err(Error::Validation(
                "dataset.policyVersion must be 1..=64 characters".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Published description of one output artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactPayload {
    pub blob_url: String,
    pub blob_key: String,
    pub format: String,
    pub size_bytes: u64,
}

/// Job lifecycle states, monotonic along queued -> running -> terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observable status of a job, returned by `POST /jobs` and `GET /jobs/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJobStatus {
    pub external_job_id: String,
    pub status: JobState,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactPayload>,
}

impl WorkerJobStatus {
    /// Fresh queued status as returned from `POST /jobs`.
    pub fn queued(external_job_id: &str, model: &str) -> Self {
        Self {
            external_job_id: external_job_id.to_string(),
            status: JobState::Queued,
            model: model.to_string(),
            eta_sec: Some(180),
            progress_pct: Some(5),
            error_code: None,
            artifacts: Vec::new(),
        }
    }
}
