//! Per-job execution engine
//!
//! Drives the state machine `queued -> running -> succeeded | failed`:
//! workspace setup, source staging through the cache, tool execution (stem
//! isolation inside the timeout sandbox, everything else inline on the
//! blocking pool), artifact publication, dataset capture, callbacks and
//! workspace teardown. Status transitions are made only from this task.

use smx_common::{ArtifactPayload, Error, JobRequest, JobState, Result, ToolType};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::dataset::CaptureSample;
use crate::jobs::callback::{failed_payload, running_payload, succeeded_payload};
use crate::sandbox;
use crate::stems::fallback::build_stem_timeout_fallback;
use crate::tools;
use crate::tools::params::param_i64;
use crate::AppState;

/// Quality flag attached when a fallback model produced the output.
const FALLBACK_QUALITY_FLAG: &str = "fallback_passthrough_output";

/// Cap on the error code reported in statuses and callbacks.
const ERROR_CODE_BUDGET: usize = 120;

/// Model reported for a freshly queued job, before execution resolves one.
pub fn initial_model(config: &WorkerConfig, tool: ToolType) -> String {
    match tool {
        ToolType::StemIsolation => config.roformer_model.clone(),
        ToolType::Mastering => "matchering_2_0".to_string(),
        ToolType::KeyBpm => "essentia".to_string(),
        ToolType::LoudnessReport => "pyloudnorm".to_string(),
        ToolType::MidiExtract => "basic_pitch".to_string(),
    }
}

/// Execute one accepted job to a terminal state.
pub async fn execute_job(state: AppState, job: JobRequest) {
    let job_id = job.job_id.clone();
    info!(job_id = %job_id, tool = %job.tool_type, "Job execution starting");

    state
        .registry
        .update(&job_id, |s| {
            s.status = JobState::Running;
            s.progress_pct = Some(20);
        })
        .await;

    // Best-effort: a failed running callback never fails the job
    if let Err(e) = state.callbacks.send(&job, &running_payload(&job_id)).await {
        warn!(job_id = %job_id, error = %e, "Running callback failed");
    }

    let workspace = state.config.tmp_root.join(&job_id);
    let output_dir = state.config.output_root.join(&job_id);

    match run_pipeline(&state, &job, &workspace, &output_dir).await {
        Ok((model, produced)) => {
            let artifacts = collect_artifacts(&state.config, &job_id, &produced);
            state
                .registry
                .update(&job_id, |s| {
                    s.status = JobState::Succeeded;
                    s.model = model.clone();
                    s.progress_pct = Some(100);
                    s.eta_sec = Some(0);
                    s.artifacts = artifacts.clone();
                })
                .await;

            if job.dataset.capture_mode == "implied_use" {
                let capture = state
                    .ledger
                    .capture_training_sample(CaptureSample {
                        job_id: &job_id,
                        tool_type: job.tool_type,
                        source_session_id: &job.dataset.source_session_id,
                        policy_version: &job.dataset.policy_version,
                        input_file: &workspace.join("input.wav"),
                        output_files: &produced,
                        params: &job.params,
                    })
                    .await;
                if let Err(e) = capture {
                    warn!(job_id = %job_id, error = %e, "Dataset capture failed");
                }
            }

            let quality_flags: Vec<&str> = if model.starts_with("fallback_") {
                vec![FALLBACK_QUALITY_FLAG]
            } else {
                Vec::new()
            };
            let payload = succeeded_payload(&job_id, &model, &quality_flags, &artifacts);
            if let Err(e) = state.callbacks.send(&job, &payload).await {
                warn!(job_id = %job_id, error = %e, "Succeeded callback failed");
            }

            info!(job_id = %job_id, model = %model, artifacts = artifacts.len(), "Job succeeded");
        }
        Err(e) => {
            let error_code = truncate_error(&e.to_string());
            error!(job_id = %job_id, error = %e, "Job failed");

            state
                .registry
                .update(&job_id, |s| {
                    s.status = JobState::Failed;
                    s.progress_pct = Some(100);
                    s.error_code = Some(error_code.clone());
                })
                .await;

            if let Err(e) = state.callbacks.send(&job, &failed_payload(&job_id, &error_code)).await {
                warn!(job_id = %job_id, error = %e, "Failed callback failed");
            }
        }
    }

    // Workspace is always deleted; outputs stay behind for serving
    if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(job_id = %job_id, error = %e, "Workspace cleanup failed");
        }
    }
}

/// Stage the source, run the tool, return `(model, produced files)`.
async fn run_pipeline(
    state: &AppState,
    job: &JobRequest,
    workspace: &Path,
    output_dir: &Path,
) -> Result<(String, Vec<PathBuf>)> {
    // Fresh workspace: erase any prior content under this job id
    if tokio::fs::metadata(workspace).await.is_ok() {
        tokio::fs::remove_dir_all(workspace).await?;
    }
    tokio::fs::create_dir_all(workspace).await?;
    tokio::fs::create_dir_all(output_dir).await?;

    let input_path = workspace.join("input.wav");
    state.cache.stage(&job.source_asset.blob_url, &input_path).await?;
    state
        .registry
        .update(&job.job_id, |s| s.progress_pct = Some(40))
        .await;

    if job.tool_type == ToolType::StemIsolation {
        let timeout_sec = state.config.stem_timeout_sec;
        let sandboxed = sandbox::run_with_hard_timeout(
            job.tool_type,
            &input_path,
            output_dir,
            &job.params,
            timeout_sec,
        )
        .await;

        return match sandboxed {
            Ok(result) => Ok(result),
            // Hard timeout only: degrade to the band-split fallback
            Err(Error::Timeout(elapsed)) => {
                warn!(
                    job_id = %job.job_id,
                    timeout_sec = elapsed,
                    "Stem isolation timed out, building band-split fallback"
                );
                let stems = param_i64(&job.params, "stems", 4);
                let input = input_path.clone();
                let out = output_dir.to_path_buf();
                let deflate = state.config.stem_zip_deflate;
                tokio::task::spawn_blocking(move || {
                    build_stem_timeout_fallback(&input, &out, stems, deflate)
                })
                .await
                .map_err(|e| Error::Internal(format!("fallback task: {e}")))?
            }
            Err(other) => Err(other),
        };
    }

    // Everything else runs inline, off the request-serving path
    let config = state.config.clone();
    let tool = job.tool_type;
    let input = input_path.clone();
    let out = output_dir.to_path_buf();
    let params = job.params.clone();
    tokio::task::spawn_blocking(move || tools::run(&config, tool, &input, &out, &params))
        .await
        .map_err(|e| Error::Internal(format!("tool task: {e}")))?
}

/// Artifact payloads for the produced files that still exist.
fn collect_artifacts(
    config: &WorkerConfig,
    job_id: &str,
    produced: &[PathBuf],
) -> Vec<ArtifactPayload> {
    let mut artifacts = Vec::new();
    for file in produced {
        let Ok(meta) = std::fs::metadata(file) else { continue };
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else { continue };

        let format = file
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or("bin")
            .to_string();

        artifacts.push(ArtifactPayload {
            blob_url: config.output_url(job_id, name),
            blob_key: name.to_string(),
            format,
            size_bytes: meta.len(),
        });
    }
    artifacts
}

/// Error code limited to the callback budget, by character count.
fn truncate_error(message: &str) -> String {
    message.chars().take(ERROR_CODE_BUDGET).collect()
}
