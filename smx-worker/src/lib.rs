//! smx-worker - SoundMaxx Audio Processing Worker
//!
//! HTTP-fronted worker that accepts tool-specific audio jobs (stem
//! isolation, mastering, key/BPM, loudness reporting, MIDI extraction),
//! executes them asynchronously and reports progress to a caller-provided
//! webhook signed with HMAC-SHA256.
//!
//! Job lifecycle: intake -> source staging (content-addressed cache) ->
//! tool execution (stem isolation in a killable child process) -> artifact
//! publication -> signed callback. Successful jobs with implied-use consent
//! additionally feed the training dataset ledger.

pub mod api;
pub mod audio;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod jobs;
pub mod qa;
pub mod sandbox;
pub mod stems;
pub mod tools;

use axum::Router;
use std::sync::Arc;
use tower_http::services::ServeDir;

use crate::cache::SourceCache;
use crate::config::WorkerConfig;
use crate::dataset::DatasetLedger;
use crate::jobs::{CallbackSender, JobRegistry};

/// Application state shared across handlers and job executions
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<WorkerConfig>,
    pub registry: JobRegistry,
    pub cache: Arc<SourceCache>,
    pub ledger: Arc<DatasetLedger>,
    pub callbacks: Arc<CallbackSender>,
}

impl AppState {
    pub fn new(config: WorkerConfig) -> smx_common::Result<Self> {
        let config = Arc::new(config);
        let cache = Arc::new(SourceCache::new(
            config.source_cache_root.clone(),
            config.cache_max_bytes,
            config.cache_max_files,
        )?);
        let ledger = Arc::new(DatasetLedger::new(
            config.dataset_root.clone(),
            config.dataset_salt.clone(),
            config.raw_retention_days,
            config.derived_retention_days,
        ));
        let callbacks = Arc::new(CallbackSender::new()?);

        Ok(Self {
            config,
            registry: JobRegistry::new(),
            cache,
            ledger,
            callbacks,
        })
    }
}

/// Build application router
///
/// - `GET /health` - liveness probe
/// - `POST /jobs` - submit a job (bearer auth)
/// - `GET /jobs/{id}` - poll job status (bearer auth)
/// - `GET /outputs/{jobId}/{filename}` - static artifact hosting (no auth)
pub fn build_router(state: AppState) -> Router {
    let outputs = ServeDir::new(&state.config.output_root);

    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .nest_service("/outputs", outputs)
        .with_state(state)
}
