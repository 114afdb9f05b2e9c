//! Shared fixtures for worker integration tests
#![allow(dead_code)]

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use smx_worker::audio::{write_wav_24bit, AudioData};
use smx_worker::config::WorkerConfig;
use smx_worker::AppState;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_API_KEY: &str = "test-worker-api-key";
pub const TEST_WEBHOOK_SECRET: &str = "0123456789abcdef";

/// Worker config rooted in a temp directory.
pub fn test_config(root: &Path) -> WorkerConfig {
    WorkerConfig {
        api_key: TEST_API_KEY.to_string(),
        public_base_url: "http://localhost:8000".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        output_root: root.join("outputs"),
        tmp_root: root.join("tmp"),
        source_cache_root: root.join("source-cache"),
        dataset_root: root.join("consented"),
        model_artifact_root: root.join("models"),
        cache_max_bytes: 0,
        cache_max_files: 0,
        stem_timeout_sec: 30,
        stem_zip_deflate: false,
        roformer_model: "UVR-MDX-NET-Inst_HQ_5.onnx".to_string(),
        demucs_model: "UVR-MDX-NET-Inst_HQ_5.onnx".to_string(),
        mastering_engine: "matchering_2_0".to_string(),
        sonicmaster_script: None,
        dataset_salt: "test-salt".to_string(),
        raw_retention_days: 90,
        derived_retention_days: 365,
    }
}

/// Router + state over a test config.
pub fn test_app(config: WorkerConfig) -> (Router, AppState) {
    config.ensure_roots().unwrap();
    let state = AppState::new(config).unwrap();
    let app = smx_worker::build_router(state.clone());
    (app, state)
}

/// A sine fixture WAV in memory.
pub fn sine_wav_bytes(freq: f32, seconds: f32) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.wav");
    let sample_rate = 44_100u32;
    let frames = (sample_rate as f32 * seconds) as usize;
    let samples: Vec<f32> = (0..frames)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect();
    write_wav_24bit(
        &path,
        &AudioData {
            sample_rate,
            channels: vec![samples],
        },
    )
    .unwrap();
    std::fs::read(&path).unwrap()
}

/// HTTP server handing out one body at several paths, counting hits.
pub struct SourceServer {
    pub base_url: String,
    pub hits: Arc<AtomicUsize>,
}

pub async fn spawn_source_server(body: Vec<u8>) -> SourceServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let serve_hits = hits.clone();

    let handler = move || {
        let body = body.clone();
        let hits = serve_hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            body
        }
    };

    let app = Router::new()
        .route("/audio/:name", get(handler))
        .route("/missing/:name", get(|| async { StatusCode::NOT_FOUND }))
        .route("/empty/:name", get(|| async { Vec::<u8>::new() }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    SourceServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}

/// Captured webhook delivery: signature header + raw body.
#[derive(Clone, Default)]
pub struct WebhookLog {
    pub deliveries: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl WebhookLog {
    pub fn bodies(&self) -> Vec<(String, Vec<u8>)> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.bodies()
            .iter()
            .filter_map(|(_, body)| serde_json::from_slice::<serde_json::Value>(body).ok())
            .filter_map(|v| v.get("status").and_then(|s| s.as_str()).map(String::from))
            .collect()
    }
}

pub async fn spawn_webhook_server() -> (String, WebhookLog) {
    let log = WebhookLog::default();
    let capture = log.clone();

    let handler = move |headers: HeaderMap, body: Bytes| {
        let capture = capture.clone();
        async move {
            let signature = headers
                .get("x-soundmaxx-signature")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            capture
                .deliveries
                .lock()
                .unwrap()
                .push((signature, body.to_vec()));
            StatusCode::OK
        }
    };

    let app = Router::new().route("/hooks/jobs", post(handler));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hooks/jobs"), log)
}

/// JSON body for a job submission.
pub fn job_request_body(
    job_id: &str,
    tool_type: &str,
    source_url: &str,
    webhook_url: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "jobId": job_id,
        "toolType": tool_type,
        "params": params,
        "sourceAsset": {
            "id": format!("asset-{job_id}"),
            "blobUrl": source_url,
            "durationSec": 1.0
        },
        "callback": {
            "webhookUrl": webhook_url,
            "webhookSecret": TEST_WEBHOOK_SECRET
        },
        "dataset": {
            "captureMode": "implied_use",
            "policyVersion": "v1",
            "sourceSessionId": "session-1"
        }
    })
}

/// Single directory listing, names only.
pub fn dir_names(path: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(path) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// First (and only) sample directory under the dataset root.
pub fn sample_dirs(dataset_root: &Path) -> Vec<PathBuf> {
    let samples = dataset_root.join("samples");
    let Ok(entries) = std::fs::read_dir(&samples) else {
        return Vec::new();
    };
    entries.filter_map(|e| e.ok()).map(|e| e.path()).collect()
}
