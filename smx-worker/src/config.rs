//! Worker configuration resolved from the process environment
//!
//! All knobs are env-style; the bearer token (`WORKER_API_KEY`) is the one
//! value whose absence is a fatal startup error. Everything else falls back
//! to a documented default.

use smx_common::{Error, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Default separator model filename for both variants.
const DEFAULT_SEPARATOR_MODEL: &str = "UVR-MDX-NET-Inst_HQ_5.onnx";

/// Resolved worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Required bearer token for `POST /jobs` and `GET /jobs/{id}`
    pub api_key: String,
    /// Base URL prefixed onto published artifact paths (no trailing slash)
    pub public_base_url: String,
    /// Listen address for the HTTP surface
    pub bind_addr: String,
    /// Served artifact root (`/outputs`)
    pub output_root: PathBuf,
    /// Per-job workspace root, deleted after each job
    pub tmp_root: PathBuf,
    /// Content-addressed source download cache
    pub source_cache_root: PathBuf,
    /// Dataset ledger root (samples + manifest.jsonl)
    pub dataset_root: PathBuf,
    /// Training artifact output root
    pub model_artifact_root: PathBuf,
    /// Cache eviction cap in bytes; 0 disables the byte dimension
    pub cache_max_bytes: u64,
    /// Cache eviction cap in files; 0 disables the count dimension
    pub cache_max_files: u64,
    /// Hard wall-clock budget for stem isolation, floored to 30 s
    pub stem_timeout_sec: u64,
    /// Whether the stems zip uses DEFLATE instead of STORED
    pub stem_zip_deflate: bool,
    /// Preferred separator model for the mel_band_roformer variant
    pub roformer_model: String,
    /// Preferred separator model for the demucs_v4 variant
    pub demucs_model: String,
    /// Requested mastering engine (lowercased)
    pub mastering_engine: String,
    /// External mastering script, required when engine = sonicmaster
    pub sonicmaster_script: Option<PathBuf>,
    /// Salt mixed into dataset session fingerprints
    pub dataset_salt: String,
    /// Raw sample retention in days, floored to 1
    pub raw_retention_days: i64,
    /// Derived sample retention in days, clamped >= raw retention
    pub derived_retention_days: i64,
}

impl WorkerConfig {
    /// Resolve configuration from the process environment.
    ///
    /// Fails with [`Error::Config`] when `WORKER_API_KEY` is unset or empty.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("WORKER_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("WORKER_API_KEY must be set".to_string()))?;

        let public_base_url = env_or("WORKER_PUBLIC_BASE_URL", "http://localhost:8000")
            .trim_end_matches('/')
            .to_string();

        let stem_timeout_sec = env_u64("STEM_ISOLATION_TIMEOUT_SEC", 120).max(30);

        let raw_retention_days = env_i64("DATASET_RAW_RETENTION_DAYS", 90).max(1);
        let derived_retention_days =
            env_i64("DATASET_DERIVED_RETENTION_DAYS", 365).max(raw_retention_days);

        let mastering_engine = env_or("MASTERING_ENGINE", "matchering_2_0")
            .trim()
            .to_lowercase();

        let sonicmaster_script = std::env::var("SONICMASTER_SCRIPT_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        if mastering_engine == "sonicmaster" && sonicmaster_script.is_none() {
            warn!("MASTERING_ENGINE=sonicmaster but SONICMASTER_SCRIPT_PATH is unset; engine will fall through");
        }

        let config = Self {
            api_key,
            public_base_url,
            bind_addr: env_or("WORKER_BIND_ADDR", "127.0.0.1:8000"),
            output_root: PathBuf::from(env_or("OUTPUT_ROOT", "data/outputs")),
            tmp_root: PathBuf::from(env_or("TMP_ROOT", "data/tmp")),
            source_cache_root: PathBuf::from(env_or("SOURCE_CACHE_ROOT", "data/source-cache")),
            dataset_root: PathBuf::from(env_or("DATASET_ROOT", "data/consented")),
            model_artifact_root: PathBuf::from(env_or("MODEL_ARTIFACT_ROOT", "data/models")),
            cache_max_bytes: env_u64("SOURCE_CACHE_MAX_BYTES", 2 * 1024 * 1024 * 1024),
            cache_max_files: env_u64("SOURCE_CACHE_MAX_FILES", 300),
            stem_timeout_sec,
            stem_zip_deflate: matches!(
                env_or("STEM_ZIP_COMPRESSION", "stored").to_lowercase().as_str(),
                "deflate" | "compressed"
            ),
            roformer_model: env_or("STEM_MODEL_ROFORMER_NAME", DEFAULT_SEPARATOR_MODEL)
                .trim()
                .to_string(),
            demucs_model: env_or("STEM_MODEL_DEMUCS_NAME", DEFAULT_SEPARATOR_MODEL)
                .trim()
                .to_string(),
            mastering_engine,
            sonicmaster_script,
            dataset_salt: env_or("DATASET_SESSION_SALT", "soundmaxx-dataset-salt"),
            raw_retention_days,
            derived_retention_days,
        };

        info!(
            output_root = %config.output_root.display(),
            cache_root = %config.source_cache_root.display(),
            stem_timeout_sec = config.stem_timeout_sec,
            mastering_engine = %config.mastering_engine,
            "Worker configuration resolved"
        );

        Ok(config)
    }

    /// Create every directory root the worker owns.
    pub fn ensure_roots(&self) -> Result<()> {
        for root in [
            &self.output_root,
            &self.tmp_root,
            &self.source_cache_root,
            &self.dataset_root,
            &self.model_artifact_root,
        ] {
            std::fs::create_dir_all(root)?;
        }
        Ok(())
    }

    /// Public URL for one published artifact.
    pub fn output_url(&self, job_id: &str, filename: &str) -> String {
        format!("{}/outputs/{}/{}", self.public_base_url, job_id, filename)
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_worker_env() {
        for name in [
            "WORKER_API_KEY",
            "WORKER_PUBLIC_BASE_URL",
            "WORKER_BIND_ADDR",
            "SOURCE_CACHE_MAX_BYTES",
            "SOURCE_CACHE_MAX_FILES",
            "STEM_ISOLATION_TIMEOUT_SEC",
            "STEM_ZIP_COMPRESSION",
            "MASTERING_ENGINE",
            "DATASET_RAW_RETENTION_DAYS",
            "DATASET_DERIVED_RETENTION_DAYS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn missing_api_key_is_fatal() {
        clear_worker_env();
        assert!(WorkerConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_resolve() {
        clear_worker_env();
        std::env::set_var("WORKER_API_KEY", "test-key");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.public_base_url, "http://localhost:8000");
        assert_eq!(config.stem_timeout_sec, 120);
        assert_eq!(config.cache_max_files, 300);
        assert_eq!(config.cache_max_bytes, 2 * 1024 * 1024 * 1024);
        assert!(!config.stem_zip_deflate);
        assert_eq!(config.mastering_engine, "matchering_2_0");
        assert_eq!(config.raw_retention_days, 90);
        assert_eq!(config.derived_retention_days, 365);

        clear_worker_env();
    }

    #[test]
    #[serial]
    fn stem_timeout_is_floored() {
        clear_worker_env();
        std::env::set_var("WORKER_API_KEY", "test-key");
        std::env::set_var("STEM_ISOLATION_TIMEOUT_SEC", "5");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.stem_timeout_sec, 30);

        clear_worker_env();
    }

    #[test]
    #[serial]
    fn derived_retention_clamped_to_raw() {
        clear_worker_env();
        std::env::set_var("WORKER_API_KEY", "test-key");
        std::env::set_var("DATASET_RAW_RETENTION_DAYS", "400");
        std::env::set_var("DATASET_DERIVED_RETENTION_DAYS", "365");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(config.raw_retention_days, 400);
        assert_eq!(config.derived_retention_days, 400);

        clear_worker_env();
    }

    #[test]
    #[serial]
    fn zip_compression_aliases() {
        clear_worker_env();
        std::env::set_var("WORKER_API_KEY", "test-key");
        std::env::set_var("STEM_ZIP_COMPRESSION", "deflate");
        assert!(WorkerConfig::from_env().unwrap().stem_zip_deflate);

        std::env::set_var("STEM_ZIP_COMPRESSION", "compressed");
        assert!(WorkerConfig::from_env().unwrap().stem_zip_deflate);

        std::env::set_var("STEM_ZIP_COMPRESSION", "stored");
        assert!(!WorkerConfig::from_env().unwrap().stem_zip_deflate);

        clear_worker_env();
    }

    #[test]
    #[serial]
    fn base_url_trailing_slash_trimmed() {
        clear_worker_env();
        std::env::set_var("WORKER_API_KEY", "test-key");
        std::env::set_var("WORKER_PUBLIC_BASE_URL", "https://worker.example.com/");

        let config = WorkerConfig::from_env().unwrap();
        assert_eq!(
            config.output_url("job-1", "key-bpm.json"),
            "https://worker.example.com/outputs/job-1/key-bpm.json"
        );

        clear_worker_env();
    }
}
