//! Common error types for the SoundMaxx worker

use thiserror::Error;

/// Common result type for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds spanning the job pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("downloaded source is empty: {0}")]
    EmptySource(String),

    #[error("Download failed: {0}")]
    Download(String),

    /// Stem isolation exceeded its wall-clock budget. Recovered by the
    /// band-split fallback, not a job failure.
    #[error("processing_timeout_after_{0}s")]
    Timeout(u64),

    #[error("processing_worker_exited_without_result (exitcode={0:?})")]
    WorkerExited(Option<i32>),

    #[error("{0}")]
    ToolFailure(String),

    #[error("missing stems after canonicalization: {}", .0.join(", "))]
    MissingStems(Vec<String>),

    #[error("Unsupported tool type: {0}")]
    UnsupportedTool(String),

    #[error("sample rate mismatch: {0} Hz vs {1} Hz")]
    SampleRateMismatch(u32, u32),

    #[error("stem isolation model load/separation failed: {0}")]
    SeparationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is the stem-isolation hard timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
