//! # SoundMaxx Common Library
//!
//! Shared code for the SoundMaxx worker services including:
//! - Error types spanning the job pipeline
//! - Wire types (JobRequest, WorkerJobStatus, ArtifactPayload)
//! - HMAC body signing and bearer-token verification
//! - SHA-256 hashing helpers
//! - Timestamp parsing/formatting utilities

pub mod error;
pub mod hash;
pub mod models;
pub mod signing;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    ArtifactPayload, CallbackConfig, DatasetConfig, JobRequest, JobState, SourceAsset, ToolType,
    WorkerJobStatus,
};
