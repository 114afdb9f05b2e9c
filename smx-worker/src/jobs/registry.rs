//! In-memory job status registry
//!
//! Statuses live for the process lifetime. Each status has a single writer
//! (the task executing that job); terminal records are read-only.

use smx_common::WorkerJobStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Shared map of external job id -> status
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<String, WorkerJobStatus>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status, replacing any previous record for the same id.
    pub async fn insert(&self, status: WorkerJobStatus) {
        let mut map = self.inner.write().await;
        map.insert(status.external_job_id.clone(), status);
    }

    /// Snapshot of a job's status.
    pub async fn get(&self, external_job_id: &str) -> Option<WorkerJobStatus> {
        let map = self.inner.read().await;
        map.get(external_job_id).cloned()
    }

    /// Mutate a job's status in place. Terminal records are never touched.
    pub async fn update<F>(&self, external_job_id: &str, mutate: F)
    where
        F: FnOnce(&mut WorkerJobStatus),
    {
        let mut map = self.inner.write().await;
        match map.get_mut(external_job_id) {
            Some(status) if status.status.is_terminal() => {
                warn!(job_id = %external_job_id, "Ignoring update to terminal job status");
            }
            Some(status) => mutate(status),
            None => warn!(job_id = %external_job_id, "Update for unknown job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smx_common::JobState;

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let registry = JobRegistry::new();
        registry
            .insert(WorkerJobStatus::queued("job-1", "essentia"))
            .await;

        let status = registry.get("job-1").await.unwrap();
        assert_eq!(status.status, JobState::Queued);
        assert!(registry.get("job-2").await.is_none());
    }

    #[tokio::test]
    async fn update_advances_status() {
        let registry = JobRegistry::new();
        registry
            .insert(WorkerJobStatus::queued("job-1", "essentia"))
            .await;

        registry
            .update("job-1", |s| {
                s.status = JobState::Running;
                s.progress_pct = Some(20);
            })
            .await;

        let status = registry.get("job-1").await.unwrap();
        assert_eq!(status.status, JobState::Running);
        assert_eq!(status.progress_pct, Some(20));
    }

    #[tokio::test]
    async fn terminal_status_is_read_only() {
        let registry = JobRegistry::new();
        registry
            .insert(WorkerJobStatus::queued("job-1", "essentia"))
            .await;
        registry
            .update("job-1", |s| s.status = JobState::Succeeded)
            .await;

        registry
            .update("job-1", |s| {
                s.status = JobState::Failed;
                s.error_code = Some("late write".to_string());
            })
            .await;

        let status = registry.get("job-1").await.unwrap();
        assert_eq!(status.status, JobState::Succeeded);
        assert!(status.error_code.is_none());
    }

    #[tokio::test]
    async fn resubmission_replaces_record() {
        let registry = JobRegistry::new();
        registry
            .insert(WorkerJobStatus::queued("job-1", "essentia"))
            .await;
        registry
            .update("job-1", |s| s.status = JobState::Failed)
            .await;

        registry
            .insert(WorkerJobStatus::queued("job-1", "essentia"))
            .await;
        assert_eq!(registry.get("job-1").await.unwrap().status, JobState::Queued);
    }
}
