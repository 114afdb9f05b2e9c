//! Signed webhook callbacks
//!
//! Each callback POST carries the JSON payload plus an
//! `X-SoundMaxx-Signature` header: lowercase-hex HMAC-SHA256 of the exact
//! body bytes under the job's webhook secret. Delivery is at-most-once; the
//! engine swallows send failures.

use reqwest::header::CONTENT_TYPE;
use smx_common::{signing, ArtifactPayload, Error, JobRequest, Result};
use std::time::Duration;
use tracing::debug;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "x-soundmaxx-signature";

/// Overall budget for one webhook POST.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Webhook POST client
pub struct CallbackSender {
    client: reqwest::Client,
}

impl CallbackSender {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build callback client: {e}")))?;
        Ok(Self { client })
    }

    /// POST `payload` to the job's webhook, signed with its secret.
    pub async fn send(&self, job: &JobRequest, payload: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| Error::Internal(format!("callback encode: {e}")))?;
        let signature = signing::sign_body(&job.callback.webhook_secret, &body);

        debug!(url = %job.callback.webhook_url, "Posting webhook callback");
        self.client
            .post(&job.callback.webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("callback POST: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Internal(format!("callback POST: {e}")))?;
        Ok(())
    }
}

/// Body for the best-effort `running` callback.
pub fn running_payload(external_job_id: &str) -> serde_json::Value {
    serde_json::json!({
        "externalJobId": external_job_id,
        "status": "running",
        "progressPct": 20,
    })
}

/// Body for the terminal `succeeded` callback.
pub fn succeeded_payload(
    external_job_id: &str,
    model: &str,
    quality_flags: &[&str],
    artifacts: &[ArtifactPayload],
) -> serde_json::Value {
    serde_json::json!({
        "externalJobId": external_job_id,
        "status": "succeeded",
        "progressPct": 100,
        "model": model,
        "qualityFlags": quality_flags,
        "artifacts": artifacts,
    })
}

/// Body for the terminal `failed` callback.
pub fn failed_payload(external_job_id: &str, error_code: &str) -> serde_json::Value {
    serde_json::json!({
        "externalJobId": external_job_id,
        "status": "failed",
        "progressPct": 100,
        "errorCode": error_code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_payload_shape() {
        let payload = running_payload("job-1");
        assert_eq!(payload["status"], "running");
        assert_eq!(payload["progressPct"], 20);
    }

    #[test]
    fn succeeded_payload_carries_artifacts_and_flags() {
        let artifacts = vec![ArtifactPayload {
            blob_url: "http://localhost:8000/outputs/job-1/key-bpm.json".to_string(),
            blob_key: "key-bpm.json".to_string(),
            format: "json".to_string(),
            size_bytes: 42,
        }];
        let payload = succeeded_payload("job-1", "fallback_band_split", &["fallback_passthrough_output"], &artifacts);

        assert_eq!(payload["model"], "fallback_band_split");
        assert_eq!(payload["qualityFlags"][0], "fallback_passthrough_output");
        assert_eq!(payload["artifacts"][0]["blobKey"], "key-bpm.json");
        assert_eq!(payload["artifacts"][0]["sizeBytes"], 42);
    }

    #[test]
    fn failed_payload_shape() {
        let payload = failed_payload("job-1", "downloaded source is empty: http://x");
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["progressPct"], 100);
        assert!(payload["errorCode"].as_str().unwrap().contains("empty"));
    }
}
