//! Health check endpoint

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

/// GET /health
///
/// Liveness probe for monitoring; no auth.
pub async fn health_check() -> Json<Value> {
    Json(json!({"ok": true, "worker": "soundmaxx"}))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
