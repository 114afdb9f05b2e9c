//! HTTP API handlers

mod health;
mod jobs;

pub use health::health_routes;
pub use jobs::job_routes;
