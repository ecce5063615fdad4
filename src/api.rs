pub(crate) mod analyze;
pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod metrics;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(health::ping))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/summarize", post(analyze::summarize))
        .route("/v1/keywords", post(analyze::keywords))
        .route("/v1/attributes", post(analyze::attributes))
        .route("/v1/jobs", post(jobs::enqueue))
        .route("/v1/jobs/{job_id}", get(jobs::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
