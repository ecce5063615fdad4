use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

use crate::app::AppState;

const PING_GREETING: &str = "Привет! Я микросервис и я живой.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl HealthReport {
    fn ready() -> Self {
        Self {
            status: "ready",
            detail: None,
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail.into()),
        }
    }
}

pub(crate) async fn ping() -> Json<Value> {
    Json(json!({ "ping": PING_GREETING }))
}

pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, (StatusCode, Json<HealthReport>)> {
    state.telemetry().record_ready_probe();

    if let Some(pool) = state.db_pool() {
        if let Err(error) = sqlx::query("SELECT 1").execute(pool).await {
            error!(%error, "job database readiness check failed");
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport::degraded(format!("job_db: {error}"))),
            ));
        }
    }

    Ok(Json(HealthReport::ready()))
}

pub(crate) async fn live(State(state): State<AppState>) -> Json<HealthReport> {
    state.telemetry().record_live_probe();
    Json(HealthReport {
        status: "live",
        detail: None,
    })
}
