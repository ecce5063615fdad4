use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::analyze::{ErrorResponse, reject_blank};
use crate::app::AppState;
use crate::queue::{JobKind, JobLookup, JobOutput, JobPayload, JobState};

#[derive(Debug, Deserialize)]
pub(crate) struct EnqueueRequest {
    text: String,
    #[serde(default)]
    kind: JobKind,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: Uuid,
    status: JobState,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    job_id: Uuid,
    status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(crate) async fn enqueue(
    State(state): State<AppState>,
    Json(payload): Json<EnqueueRequest>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_blank(&payload.text) {
        return rejection;
    }
    let payload = JobPayload {
        text: payload.text,
        kind: payload.kind,
    };
    match state.jobs().enqueue(payload).await {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(EnqueueResponse {
                job_id,
                status: JobState::Queued,
            }),
        )
            .into_response(),
        Err(error) => {
            error!(error = %error, "failed to enqueue job");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub(crate) async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.jobs().get_status(job_id).await {
        Ok(JobLookup::Found(record)) => Json(StatusResponse {
            job_id: record.job_id,
            status: record.state,
            result: record.result,
            error: record.error,
        })
        .into_response(),
        Ok(JobLookup::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("job {job_id} not found"),
            }),
        )
            .into_response(),
        Err(error) => {
            error!(%job_id, error = %error, "failed to read job status");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            )
                .into_response()
        }
    }
}
