use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::app::AppState;
use crate::pipeline::AnalysisError;

#[derive(Debug, Deserialize)]
pub(crate) struct TextRequest {
    pub(crate) text: String,
}

#[derive(Debug, Serialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Debug, Serialize)]
struct AttributesResponse {
    attributes: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

/// 空の入力を 400 として弾く。
pub(crate) fn reject_blank(text: &str) -> Option<axum::response::Response> {
    if text.trim().is_empty() {
        let body = Json(ErrorResponse {
            error: "text must not be empty".into(),
        });
        return Some((StatusCode::BAD_REQUEST, body).into_response());
    }
    None
}

fn error_response(error: &AnalysisError) -> axum::response::Response {
    let status = match error {
        AnalysisError::Validation(_) => {
            warn!(error = %error, "rejected review batch");
            StatusCode::BAD_REQUEST
        }
        AnalysisError::Generation(_) => {
            error!(error = %error, "generation provider call failed");
            StatusCode::BAD_GATEWAY
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub(crate) async fn summarize(
    State(state): State<AppState>,
    Json(payload): Json<TextRequest>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_blank(&payload.text) {
        return rejection;
    }
    match state.analyzer().summarize(&payload.text).await {
        Ok(summary) => Json(SummaryResponse { summary }).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn keywords(
    State(state): State<AppState>,
    Json(payload): Json<TextRequest>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_blank(&payload.text) {
        return rejection;
    }
    match state.analyzer().keywords(&payload.text) {
        Ok(keywords) => Json(keywords).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn attributes(
    State(state): State<AppState>,
    Json(payload): Json<TextRequest>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_blank(&payload.text) {
        return rejection;
    }
    match state.analyzer().attributes(&payload.text).await {
        Ok(attributes) => Json(AttributesResponse { attributes }).into_response(),
        Err(error) => error_response(&error),
    }
}
