//! Router tests against an in-memory job queue and a scripted generator.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use review_digest::{
    app::{ComponentRegistry, JobBackends, build_router},
    clients::{ChatRequest, GenerationError, TextGenerator},
    config::{Config, ENV_MUTEX},
    observability::{Telemetry, metrics::Metrics},
    pipeline::embedding::HashingEmbedder,
};

struct ScriptedGenerator {
    reply: Option<&'static str>,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
        self.reply
            .map(ToString::to_string)
            .ok_or_else(|| GenerationError::MalformedCompletion("no choices".to_string()))
    }
}

fn router(reply: Option<&'static str>) -> Router {
    let config = {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        // SAFETY: test code adjusts deterministic environment state sequentially.
        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("STOP_WORDS_PATH");
        }
        Config::from_env().expect("config loads")
    };
    let telemetry = Telemetry::with_metrics(Arc::new(Metrics::standalone().expect("metrics")));
    let registry = ComponentRegistry::assemble(
        config,
        telemetry,
        Arc::new(ScriptedGenerator { reply }),
        Arc::new(HashingEmbedder::new(32)),
        JobBackends::in_memory(),
    );
    build_router(registry)
}

fn post_json(uri: &str, payload: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request builds")
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn ping_answers_in_russian() {
    let response = router(None).oneshot(get("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "ping": "Привет! Я микросервис и я живой." })
    );
}

#[tokio::test]
async fn probes_and_metrics_respond() {
    let app = router(None);

    let live = app.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = app.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
    assert_eq!(json_body(ready).await["status"], "ready");

    let metrics = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let body = axum::body::to_bytes(metrics.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&body).contains("review_digest_jobs_enqueued_total"));
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let app = router(Some("unused"));
    for uri in ["/v1/summarize", "/v1/keywords", "/v1/attributes", "/v1/jobs"] {
        let response = app
            .clone()
            .oneshot(post_json(uri, &json!({ "text": "  \n " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn summarize_returns_small_batches_joined() {
    let response = router(Some("unused"))
        .oneshot(post_json(
            "/v1/summarize",
            &json!({ "text": "Отличный сок\nНемного дорого" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "summary": "Отличный сок\nНемного дорого" })
    );
}

#[tokio::test]
async fn keywords_are_word_count_pairs() {
    let response = router(None)
        .oneshot(post_json(
            "/v1/keywords",
            &json!({ "text": "свежий хлеб\nхлеб свежий и мягкий\nмягкий хлеб" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!([["хлеб", 3], ["свежий", 2], ["мягкий", 2]])
    );
}

#[tokio::test]
async fn attributes_are_grouped() {
    let response = router(Some(
        r#"[{"attribute":"вкус","characteristic":"сладкий"}]"#,
    ))
    .oneshot(post_json("/v1/attributes", &json!({ "text": "Очень сладкий" })))
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "attributes": "вкус: сладкий;" })
    );
}

#[tokio::test]
async fn generation_failure_is_a_bad_gateway() {
    let response = router(None)
        .oneshot(post_json("/v1/attributes", &json!({ "text": "Очень сладкий" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(json_body(response).await["error"].is_string());
}

#[tokio::test]
async fn jobs_are_accepted_and_queryable() {
    let app = router(None);

    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/jobs",
            &json!({ "text": "Хороший товар", "kind": "attributes" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["status"], "QUEUED");
    let job_id = body["job_id"].as_str().expect("job id").to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/v1/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["status"], "QUEUED");

    let missing = app
        .oneshot(get("/v1/jobs/0190a5d2-7f3e-7c1a-9d4b-2f6e8a1c3b5d"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
