use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_ERROR_BODY_LENGTH: usize = 500;

/// OpenAI互換チャットAPIのメッセージ。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// サンプリングパラメータ。未指定の値は送信しない。
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub sampling: SamplingParams,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("generation provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion: {0}")]
    MalformedCompletion(String),
}

/// テキスト生成プロバイダ。非成功レスポンスはその呼び出しの失敗として扱う。
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a ChatRequest,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// `POST {base}/v1/chat/completions` を呼ぶクライアント。
#[derive(Debug, Clone)]
pub struct GeneratorClient {
    client: Client,
    endpoint: Url,
    model: String,
}

impl GeneratorClient {
    /// # Errors
    /// HTTPクライアントの構築またはベースURLの解釈に失敗した場合。
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build generator client")?;
        let base_url = Url::parse(&base_url.into()).context("invalid generator base URL")?;
        let endpoint = base_url
            .join("v1/chat/completions")
            .context("failed to build chat completions URL")?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl TextGenerator for GeneratorClient {
    async fn generate(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        let body = CompletionBody {
            model: &self.model,
            request,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "generation provider returned error status");
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::MalformedCompletion(error.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                GenerationError::MalformedCompletion("completion has no message content".into())
            })?;

        debug!(chars = content.chars().count(), "generation completed");
        Ok(content)
    }
}

fn truncate_body(body: &str) -> String {
    let char_count = body.chars().count();
    if char_count <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let truncated: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
    format!("{truncated}... (truncated, {char_count} chars)")
}
