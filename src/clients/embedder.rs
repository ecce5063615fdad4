use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::pipeline::embedding::Embedder;

/// OpenAI互換の `POST {base}/v1/embeddings` で埋め込みを取得する。
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    /// # Errors
    /// HTTPクライアントの構築またはベースURLの解釈に失敗した場合。
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding client")?;
        let base_url = Url::parse(&base_url.into()).context("invalid embedding base URL")?;
        let endpoint = base_url
            .join("v1/embeddings")
            .context("failed to build embeddings URL")?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding endpoint returned error status")?;

        let mut items = response
            .json::<EmbeddingResponse>()
            .await
            .context("failed to deserialize embedding response")?
            .data;
        ensure!(
            items.len() == texts.len(),
            "embedding endpoint returned {} vectors for {} texts",
            items.len(),
            texts.len()
        );
        if items.iter().all(|item| item.index.is_some()) {
            items.sort_by_key(|item| item.index);
        }

        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}
