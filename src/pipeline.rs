//! レビュー分析パイプライン。
//!
//! 分割 → 正規化 → 代表サンプリング → 生成 → 構造化 の順に処理する。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::clients::{ChatMessage, ChatRequest, GenerationError, SamplingParams, TextGenerator};
use crate::observability::metrics::Metrics;
use crate::queue::{JobKind, JobOutput, JobPayload, JobRunner};

pub mod embedding;
pub mod keywords;
pub mod preprocess;
pub mod select;
pub mod structured;

use preprocess::{Normalizer, StopWords, split_reviews};
use select::{RepresentativeSampler, SampleMode};
use structured::StructuredRecoverer;

/// この件数未満の代表レビューは生成せずにそのまま連結する。
const DIRECT_SUMMARY_LIMIT: usize = 4;

const SUMMARY_SYSTEM_PROMPT: &str = "Ты получишь тексты отзывов покупателей об одном продукте. \
    Выдели кратко не больше 5 основных моментов, которые отмечают покупатели.";

const ATTRIBUTES_SYSTEM_PROMPT: &str = "You are an assistant that analyzes Russian customer reviews of a single product. \
    Extract every product *attribute* that is mentioned (e.g., «вкус», «запах», «текстура», «цвет»). \
    An attribute must be 1-3 short Russian words, concise and clear. \
    For each attribute, list every *characteristic* reviewers use to describe it \
    (e.g., «сладкий», «свежий», «мягкий», «сочный»). \
    If reviewers say the product is «кислый», «сладкий» or «горький», the attribute is «вкус». \
    If they say the product is «с комочками» or «волокнистый», the attribute is «консистенция». \
    Extract **all** attributes that appear in the reviews. \
    Return **ONLY ONE** JSON array and nothing else, no markdown, no comments. \
    Each element must have the keys \"attribute\" and \"characteristic\" (both in Russian). \
    Example:\n\
    [{\"attribute\":\"вкус\",\"characteristic\":\"сладкий\"}, \
    {\"attribute\":\"консистенция\",\"characteristic\":\"волокнистая\"}]";

static NEWLINE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[\n ]*").expect("newline run pattern is valid"));

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// 分割・正規化済みのバッチ。`originals[i]` と `normalized[i]` が対応する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewBatch {
    pub originals: Vec<String>,
    pub normalized: Vec<String>,
}

/// 要約・キーワード・属性抽出をまとめたサービス。
pub struct ReviewAnalyzer {
    normalizer: Arc<dyn Normalizer>,
    stop_words: Arc<StopWords>,
    sampler: Arc<RepresentativeSampler>,
    generator: Arc<dyn TextGenerator>,
    recoverer: StructuredRecoverer,
    keywords_top_n: usize,
    metrics: Option<Arc<Metrics>>,
}

impl ReviewAnalyzer {
    pub fn new(
        normalizer: Arc<dyn Normalizer>,
        stop_words: Arc<StopWords>,
        sampler: Arc<RepresentativeSampler>,
        generator: Arc<dyn TextGenerator>,
        keywords_top_n: usize,
    ) -> Self {
        Self {
            normalizer,
            stop_words,
            sampler,
            generator,
            recoverer: StructuredRecoverer::default(),
            keywords_top_n,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 入力テキストをレビューに分割し、それぞれを正規化する。
    ///
    /// # Errors
    /// レビューが1件も取り出せない場合は [`AnalysisError::Validation`]。
    pub fn prepare(&self, text: &str) -> Result<ReviewBatch, AnalysisError> {
        let originals = split_reviews(text)?;
        let normalized = originals
            .iter()
            .map(|review| self.normalizer.normalize(review, &self.stop_words))
            .collect();
        Ok(ReviewBatch {
            originals,
            normalized,
        })
    }

    /// 代表レビューから要約を作る。
    ///
    /// # Errors
    /// 入力が空の場合、または生成プロバイダの呼び出しが失敗した場合。
    pub async fn summarize(&self, text: &str) -> Result<String, AnalysisError> {
        let batch = self.prepare(text)?;
        let outcome = self
            .sampler
            .sample_representative(&batch.normalized, &batch.originals, SampleMode::Strict)
            .await?;
        self.summary_from(&outcome.representatives).await
    }

    /// 出現頻度の高い正規化トークンを返す。
    ///
    /// # Errors
    /// 入力が空の場合。
    pub fn keywords(&self, text: &str) -> Result<Vec<(String, usize)>, AnalysisError> {
        let batch = self.prepare(text)?;
        Ok(keywords::top_keywords(&batch.normalized, self.keywords_top_n))
    }

    /// 属性と特徴の一覧を `属性: 特徴1; 特徴2;` 形式で返す。
    ///
    /// 生成結果から構造を復元できない場合は生成テキストをそのまま返す。
    ///
    /// # Errors
    /// 入力が空の場合、または生成プロバイダの呼び出しが失敗した場合。
    pub async fn attributes(&self, text: &str) -> Result<String, AnalysisError> {
        let batch = self.prepare(text)?;
        let outcome = self
            .sampler
            .sample_representative(&batch.normalized, &batch.originals, SampleMode::Expanded)
            .await?;

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(ATTRIBUTES_SYSTEM_PROMPT),
                ChatMessage::user(outcome.representatives.join("\n\n")),
            ],
            sampling: SamplingParams {
                max_tokens: 400,
                temperature: 0.2,
                top_k: Some(1),
                stop: vec!["</s>".to_string()],
                ..SamplingParams::default()
            },
        };
        let generated = self.generate(&request).await?;

        let rendering = self.recoverer.render(&generated);
        if let Some(metrics) = &self.metrics {
            if rendering.is_grouped() {
                metrics.structured_recovered.inc();
            } else {
                metrics.structured_raw_fallback.inc();
            }
        }
        if !rendering.is_grouped() {
            warn!("attribute output was not structured, returning raw text");
        }
        Ok(rendering.into_text())
    }

    async fn summary_from(&self, representatives: &[String]) -> Result<String, AnalysisError> {
        let text = representatives.join("\n\n");
        if representatives.len() < DIRECT_SUMMARY_LIMIT {
            info!(
                representatives = representatives.len(),
                "too few reviews to summarize, returning them as is"
            );
            return Ok(NEWLINE_RUN.replace_all(&text, "\n").into_owned());
        }

        let request = ChatRequest {
            messages: vec![
                ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
                ChatMessage::user(text),
            ],
            sampling: SamplingParams {
                max_tokens: 256,
                temperature: 0.1,
                top_p: Some(0.98),
                repetition_penalty: Some(1.05),
                stop: vec!["</s>".to_string()],
                ..SamplingParams::default()
            },
        };
        self.generate(&request).await
    }

    async fn generate(&self, request: &ChatRequest) -> Result<String, AnalysisError> {
        let started = Instant::now();
        let result = self.generator.generate(request).await;
        if let Some(metrics) = &self.metrics {
            metrics
                .generation_duration
                .observe(started.elapsed().as_secs_f64());
            if result.is_err() {
                metrics.generation_failures.inc();
            }
        }
        Ok(result?)
    }
}

#[async_trait]
impl JobRunner for ReviewAnalyzer {
    async fn run(&self, payload: JobPayload) -> anyhow::Result<JobOutput> {
        Ok(match payload.kind {
            JobKind::Summary => JobOutput::Summary {
                summary: self.summarize(&payload.text).await?,
            },
            JobKind::Attributes => JobOutput::Attributes {
                attributes: self.attributes(&payload.text).await?,
            },
        })
    }
}
