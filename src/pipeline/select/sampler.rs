//! Representative sampling over a batch of reviews.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::SamplerConfig;
use crate::observability::metrics::Metrics;
use crate::pipeline::AnalysisError;
use crate::pipeline::embedding::EmbeddingCache;
use crate::util::kmeans::distance_sq;
use crate::util::text::analyzer_tokens;

use super::selector::{best_candidate, select_best_topic_model};
use super::topic_model::TopicModel;

/// How representatives are taken from the selected topic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleMode {
    /// One document per topic, nearest to the topic centroid.
    #[default]
    Strict,
    /// The topic model's representative documents, capped per topic.
    Expanded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    NoUsableTopics,
    ModelingFailed(String),
}

/// Which path produced a [`SampleOutcome`].
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBranch {
    SmallBatch,
    Modeled {
        granularity: usize,
        coherence: f64,
        topic_count: usize,
    },
    Degraded(DegradeReason),
}

impl SampleBranch {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SmallBatch => "small_batch",
            Self::Modeled { .. } => "modeled",
            Self::Degraded(_) => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub representatives: Vec<String>,
    pub branch: SampleBranch,
}

/// Picks the original reviews that stand in for the whole batch.
pub struct RepresentativeSampler {
    cache: Arc<EmbeddingCache>,
    config: SamplerConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RepresentativeSampler {
    #[must_use]
    pub fn new(cache: Arc<EmbeddingCache>, config: SamplerConfig) -> Self {
        Self {
            cache,
            config,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Returns a subset of `originals` chosen through topic modeling.
    ///
    /// Batches no larger than the small-batch threshold are returned unchanged. Any
    /// modeling failure, or a scan without usable topics, degrades to the first
    /// `fallback_limit` originals.
    ///
    /// # Errors
    /// Only [`AnalysisError::Validation`] when the two lists are not index-aligned.
    pub async fn sample_representative(
        &self,
        normalized: &[String],
        originals: &[String],
        mode: SampleMode,
    ) -> Result<SampleOutcome, AnalysisError> {
        if normalized.len() != originals.len() {
            return Err(AnalysisError::Validation(format!(
                "{} normalized reviews for {} originals",
                normalized.len(),
                originals.len()
            )));
        }

        if originals.len() <= self.config.small_batch_threshold {
            debug!(count = originals.len(), "small batch, skipping topic modeling");
            self.record(&SampleBranch::SmallBatch, None);
            return Ok(SampleOutcome {
                representatives: originals.to_vec(),
                branch: SampleBranch::SmallBatch,
            });
        }

        let started = Instant::now();
        let outcome = match self.model(normalized, originals, mode).await {
            Ok(Some(outcome)) => outcome,
            Ok(None) => self.fallback(originals, DegradeReason::NoUsableTopics),
            Err(error) => {
                warn!(error = ?error, "topic modeling failed, using first reviews");
                self.fallback(originals, DegradeReason::ModelingFailed(format!("{error:#}")))
            }
        };
        self.record(&outcome.branch, Some(started));

        info!(
            branch = outcome.branch.label(),
            input = originals.len(),
            representatives = outcome.representatives.len(),
            ?mode,
            "representatives selected"
        );
        Ok(outcome)
    }

    async fn model(
        &self,
        normalized: &[String],
        originals: &[String],
        mode: SampleMode,
    ) -> Result<Option<SampleOutcome>> {
        let embeddings = self
            .cache
            .get_or_compute(normalized)
            .await
            .context("failed to embed normalized reviews")?;
        let normalized = normalized.to_vec();
        let originals = originals.to_vec();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || -> Result<Option<SampleOutcome>> {
            let tokens: Vec<Vec<String>> =
                normalized.iter().map(|doc| analyzer_tokens(doc)).collect();
            let candidates = select_best_topic_model(
                &embeddings,
                &tokens,
                &config.scan,
                config.max_topics,
                config.seed,
            )?;
            let Some(best) = best_candidate(&candidates) else {
                return Ok(None);
            };

            let picked = match mode {
                SampleMode::Strict => nearest_to_centroids(&best.model, &embeddings),
                SampleMode::Expanded => expanded_representatives(
                    &best.model,
                    &normalized,
                    config.representatives_per_topic,
                ),
            };
            Ok(Some(SampleOutcome {
                representatives: picked.into_iter().map(|idx| originals[idx].clone()).collect(),
                branch: SampleBranch::Modeled {
                    granularity: best.granularity(),
                    coherence: best.coherence,
                    topic_count: best.model.topic_count(),
                },
            }))
        })
        .await
        .context("topic modeling task panicked")?
    }

    fn fallback(&self, originals: &[String], reason: DegradeReason) -> SampleOutcome {
        SampleOutcome {
            representatives: originals
                .iter()
                .take(self.config.fallback_limit)
                .cloned()
                .collect(),
            branch: SampleBranch::Degraded(reason),
        }
    }

    fn record(&self, branch: &SampleBranch, started: Option<Instant>) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match branch {
            SampleBranch::SmallBatch => metrics.sampler_small_batch.inc(),
            SampleBranch::Modeled { .. } => metrics.sampler_modeled.inc(),
            SampleBranch::Degraded(_) => metrics.sampler_degraded.inc(),
        }
        if let Some(started) = started {
            metrics
                .sampling_duration
                .observe(started.elapsed().as_secs_f64());
        }
    }
}

/// One index per topic, in topic order: the member closest to the centroid,
/// lowest index on ties.
fn nearest_to_centroids(model: &TopicModel, embeddings: &[Vec<f32>]) -> Vec<usize> {
    (0..model.topic_count())
        .filter_map(|topic| {
            let centroid = model.centroid(topic)?;
            let mut best: Option<(usize, f32)> = None;
            for &doc in model.members(topic) {
                let distance = distance_sq(&embeddings[doc], centroid);
                if best.is_none_or(|(_, current)| distance < current) {
                    best = Some((doc, distance));
                }
            }
            best.map(|(doc, _)| doc)
        })
        .collect()
}

/// Indices whose normalized text matches a topic's representative document, in
/// input order, at most `per_topic` per topic.
///
/// Identical normalized texts share one join key; the later topic wins.
fn expanded_representatives(
    model: &TopicModel,
    normalized: &[String],
    per_topic: usize,
) -> Vec<usize> {
    let mut topic_by_text: FxHashMap<&str, usize> = FxHashMap::default();
    for topic in 0..model.topic_count() {
        for &doc in model.representative_docs(topic) {
            topic_by_text.insert(normalized[doc].as_str(), topic);
        }
    }

    let mut taken = vec![0_usize; model.topic_count()];
    normalized
        .iter()
        .enumerate()
        .filter_map(|(idx, text)| {
            let topic = *topic_by_text.get(text.as_str())?;
            (taken[topic] < per_topic).then(|| {
                taken[topic] += 1;
                idx
            })
        })
        .collect()
}
