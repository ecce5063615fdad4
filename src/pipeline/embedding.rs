//! Embedding providers and the TTL embedding cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, ensure};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::observability::metrics::Metrics;
use crate::util::text::{analyzer_tokens, batch_fingerprint, hash_text};

/// Batch of vectors, index-aligned with the texts that produced them.
pub type Embeddings = Arc<Vec<Vec<f32>>>;

/// 正規化済みテキストのバッチをベクトルに変換する。
///
/// 同じ入力とモデルに対して決定的でなければならない。
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Feature-hashing bag-of-words embedder that runs without any model files.
///
/// Every analyzer token is hashed into one of `dim` buckets with a sign bit, and the
/// resulting vector is L2-normalised. Empty documents map to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    #[must_use]
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dim];
        for token in analyzer_tokens(text) {
            let hash = hash_text(&token);
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

struct CacheEntry {
    vectors: Embeddings,
    expires_at: Instant,
    sequence: u64,
}

struct CacheState {
    entries: FxHashMap<u64, CacheEntry>,
    next_sequence: u64,
}

/// Fingerprint → vectors cache with TTL and bounded capacity.
///
/// Concurrent misses for the same batch may both compute; the last insert wins.
pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    ttl: Duration,
    capacity: usize,
    state: RwLock<CacheState>,
    metrics: Option<Arc<Metrics>>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, ttl: Duration, capacity: usize) -> Self {
        Self {
            embedder,
            ttl,
            capacity: capacity.max(1),
            state: RwLock::new(CacheState {
                entries: FxHashMap::default(),
                next_sequence: 0,
            }),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns cached vectors for `batch`, computing and storing them on a miss.
    ///
    /// # Errors
    /// Propagates embedder failures and rejects results whose length does not match
    /// the batch. Nothing is cached in either case.
    pub async fn get_or_compute(&self, batch: &[String]) -> Result<Embeddings> {
        let key = batch_fingerprint(batch);

        {
            let guard = self.state.read().await;
            if let Some(entry) = guard.entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    if let Some(metrics) = &self.metrics {
                        metrics.embedding_cache_hits.inc();
                    }
                    debug!(fingerprint = key, "embedding cache hit");
                    return Ok(Arc::clone(&entry.vectors));
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.embedding_cache_misses.inc();
        }
        let vectors = self.embedder.encode(batch).await?;
        ensure!(
            vectors.len() == batch.len(),
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            batch.len()
        );
        let vectors: Embeddings = Arc::new(vectors);

        let mut guard = self.state.write().await;
        let now = Instant::now();
        guard.entries.retain(|_, entry| entry.expires_at > now);
        if !guard.entries.contains_key(&key) {
            while guard.entries.len() >= self.capacity {
                let oldest = guard
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.sequence)
                    .map(|(fingerprint, _)| *fingerprint);
                match oldest {
                    Some(fingerprint) => {
                        guard.entries.remove(&fingerprint);
                    }
                    None => break,
                }
            }
        }
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        guard.entries.insert(
            key,
            CacheEntry {
                vectors: Arc::clone(&vectors),
                expires_at: now + self.ttl,
                sequence,
            },
        );
        debug!(fingerprint = key, size = guard.entries.len(), "embedding cache stored");

        Ok(vectors)
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .read()
            .await
            .entries
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
