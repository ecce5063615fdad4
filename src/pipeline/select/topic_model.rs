//! Embedding-clustered topic model with class-based TF-IDF topic words.

use anyhow::{Result, bail, ensure};
use rustc_hash::FxHashMap;

use crate::util::kmeans::KMeans;

/// Topic id of documents that belong to no usable topic.
pub const NOISE_TOPIC: i32 = -1;

const TOP_WORDS: usize = 10;
const REPRESENTATIVE_DOCS: usize = 3;
const MAX_ITERATIONS: usize = 100;

/// A fitted topic model at one granularity.
///
/// Topic ids are dense (`0..topic_count()`), ordered by descending topic size.
#[derive(Debug, Clone)]
pub struct TopicModel {
    granularity: usize,
    assignments: Vec<i32>,
    members: Vec<Vec<usize>>,
    centroids: Vec<Vec<f32>>,
    topic_words: Vec<Vec<String>>,
    representative_docs: Vec<Vec<usize>>,
}

impl TopicModel {
    /// Fits a model whose topics hold at least `granularity` documents.
    ///
    /// Embeddings are clustered into `clamp(n / granularity, 1, max_topics)` groups;
    /// groups smaller than `granularity` dissolve into [`NOISE_TOPIC`].
    ///
    /// # Errors
    /// Returns an error for empty input, misaligned `embeddings`/`tokens`, ragged or
    /// non-finite vectors, and a zero granularity.
    pub fn fit(
        embeddings: &[Vec<f32>],
        tokens: &[Vec<String>],
        granularity: usize,
        max_topics: usize,
        seed: u64,
    ) -> Result<Self> {
        ensure!(granularity > 0, "granularity must be positive");
        ensure!(!embeddings.is_empty(), "cannot fit a topic model on zero documents");
        ensure!(
            embeddings.len() == tokens.len(),
            "{} embeddings for {} documents",
            embeddings.len(),
            tokens.len()
        );
        let dim = embeddings[0].len();
        for (idx, vector) in embeddings.iter().enumerate() {
            if vector.len() != dim {
                bail!("embedding {idx} has dimension {}, expected {dim}", vector.len());
            }
            if vector.iter().any(|value| !value.is_finite()) {
                bail!("embedding {idx} contains non-finite values");
            }
        }

        let n = embeddings.len();
        let k = (n / granularity).clamp(1, max_topics.max(1));
        let clustering = KMeans::new(embeddings, k, MAX_ITERATIONS, seed);

        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); clustering.centroids.len()];
        for (doc, &cluster) in clustering.assignments.iter().enumerate() {
            clusters[cluster].push(doc);
        }
        // members are ascending, so members[0] is the smallest index
        let mut members: Vec<Vec<usize>> = clusters
            .into_iter()
            .filter(|docs| docs.len() >= granularity)
            .collect();
        members.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

        let mut assignments = vec![NOISE_TOPIC; n];
        for (topic, docs) in members.iter().enumerate() {
            let topic = i32::try_from(topic)?;
            for &doc in docs {
                assignments[doc] = topic;
            }
        }

        let centroids = members
            .iter()
            .map(|docs| mean_vector(embeddings, docs, dim))
            .collect();

        let weights = ClassTfIdf::fit(tokens, &members);
        let topic_words = (0..members.len())
            .map(|topic| weights.top_words(topic, TOP_WORDS))
            .collect();
        let representative_docs = members
            .iter()
            .enumerate()
            .map(|(topic, docs)| weights.representative_docs(topic, docs, tokens))
            .collect();

        Ok(Self {
            granularity,
            assignments,
            members,
            centroids,
            topic_words,
            representative_docs,
        })
    }

    #[must_use]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Number of non-noise topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.members.len()
    }

    /// Per-document topic id, [`NOISE_TOPIC`] for outliers.
    #[must_use]
    pub fn assignments(&self) -> &[i32] {
        &self.assignments
    }

    #[must_use]
    pub fn members(&self, topic: usize) -> &[usize] {
        self.members.get(topic).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn centroid(&self, topic: usize) -> Option<&[f32]> {
        self.centroids.get(topic).map(Vec::as_slice)
    }

    #[must_use]
    pub fn topic_words(&self) -> &[Vec<String>] {
        &self.topic_words
    }

    #[must_use]
    pub fn representative_docs(&self, topic: usize) -> &[usize] {
        self.representative_docs.get(topic).map(Vec::as_slice).unwrap_or_default()
    }
}

fn mean_vector(embeddings: &[Vec<f32>], docs: &[usize], dim: usize) -> Vec<f32> {
    let mut mean = vec![0.0_f32; dim];
    for &doc in docs {
        for (acc, value) in mean.iter_mut().zip(&embeddings[doc]) {
            *acc += value;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let count = docs.len().max(1) as f32;
    for value in &mut mean {
        *value /= count;
    }
    mean
}

/// c-TF-IDF: each topic is one class document made of its members' tokens.
///
/// `weight(t, c) = tf(t, c) / |c| * ln(1 + avg_class_len / freq(t))`
struct ClassTfIdf {
    vocabulary: Vec<String>,
    index: FxHashMap<String, usize>,
    idf: Vec<f64>,
    topic_vectors: Vec<Vec<f64>>,
}

impl ClassTfIdf {
    #[allow(clippy::cast_precision_loss)]
    fn fit(tokens: &[Vec<String>], members: &[Vec<usize>]) -> Self {
        let mut vocabulary: Vec<String> = members
            .iter()
            .flatten()
            .flat_map(|&doc| tokens[doc].iter().cloned())
            .collect();
        vocabulary.sort_unstable();
        vocabulary.dedup();
        let index: FxHashMap<String, usize> = vocabulary
            .iter()
            .enumerate()
            .map(|(idx, word)| (word.clone(), idx))
            .collect();

        let mut class_counts = vec![vec![0.0_f64; vocabulary.len()]; members.len()];
        for (topic, docs) in members.iter().enumerate() {
            for &doc in docs {
                for token in &tokens[doc] {
                    if let Some(&word) = index.get(token) {
                        class_counts[topic][word] += 1.0;
                    }
                }
            }
        }

        let mut frequency = vec![0.0_f64; vocabulary.len()];
        let mut total_words = 0.0;
        for counts in &class_counts {
            for (freq, count) in frequency.iter_mut().zip(counts) {
                *freq += count;
                total_words += count;
            }
        }
        let avg_class_len = total_words / members.len().max(1) as f64;
        let idf: Vec<f64> = frequency
            .iter()
            .map(|&freq| {
                if freq > 0.0 {
                    (avg_class_len / freq + 1.0).ln()
                } else {
                    0.0
                }
            })
            .collect();

        let topic_vectors = class_counts
            .into_iter()
            .map(|counts| weigh(counts, &idf))
            .collect();

        Self {
            vocabulary,
            index,
            idf,
            topic_vectors,
        }
    }

    fn top_words(&self, topic: usize, limit: usize) -> Vec<String> {
        let Some(vector) = self.topic_vectors.get(topic) else {
            return Vec::new();
        };
        let mut ranked: Vec<(usize, f64)> = vector
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, weight)| *weight > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(word, _)| self.vocabulary[word].clone())
            .collect()
    }

    /// Members most similar to the topic's own c-TF-IDF vector, lowest index on ties.
    fn representative_docs(&self, topic: usize, docs: &[usize], tokens: &[Vec<String>]) -> Vec<usize> {
        let Some(topic_vector) = self.topic_vectors.get(topic) else {
            return Vec::new();
        };
        let mut scored: Vec<(usize, f64)> = docs
            .iter()
            .map(|&doc| {
                let mut counts = vec![0.0_f64; self.vocabulary.len()];
                for token in &tokens[doc] {
                    if let Some(&word) = self.index.get(token) {
                        counts[word] += 1.0;
                    }
                }
                let vector = weigh(counts, &self.idf);
                (doc, cosine(&vector, topic_vector))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(REPRESENTATIVE_DOCS)
            .map(|(doc, _)| doc)
            .collect()
    }
}

fn weigh(mut counts: Vec<f64>, idf: &[f64]) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    if total > 0.0 {
        for (value, weight) in counts.iter_mut().zip(idf) {
            *value = *value / total * weight;
        }
    }
    counts
}

pub(crate) fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
