//! C_V topic coherence.
//!
//! Boolean sliding windows over the tokenized corpus give word and pair
//! probabilities; every topic word gets an NPMI context vector against the
//! topic's word set, and the topic score is the mean cosine between each word
//! vector and the summed topic vector.

use rustc_hash::{FxHashMap, FxHashSet};

use super::topic_model::cosine;

const WINDOW_SIZE: usize = 110;
const EPSILON: f64 = 1e-12;

/// Mean C_V coherence over `topics`, measured against `corpus`.
///
/// Words absent from the corpus are ignored. Topics left without any word do not
/// take part in the mean; when no topic qualifies the result is `NaN`.
#[must_use]
pub fn coherence_cv(topics: &[Vec<String>], corpus: &[Vec<String>]) -> f64 {
    let mut ids: FxHashMap<&str, usize> = FxHashMap::default();
    for word in topics.iter().flatten() {
        let next = ids.len();
        ids.entry(word.as_str()).or_insert(next);
    }
    if ids.is_empty() {
        return f64::NAN;
    }

    let stats = WindowStats::collect(corpus, &ids);
    if stats.windows == 0 {
        return f64::NAN;
    }

    let scores: Vec<f64> = topics
        .iter()
        .filter_map(|words| {
            let mut seen = FxHashSet::default();
            let present: Vec<usize> = words
                .iter()
                .filter_map(|word| ids.get(word.as_str()).copied())
                .filter(|&id| stats.word_count(id) > 0 && seen.insert(id))
                .collect();
            (!present.is_empty()).then(|| stats.topic_score(&present))
        })
        .collect();

    if scores.is_empty() {
        return f64::NAN;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = scores.len() as f64;
    scores.iter().sum::<f64>() / count
}

struct WindowStats {
    windows: usize,
    words: Vec<usize>,
    pairs: FxHashMap<(usize, usize), usize>,
}

impl WindowStats {
    fn collect(corpus: &[Vec<String>], ids: &FxHashMap<&str, usize>) -> Self {
        let mut stats = Self {
            windows: 0,
            words: vec![0; ids.len()],
            pairs: FxHashMap::default(),
        };

        for doc in corpus {
            let doc_ids: Vec<Option<usize>> =
                doc.iter().map(|token| ids.get(token.as_str()).copied()).collect();
            if doc_ids.len() <= WINDOW_SIZE {
                stats.record(&doc_ids);
            } else {
                for window in doc_ids.windows(WINDOW_SIZE) {
                    stats.record(window);
                }
            }
        }
        stats
    }

    fn record(&mut self, window: &[Option<usize>]) {
        self.windows += 1;
        let mut present: Vec<usize> = window.iter().flatten().copied().collect();
        present.sort_unstable();
        present.dedup();
        for (pos, &a) in present.iter().enumerate() {
            self.words[a] += 1;
            for &b in &present[pos + 1..] {
                *self.pairs.entry((a, b)).or_insert(0) += 1;
            }
        }
    }

    fn word_count(&self, id: usize) -> usize {
        self.words[id]
    }

    fn pair_count(&self, a: usize, b: usize) -> usize {
        if a == b {
            return self.words[a];
        }
        let key = if a < b { (a, b) } else { (b, a) };
        self.pairs.get(&key).copied().unwrap_or(0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn npmi(&self, a: usize, b: usize) -> f64 {
        let total = self.windows as f64;
        let p_a = self.words[a] as f64 / total;
        let p_b = self.words[b] as f64 / total;
        let p_ab = self.pair_count(a, b) as f64 / total;
        let pmi = ((p_ab + EPSILON) / (p_a * p_b)).ln();
        pmi / -(p_ab + EPSILON).ln()
    }

    fn topic_score(&self, words: &[usize]) -> f64 {
        let vectors: Vec<Vec<f64>> = words
            .iter()
            .map(|&a| words.iter().map(|&b| self.npmi(a, b)).collect())
            .collect();
        let mut topic_vector = vec![0.0; words.len()];
        for vector in &vectors {
            for (acc, value) in topic_vector.iter_mut().zip(vector) {
                *acc += value;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let count = vectors.len() as f64;
        vectors
            .iter()
            .map(|vector| cosine(vector, &topic_vector))
            .sum::<f64>()
            / count
    }
}
