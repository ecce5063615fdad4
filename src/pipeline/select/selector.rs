use anyhow::Result;
use rayon::prelude::*;
use tracing::debug;

use crate::config::GranularityScan;

use super::coherence::coherence_cv;
use super::topic_model::TopicModel;

/// A fitted model and its coherence score.
#[derive(Debug, Clone)]
pub struct TopicModelCandidate {
    pub model: TopicModel,
    pub coherence: f64,
}

impl TopicModelCandidate {
    #[must_use]
    pub fn granularity(&self) -> usize {
        self.model.granularity()
    }
}

/// Fits one topic model per scanned granularity and scores each by coherence.
///
/// Candidates come back in scan order. Those without a single non-noise topic are
/// dropped; no fallback happens here.
///
/// # Errors
/// Returns the first fitting error encountered.
pub fn select_best_topic_model(
    embeddings: &[Vec<f32>],
    tokens: &[Vec<String>],
    scan: &GranularityScan,
    max_topics: usize,
    seed: u64,
) -> Result<Vec<TopicModelCandidate>> {
    let fitted: Vec<Option<TopicModelCandidate>> = scan
        .values()
        .into_par_iter()
        .map(|granularity| -> Result<Option<TopicModelCandidate>> {
            let model = TopicModel::fit(embeddings, tokens, granularity, max_topics, seed)?;
            if model.topic_count() == 0 {
                debug!(granularity, "candidate has no usable topics");
                return Ok(None);
            }
            let coherence = coherence_cv(model.topic_words(), tokens);
            debug!(granularity, topics = model.topic_count(), coherence, "candidate scored");
            Ok(Some(TopicModelCandidate { model, coherence }))
        })
        .collect::<Result<_>>()?;

    Ok(fitted.into_iter().flatten().collect())
}

/// Highest coherence wins; the earliest candidate wins ties. `NaN` scores never win.
#[must_use]
pub fn best_candidate(candidates: &[TopicModelCandidate]) -> Option<&TopicModelCandidate> {
    candidates
        .iter()
        .filter(|candidate| !candidate.coherence.is_nan())
        .fold(None, |best: Option<&TopicModelCandidate>, candidate| match best {
            Some(current) if current.coherence >= candidate.coherence => Some(current),
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    fn fixture() -> (Vec<Vec<f32>>, Vec<Vec<String>>) {
        let mut embeddings = Vec::new();
        let mut tokens = Vec::new();
        for i in 0..4 {
            #[allow(clippy::cast_precision_loss)]
            let jitter = i as f32 * 0.01;
            embeddings.push(vec![jitter, 0.0]);
            tokens.push(vec!["вкус".to_string(), "сладкий".to_string()]);
            embeddings.push(vec![10.0 + jitter, 10.0]);
            tokens.push(vec!["упаковка".to_string(), "мятая".to_string()]);
        }
        (embeddings, tokens)
    }

    fn candidate(granularity: usize, coherence: f64) -> TopicModelCandidate {
        let (embeddings, tokens) = fixture();
        let model = TopicModel::fit(&embeddings, &tokens, granularity, 2, 1).unwrap();
        TopicModelCandidate { model, coherence }
    }

    #[test]
    fn candidates_follow_scan_order() {
        let (embeddings, tokens) = fixture();
        let scan = GranularityScan {
            start: 2,
            limit: 5,
            step: NonZeroUsize::MIN,
        };
        let candidates = select_best_topic_model(&embeddings, &tokens, &scan, 2, 42).unwrap();
        let granularities: Vec<usize> = candidates
            .iter()
            .map(TopicModelCandidate::granularity)
            .collect();
        assert_eq!(granularities, vec![2, 3, 4]);
        assert!(candidates.iter().all(|c| c.coherence.is_finite()));
    }

    #[test]
    fn candidates_without_topics_are_dropped() {
        let (embeddings, tokens) = fixture();
        let scan = GranularityScan {
            start: 9,
            limit: 12,
            step: NonZeroUsize::MIN,
        };
        let candidates = select_best_topic_model(&embeddings, &tokens, &scan, 2, 42).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn ties_go_to_the_first_candidate() {
        let candidates = vec![candidate(2, 0.5), candidate(3, 0.7), candidate(4, 0.7)];
        assert_eq!(best_candidate(&candidates).unwrap().granularity(), 3);
    }

    #[test]
    fn nan_scores_never_win() {
        let candidates = vec![candidate(2, f64::NAN), candidate(3, -0.2)];
        assert_eq!(best_candidate(&candidates).unwrap().granularity(), 3);
        assert!(best_candidate(&[candidate(2, f64::NAN)]).is_none());
        assert!(best_candidate(&[]).is_none());
    }
}
