//! Representative selection: topic model candidates, coherence scoring and sampling.

mod coherence;
mod sampler;
mod selector;
mod topic_model;

pub use coherence::coherence_cv;
pub use sampler::{DegradeReason, RepresentativeSampler, SampleBranch, SampleMode, SampleOutcome};
pub use selector::{TopicModelCandidate, best_candidate, select_best_topic_model};
pub use topic_model::{NOISE_TOPIC, TopicModel};
