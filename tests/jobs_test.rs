use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use review_digest::clients::{ChatRequest, GenerationError, TextGenerator};
use review_digest::config::SamplerConfig;
use review_digest::pipeline::ReviewAnalyzer;
use review_digest::pipeline::embedding::{EmbeddingCache, HashingEmbedder};
use review_digest::pipeline::preprocess::{StopWords, TokenPatternNormalizer};
use review_digest::pipeline::select::RepresentativeSampler;
use review_digest::queue::{
    InMemoryBroker, InMemoryStatusStore, JobId, JobLookup, JobManager, JobOutput, JobPayload,
    JobRecord, JobRunner, JobState, JobWorker,
};
use uuid::Uuid;

struct FixedGenerator(Option<&'static str>);

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
        self.0.map(ToString::to_string).ok_or(GenerationError::Status {
            status: 503,
            body: "model is loading".to_string(),
        })
    }
}

fn analyzer(generator: FixedGenerator) -> Arc<ReviewAnalyzer> {
    let cache = Arc::new(EmbeddingCache::new(
        Arc::new(HashingEmbedder::new(32)),
        Duration::from_secs(60),
        8,
    ));
    Arc::new(ReviewAnalyzer::new(
        Arc::new(TokenPatternNormalizer),
        Arc::new(StopWords::default()),
        Arc::new(RepresentativeSampler::new(cache, SamplerConfig::default())),
        Arc::new(generator),
        10,
    ))
}

fn start(runner: Arc<dyn JobRunner>, workers: usize) -> JobManager {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryStatusStore::new());
    let worker = Arc::new(JobWorker::new(
        broker.clone(),
        store.clone(),
        runner,
        "reviews",
        Duration::from_millis(10),
    ));
    worker.spawn_pool(workers);
    JobManager::new(broker, store, "reviews")
}

async fn wait_for_terminal(manager: &JobManager, job_id: JobId) -> JobRecord {
    for _ in 0..500 {
        if let JobLookup::Found(record) = manager.get_status(job_id).await.unwrap() {
            if record.state.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn summary_job_runs_to_completion() {
    let manager = start(analyzer(FixedGenerator(Some("unused"))), 2);

    let job_id = manager
        .enqueue(JobPayload::summary("Вкусный сок\nСлишком сладкий"))
        .await
        .unwrap();
    let record = wait_for_terminal(&manager, job_id).await;

    assert_eq!(record.state, JobState::Completed);
    assert_eq!(
        record.result,
        Some(JobOutput::Summary {
            summary: "Вкусный сок\nСлишком сладкий".to_string()
        })
    );
    assert!(record.error.is_none());
}

#[tokio::test]
async fn generation_failure_ends_in_error() {
    let manager = start(analyzer(FixedGenerator(None)), 1);

    let job_id = manager
        .enqueue(JobPayload::attributes("Сладкий вкус"))
        .await
        .unwrap();
    let record = wait_for_terminal(&manager, job_id).await;

    assert_eq!(record.state, JobState::Error);
    assert!(record.result.is_none());
    assert!(record.error.unwrap().contains("503"));
}

struct PanickingRunner;

#[async_trait]
impl JobRunner for PanickingRunner {
    async fn run(&self, payload: JobPayload) -> Result<JobOutput> {
        if payload.text == "boom" {
            panic!("pipeline invariant broken");
        }
        Ok(JobOutput::Summary {
            summary: payload.text,
        })
    }
}

#[tokio::test]
async fn panic_is_contained_and_the_pool_keeps_working() {
    let manager = start(Arc::new(PanickingRunner), 1);

    let failed = manager.enqueue(JobPayload::summary("boom")).await.unwrap();
    let record = wait_for_terminal(&manager, failed).await;
    assert_eq!(record.state, JobState::Error);
    assert!(record.error.unwrap().contains("pipeline invariant broken"));

    let next = manager.enqueue(JobPayload::summary("ok")).await.unwrap();
    let record = wait_for_terminal(&manager, next).await;
    assert_eq!(record.state, JobState::Completed);
}

#[tokio::test]
async fn many_jobs_get_distinct_ids_and_all_finish() {
    let manager = start(Arc::new(PanickingRunner), 4);

    let mut ids = Vec::new();
    for n in 0..20 {
        ids.push(
            manager
                .enqueue(JobPayload::summary(format!("отзыв {n}")))
                .await
                .unwrap(),
        );
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), ids.len());

    for (n, job_id) in ids.into_iter().enumerate() {
        let record = wait_for_terminal(&manager, job_id).await;
        assert_eq!(
            record.result,
            Some(JobOutput::Summary {
                summary: format!("отзыв {n}")
            })
        );
    }
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let manager = start(Arc::new(PanickingRunner), 1);
    assert_eq!(
        manager.get_status(Uuid::now_v7()).await.unwrap(),
        JobLookup::NotFound
    );
}
