use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::observability::metrics::Metrics;

use super::broker::Broker;
use super::status::{StatusError, StatusStore};
use super::types::{JobEnvelope, JobId, JobPayload, JobRecord, StatusUpdate};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to submit job: {0:#}")]
    Submit(#[source] anyhow::Error),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("job execution failed: {0}")]
    Execution(String),
}

/// `get_status` の結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLookup {
    Found(JobRecord),
    NotFound,
}

/// ジョブの投入と状態照会の窓口。
pub struct JobManager {
    broker: Arc<dyn Broker>,
    store: Arc<dyn StatusStore>,
    queue: String,
    metrics: Option<Arc<Metrics>>,
}

impl JobManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn StatusStore>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            store,
            queue: queue.into(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    #[must_use]
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn StatusStore> {
        Arc::clone(&self.store)
    }

    /// ジョブをブローカーに投入し、新しいIDを返す。処理の完了は待たない。
    ///
    /// `QUEUED` の記録より先にワーカーが着手していた場合は、その状態を優先する。
    /// 投入後は `QUEUED` を記録できなくてもIDを返す。ワーカーが着手すれば
    /// `STARTED` からレコードが作られる。
    ///
    /// # Errors
    /// ブローカーへの投入に失敗した場合。
    pub async fn enqueue(&self, payload: JobPayload) -> Result<JobId, JobError> {
        let job_id = Uuid::now_v7();
        self.broker
            .submit(&self.queue, JobEnvelope { job_id, payload })
            .await
            .map_err(JobError::Submit)?;

        match self.store.set(job_id, StatusUpdate::Queued).await {
            Ok(()) => {}
            Err(StatusError::InvalidTransition { from, .. }) => {
                debug!(%job_id, ?from, "worker recorded progress before enqueue");
            }
            Err(StatusError::Backend(error)) => {
                warn!(%job_id, error = ?error, "job submitted but QUEUED could not be recorded");
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.jobs_enqueued.inc();
        }
        info!(%job_id, queue = %self.queue, "job enqueued");
        Ok(job_id)
    }

    /// # Errors
    /// 状態ストアの読み取りに失敗した場合。
    pub async fn get_status(&self, job_id: JobId) -> Result<JobLookup, JobError> {
        Ok(match self.store.get(job_id).await? {
            Some(record) => JobLookup::Found(record),
            None => JobLookup::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::broker::InMemoryBroker;
    use crate::queue::status::InMemoryStatusStore;
    use crate::queue::types::JobState;
    use anyhow::anyhow;
    use async_trait::async_trait;

    fn manager() -> JobManager {
        JobManager::new(
            Arc::new(InMemoryBroker::new()),
            Arc::new(InMemoryStatusStore::new()),
            "test_queue",
        )
    }

    #[tokio::test]
    async fn enqueue_records_queued_and_hands_job_to_broker() {
        let manager = manager();
        let job_id = manager
            .enqueue(JobPayload::summary("отзыв"))
            .await
            .unwrap();

        let JobLookup::Found(record) = manager.get_status(job_id).await.unwrap() else {
            panic!("job should be recorded");
        };
        assert_eq!(record.state, JobState::Queued);

        let envelope = manager.broker().next("test_queue").await.unwrap().unwrap();
        assert_eq!(envelope.job_id, job_id);
        assert_eq!(envelope.payload, JobPayload::summary("отзыв"));
    }

    #[tokio::test]
    async fn ids_are_never_reused() {
        let manager = manager();
        let first = manager.enqueue(JobPayload::summary("a")).await.unwrap();
        let second = manager.enqueue(JobPayload::summary("a")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let manager = manager();
        assert_eq!(
            manager.get_status(Uuid::now_v7()).await.unwrap(),
            JobLookup::NotFound
        );
    }

    struct RejectingBroker;

    #[async_trait]
    impl Broker for RejectingBroker {
        async fn submit(&self, _queue: &str, _envelope: JobEnvelope) -> anyhow::Result<()> {
            Err(anyhow!("broker unavailable"))
        }

        async fn next(&self, _queue: &str) -> anyhow::Result<Option<JobEnvelope>> {
            Ok(None)
        }

        async fn release(&self, _queue: &str, _envelope: JobEnvelope) -> anyhow::Result<()> {
            Err(anyhow!("broker unavailable"))
        }

        async fn ack(&self, _queue: &str, _job_id: JobId) -> anyhow::Result<()> {
            Err(anyhow!("broker unavailable"))
        }
    }

    #[tokio::test]
    async fn submit_failure_is_reported() {
        let store = Arc::new(InMemoryStatusStore::new());
        let manager = JobManager::new(Arc::new(RejectingBroker), store, "q");
        let error = manager
            .enqueue(JobPayload::summary("a"))
            .await
            .unwrap_err();
        assert!(matches!(error, JobError::Submit(_)));
    }

    /// `QUEUED` の書き込みだけを拒否するストア。
    struct QueuedRejectingStore(InMemoryStatusStore);

    #[async_trait]
    impl StatusStore for QueuedRejectingStore {
        async fn set(&self, job_id: JobId, update: StatusUpdate) -> Result<(), StatusError> {
            if update == StatusUpdate::Queued {
                return Err(StatusError::Backend(anyhow!("connection reset")));
            }
            self.0.set(job_id, update).await
        }

        async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StatusError> {
            self.0.get(job_id).await
        }
    }

    #[tokio::test]
    async fn submitted_job_keeps_its_id_when_queued_write_fails() {
        let manager = JobManager::new(
            Arc::new(InMemoryBroker::new()),
            Arc::new(QueuedRejectingStore(InMemoryStatusStore::new())),
            "q",
        );
        let job_id = manager.enqueue(JobPayload::summary("отзыв")).await.unwrap();

        let envelope = manager.broker().next("q").await.unwrap().unwrap();
        assert_eq!(envelope.job_id, job_id);
        assert_eq!(manager.get_status(job_id).await.unwrap(), JobLookup::NotFound);

        manager.store().set(job_id, StatusUpdate::Started).await.unwrap();
        let JobLookup::Found(record) = manager.get_status(job_id).await.unwrap() else {
            panic!("worker should open the record");
        };
        assert_eq!(record.state, JobState::Started);
    }
}
