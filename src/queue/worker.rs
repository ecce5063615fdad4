use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::observability::metrics::Metrics;

use super::broker::Broker;
use super::manager::JobError;
use super::status::{StatusError, StatusStore};
use super::types::{JobEnvelope, JobId, JobOutput, JobPayload, StatusUpdate};

const STATUS_WRITE_ATTEMPTS: u32 = 3;
const STATUS_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// ジョブ1件分の処理本体。
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, payload: JobPayload) -> Result<JobOutput>;
}

/// ブローカーからジョブを取り出して最後まで実行するワーカー。
///
/// 実行中のエラーやパニックはジョブ単位で捕捉し、状態を `ERROR` にしてから
/// 次のジョブへ進む。
pub struct JobWorker {
    broker: Arc<dyn Broker>,
    store: Arc<dyn StatusStore>,
    runner: Arc<dyn JobRunner>,
    queue: String,
    poll_interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl JobWorker {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn StatusStore>,
        runner: Arc<dyn JobRunner>,
        queue: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            broker,
            store,
            runner,
            queue: queue.into(),
            poll_interval,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `concurrency` 個のワーカーループを起動する。各ループは1件ずつ処理する。
    pub fn spawn_pool(self: &Arc<Self>, concurrency: usize) -> Vec<JoinHandle<()>> {
        info!(
            concurrency,
            queue = %self.queue,
            poll_interval_ms = self.poll_interval.as_millis(),
            "starting job workers"
        );
        (0..concurrency.max(1))
            .map(|worker| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.run(worker).await })
            })
            .collect()
    }

    async fn run(&self, worker: usize) {
        loop {
            match self.broker.next(&self.queue).await {
                Ok(Some(envelope)) => {
                    if let Err(error) = self.process(envelope).await {
                        warn!(worker, error = %error, "job finished with error");
                    }
                }
                Ok(None) => sleep(self.poll_interval).await,
                Err(error) => {
                    error!(worker, error = ?error, "failed to fetch next job");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// ジョブを1件実行し、終了状態を記録する。
    ///
    /// # Errors
    /// `STARTED` を記録できなかった場合は実行せずに返す。ストア障害のときはジョブを
    /// ブローカーへ戻す。実行の失敗は `ERROR` を記録したうえで
    /// [`JobError::Execution`] として返す。
    pub async fn process(&self, envelope: JobEnvelope) -> Result<JobOutput, JobError> {
        let job_id = envelope.job_id;

        match self.write_status(job_id, StatusUpdate::Started).await {
            Ok(()) => {}
            Err(error @ StatusError::InvalidTransition { .. }) => {
                warn!(%job_id, error = %error, "skipping job that is already started");
                return Err(error.into());
            }
            Err(error) => {
                error!(%job_id, error = %error, "failed to mark job as started");
                if let Err(release_error) = self.broker.release(&self.queue, envelope).await {
                    error!(%job_id, error = ?release_error, "failed to release job");
                }
                return Err(error.into());
            }
        }
        let JobEnvelope { payload, .. } = envelope;
        info!(%job_id, kind = ?payload.kind, "job started");
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.jobs_started.inc();
            metrics.active_jobs.inc();
        }

        let runner = Arc::clone(&self.runner);
        let outcome = match tokio::spawn(async move { runner.run(payload).await }).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(format!("{error:#}")),
            Err(join_error) if join_error.is_panic() => Err(format!(
                "job panicked: {}",
                panic_message(join_error.into_panic())
            )),
            Err(join_error) => Err(format!("job task was cancelled: {join_error}")),
        };

        if let Some(metrics) = &self.metrics {
            metrics.active_jobs.dec();
            metrics.job_duration.observe(started.elapsed().as_secs_f64());
        }

        match outcome {
            Ok(output) => {
                match self
                    .write_status(job_id, StatusUpdate::Completed(output.clone()))
                    .await
                {
                    Ok(()) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.jobs_completed.inc();
                        }
                        info!(%job_id, elapsed_ms = started.elapsed().as_millis(), "job completed");
                        self.acknowledge(job_id).await;
                        Ok(output)
                    }
                    Err(error) => {
                        error!(%job_id, error = %error, "failed to mark job as completed");
                        self.fail(job_id, format!("failed to record job result: {error}"))
                            .await
                    }
                }
            }
            Err(message) => {
                error!(%job_id, error = %message, "job failed");
                self.fail(job_id, message).await
            }
        }
    }

    async fn fail(&self, job_id: JobId, message: String) -> Result<JobOutput, JobError> {
        if let Some(metrics) = &self.metrics {
            metrics.jobs_failed.inc();
        }
        self.write_status(job_id, StatusUpdate::Failed(message.clone()))
            .await
            .inspect_err(|error| {
                error!(%job_id, error = %error, "failed to mark job as failed");
            })?;
        self.acknowledge(job_id).await;
        Err(JobError::Execution(message))
    }

    /// バックエンド障害の間は間隔を倍にしながら書き込みを繰り返す。
    ///
    /// 再試行で目的の状態が既に記録済みと分かった場合は、前回の書き込みが
    /// 届いていたものとして成功扱いにする。
    async fn write_status(&self, job_id: JobId, update: StatusUpdate) -> Result<(), StatusError> {
        let mut backoff = STATUS_RETRY_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.store.set(job_id, update.clone()).await {
                Ok(()) => return Ok(()),
                Err(StatusError::InvalidTransition { from, to, .. })
                    if attempt > 1 && from == Some(to) =>
                {
                    return Ok(());
                }
                Err(StatusError::Backend(error)) if attempt < STATUS_WRITE_ATTEMPTS => {
                    warn!(
                        %job_id,
                        attempt,
                        state = update.state().as_str(),
                        error = ?error,
                        "status write failed, retrying"
                    );
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn acknowledge(&self, job_id: JobId) {
        if let Err(error) = self.broker.ack(&self.queue, job_id).await {
            warn!(%job_id, error = ?error, "failed to remove finished job from queue");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
