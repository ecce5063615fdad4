use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{JobId, JobRecord, JobState, StatusUpdate};

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("job {job_id}: transition from {} to {to} is not allowed", display_state(.from))]
    InvalidTransition {
        job_id: JobId,
        from: Option<JobState>,
        to: JobState,
    },
    #[error("status backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

fn display_state(state: &Option<JobState>) -> &'static str {
    state.map_or("<none>", JobState::as_str)
}

/// ジョブ状態の永続化。書き込みは前進する遷移だけを受け付け、読み取りは常に
/// 書き込み済みのレコード全体を返す。
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// # Errors
    /// 遷移が許されない場合は [`StatusError::InvalidTransition`]。
    async fn set(&self, job_id: JobId, update: StatusUpdate) -> Result<(), StatusError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StatusError>;
}

/// プロセス内の状態ストア。
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn set(&self, job_id: JobId, update: StatusUpdate) -> Result<(), StatusError> {
        let mut records = self.records.write().await;
        let previous = records.get(&job_id).map(|record| record.state);
        let to = update.state();
        if !to.can_follow(previous) {
            return Err(StatusError::InvalidTransition {
                job_id,
                from: previous,
                to,
            });
        }
        records.insert(job_id, JobRecord::from_update(job_id, update));
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, StatusError> {
        Ok(self.records.read().await.get(&job_id).cloned())
    }
}
