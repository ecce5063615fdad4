use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// ジョブの状態。`QUEUED → STARTED → {COMPLETED, ERROR}` の順にしか進まない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Queued,
    Started,
    Completed,
    Error,
}

impl JobState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Started => "STARTED",
            JobState::Completed => "COMPLETED",
            JobState::Error => "ERROR",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "QUEUED" => Some(JobState::Queued),
            "STARTED" => Some(JobState::Started),
            "COMPLETED" => Some(JobState::Completed),
            "ERROR" => Some(JobState::Error),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }

    /// この状態に遷移できる直前の状態。
    #[must_use]
    pub fn predecessors(self) -> &'static [JobState] {
        match self {
            JobState::Queued => &[],
            JobState::Started => &[JobState::Queued],
            JobState::Completed | JobState::Error => &[JobState::Started],
        }
    }

    /// レコードが存在しない状態から記録できるか。
    ///
    /// ワーカーがエンキュー側の `QUEUED` 記録より先に `STARTED` を書くことがある。
    #[must_use]
    pub fn may_open(self) -> bool {
        matches!(self, JobState::Queued | JobState::Started)
    }

    #[must_use]
    pub fn can_follow(self, previous: Option<JobState>) -> bool {
        match previous {
            None => self.may_open(),
            Some(previous) => self.predecessors().contains(&previous),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    #[default]
    Summary,
    Attributes,
}

/// キューに載せる処理内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub text: String,
    #[serde(default)]
    pub kind: JobKind,
}

impl JobPayload {
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: JobKind::Summary,
        }
    }

    pub fn attributes(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: JobKind::Attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobOutput {
    Summary { summary: String },
    Attributes { attributes: String },
}

/// ブローカーを流れる単位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: JobId,
    pub payload: JobPayload,
}

/// 状態ストアへの書き込み。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Queued,
    Started,
    Completed(JobOutput),
    Failed(String),
}

impl StatusUpdate {
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            StatusUpdate::Queued => JobState::Queued,
            StatusUpdate::Started => JobState::Started,
            StatusUpdate::Completed(_) => JobState::Completed,
            StatusUpdate::Failed(_) => JobState::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// `update` を適用した新しいレコードを作る。
    #[must_use]
    pub fn from_update(job_id: JobId, update: StatusUpdate) -> Self {
        let state = update.state();
        let (result, error) = match update {
            StatusUpdate::Completed(output) => (Some(output), None),
            StatusUpdate::Failed(message) => (None, Some(message)),
            StatusUpdate::Queued | StatusUpdate::Started => (None, None),
        };
        Self {
            job_id,
            state,
            result,
            error,
            updated_at: Utc::now(),
        }
    }
}
