//! 非同期ジョブのライフサイクル管理。
//!
//! ブローカー（投入と配送）と状態ストア（状態の記録と照会）は独立した
//! コラボレーターで、それぞれプロセス内実装と PostgreSQL 実装を持つ。

pub mod broker;
pub mod manager;
pub mod postgres;
pub mod status;
pub mod types;
pub mod worker;

pub use broker::{Broker, InMemoryBroker};
pub use manager::{JobError, JobLookup, JobManager};
pub use postgres::{PgBroker, PgStatusStore, ensure_schema};
pub use status::{InMemoryStatusStore, StatusError, StatusStore};
pub use types::{
    JobEnvelope, JobId, JobKind, JobOutput, JobPayload, JobRecord, JobState, StatusUpdate,
};
pub use worker::{JobRunner, JobWorker};
