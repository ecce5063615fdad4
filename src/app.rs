use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    api,
    clients::{GeneratorClient, RemoteEmbedder, TextGenerator},
    config::Config,
    observability::Telemetry,
    pipeline::{
        ReviewAnalyzer,
        embedding::{Embedder, EmbeddingCache, HashingEmbedder},
        preprocess::{StopWords, TokenPatternNormalizer},
        select::RepresentativeSampler,
    },
    queue::{
        Broker, InMemoryBroker, InMemoryStatusStore, JobManager, JobRunner, JobWorker, PgBroker,
        PgStatusStore, StatusStore, ensure_schema,
    },
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

/// ジョブキューのブローカーと状態ストアの組。
pub struct JobBackends {
    broker: Arc<dyn Broker>,
    store: Arc<dyn StatusStore>,
    pool: Option<PgPool>,
}

impl JobBackends {
    /// プロセス内のブローカーと状態ストア。再起動で内容は失われる。
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::new()),
            store: Arc::new(InMemoryStatusStore::new()),
            pool: None,
        }
    }

    /// PostgreSQL 上のブローカーと状態ストア。テーブルが無ければ作成する。
    ///
    /// # Errors
    /// プールの構成やスキーマ作成に失敗した場合。
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .test_before_acquire(true)
            .connect_lazy(database_url)
            .context("failed to configure job database pool")?;
        ensure_schema(&pool).await?;
        Ok(Self {
            broker: Arc::new(PgBroker::new(pool.clone())),
            store: Arc::new(PgStatusStore::new(pool.clone())),
            pool: Some(pool),
        })
    }
}

pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    analyzer: Arc<ReviewAnalyzer>,
    jobs: Arc<JobManager>,
    worker: Arc<JobWorker>,
    db_pool: Option<PgPool>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn analyzer(&self) -> &ReviewAnalyzer {
        &self.registry.analyzer
    }

    pub(crate) fn jobs(&self) -> &JobManager {
        &self.registry.jobs
    }

    pub(crate) fn db_pool(&self) -> Option<&PgPool> {
        self.registry.db_pool.as_ref()
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化、HTTP クライアント構築、ジョブ用データベースの準備が
    /// 失敗した場合はエラーを返す。
    pub async fn build(config: Config) -> Result<Self> {
        let telemetry = Telemetry::new()?;
        let generator: Arc<dyn TextGenerator> = Arc::new(GeneratorClient::new(
            config.generator_base_url(),
            config.generator_model(),
            config.generator_timeout(),
        )?);
        let embedder: Arc<dyn Embedder> = match config.embedding_base_url() {
            Some(base_url) => Arc::new(RemoteEmbedder::new(
                base_url,
                config.embedding_model(),
                config.generator_timeout(),
            )?),
            None => {
                info!(
                    dim = config.embedding_dim().get(),
                    "EMBEDDING_BASE_URL not set, using local hashing embedder"
                );
                Arc::new(HashingEmbedder::new(config.embedding_dim().get()))
            }
        };
        let backends = match config.database_url() {
            Some(url) => {
                let connections =
                    u32::try_from(config.worker_concurrency().get() + 2).unwrap_or(u32::MAX);
                JobBackends::postgres(url, connections).await?
            }
            None => {
                info!("DATABASE_URL not set, using in-memory job queue");
                JobBackends::in_memory()
            }
        };

        Ok(Self::assemble(config, telemetry, generator, embedder, backends))
    }

    /// 外部コラボレーターを受け取ってサービスオブジェクトを組み立てる。
    #[must_use]
    pub fn assemble(
        config: Config,
        telemetry: Telemetry,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        backends: JobBackends,
    ) -> Self {
        let config = Arc::new(config);
        let metrics = telemetry.metrics_arc();

        let cache = Arc::new(
            EmbeddingCache::new(
                embedder,
                config.embedding_cache_ttl(),
                config.embedding_cache_capacity().get(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let sampler = Arc::new(
            RepresentativeSampler::new(cache, config.sampler().clone())
                .with_metrics(Arc::clone(&metrics)),
        );
        let stop_words = Arc::new(StopWords::load(config.stop_words_path()));
        let analyzer = Arc::new(
            ReviewAnalyzer::new(
                Arc::new(TokenPatternNormalizer),
                stop_words,
                sampler,
                generator,
                config.keywords_top_n(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );

        let JobBackends {
            broker,
            store,
            pool,
        } = backends;
        let jobs = Arc::new(
            JobManager::new(
                Arc::clone(&broker),
                Arc::clone(&store),
                config.job_queue_name(),
            )
            .with_metrics(Arc::clone(&metrics)),
        );
        let runner: Arc<dyn JobRunner> = Arc::clone(&analyzer) as Arc<dyn JobRunner>;
        let worker = Arc::new(
            JobWorker::new(
                broker,
                store,
                runner,
                config.job_queue_name(),
                config.worker_poll_interval(),
            )
            .with_metrics(metrics),
        );

        Self {
            config,
            telemetry,
            analyzer,
            jobs,
            worker,
            db_pool: pool,
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn analyzer(&self) -> Arc<ReviewAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    #[must_use]
    pub fn jobs(&self) -> Arc<JobManager> {
        Arc::clone(&self.jobs)
    }

    #[must_use]
    pub fn worker(&self) -> Arc<JobWorker> {
        Arc::clone(&self.worker)
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}
