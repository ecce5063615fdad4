/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // ジョブ
    pub jobs_enqueued: Counter,
    pub jobs_started: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,

    // 代表サンプリング
    pub sampler_small_batch: Counter,
    pub sampler_modeled: Counter,
    pub sampler_degraded: Counter,
    pub embedding_cache_hits: Counter,
    pub embedding_cache_misses: Counter,

    // 構造化出力
    pub structured_recovered: Counter,
    pub structured_raw_fallback: Counter,
    pub generation_failures: Counter,

    // ヒストグラム
    pub sampling_duration: Histogram,
    pub generation_duration: Histogram,
    pub job_duration: Histogram,

    // ゲージ
    pub active_jobs: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じ名前のメトリクスがレジストリに登録済みの場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            jobs_enqueued: register_counter_with_registry!(
                "review_digest_jobs_enqueued_total",
                "Total number of jobs accepted by the broker",
                registry
            )?,
            jobs_started: register_counter_with_registry!(
                "review_digest_jobs_started_total",
                "Total number of jobs picked up by a worker",
                registry
            )?,
            jobs_completed: register_counter_with_registry!(
                "review_digest_jobs_completed_total",
                "Total number of jobs completed",
                registry
            )?,
            jobs_failed: register_counter_with_registry!(
                "review_digest_jobs_failed_total",
                "Total number of jobs that ended in error",
                registry
            )?,
            sampler_small_batch: register_counter_with_registry!(
                "review_digest_sampler_small_batch_total",
                "Batches returned unchanged because they were below the modeling threshold",
                registry
            )?,
            sampler_modeled: register_counter_with_registry!(
                "review_digest_sampler_modeled_total",
                "Batches sampled through topic modeling",
                registry
            )?,
            sampler_degraded: register_counter_with_registry!(
                "review_digest_sampler_degraded_total",
                "Batches that fell back to the first-N originals",
                registry
            )?,
            embedding_cache_hits: register_counter_with_registry!(
                "review_digest_embedding_cache_hits_total",
                "Embedding cache hits",
                registry
            )?,
            embedding_cache_misses: register_counter_with_registry!(
                "review_digest_embedding_cache_misses_total",
                "Embedding cache misses",
                registry
            )?,
            structured_recovered: register_counter_with_registry!(
                "review_digest_structured_recovered_total",
                "Generated texts recovered into attribute records",
                registry
            )?,
            structured_raw_fallback: register_counter_with_registry!(
                "review_digest_structured_raw_fallback_total",
                "Generated texts passed through verbatim because recovery failed",
                registry
            )?,
            generation_failures: register_counter_with_registry!(
                "review_digest_generation_failures_total",
                "Failed calls to the generation provider",
                registry
            )?,
            sampling_duration: register_histogram_with_registry!(
                "review_digest_sampling_duration_seconds",
                "Duration of representative sampling",
                registry
            )?,
            generation_duration: register_histogram_with_registry!(
                "review_digest_generation_duration_seconds",
                "Duration of generation provider calls",
                registry
            )?,
            job_duration: register_histogram_with_registry!(
                "review_digest_job_duration_seconds",
                "Duration of queued job execution",
                registry
            )?,
            active_jobs: register_gauge_with_registry!(
                "review_digest_active_jobs",
                "Number of jobs currently executing",
                registry
            )?,
            registry,
        })
    }

    /// 専用レジストリ付きのコレクターを作成する。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn standalone() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
