//! Resource hooks: each read pairs a domain cache key with one endpoint call,
//! each write pairs an endpoint call with the keys it invalidates and the
//! message the user sees.

use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use crate::api::types::{
  AcquisitionMetrics, BatchOcrRequest, BatchOcrResponse, BenchmarkHistory, BenchmarkMetrics,
  BenchmarkResults, BenchmarkRun, BenchmarkRunRequest, ConvertResponse, Correction,
  CorrectionList, CorrectionRequest, DatasetInfo, DocumentPage, DocumentUpload, EnqueueRequest,
  HealthStatus, NormalizeRequest, NormalizeResponse, NormalizerVersions, QualityReport,
  ScanJob, ScanSubmitted, SuggestResponse, TaskJob, TaskQueueStats, ValidateResponse,
  ValidationErrors,
};
use crate::api::{ApiClient, Endpoint, FileUpload, Params, RemoteError};
use crate::config::{Config, QueryConfig};
use crate::notify::Notifier;
use crate::query::{
  CacheEntry, Mutation, MutationExecutor, PollInterval, Poller, Query, QueryCache, QueryKey,
  QueryOptions,
};

/// Data quality reports refresh on this interval.
pub const QUALITY_REFRESH: Duration = Duration::from_secs(60);
/// Scan jobs are polled on this interval until they finish.
pub const SCAN_POLL: Duration = Duration::from_secs(3);
pub const TASK_QUEUE_REFRESH: Duration = Duration::from_secs(10);
pub const ACQUISITION_REFRESH: Duration = Duration::from_secs(30);

/// Cache keys, one constructor per resource.
pub mod keys {
  use crate::query::{KeyParams, QueryKey};
  use crate::query_key;

  pub fn benchmark() -> QueryKey {
    query_key!["benchmark"]
  }

  pub fn benchmark_results() -> QueryKey {
    query_key!["benchmark", "results"]
  }

  pub fn benchmark_history(limit: u32) -> QueryKey {
    query_key!["benchmark", "history", limit]
  }

  pub fn benchmark_metrics() -> QueryKey {
    query_key!["benchmark", "metrics"]
  }

  pub fn benchmark_dataset() -> QueryKey {
    query_key!["benchmark", "dataset"]
  }

  pub fn data_quality(report: &str) -> QueryKey {
    query_key!["data-quality", report]
  }

  pub fn validation_errors(limit: u32) -> QueryKey {
    query_key!["data-quality", "validation-errors", limit]
  }

  pub fn documents() -> QueryKey {
    query_key!["documents"]
  }

  pub fn document_page(page: u32, page_size: u32) -> QueryKey {
    query_key![
      "documents",
      KeyParams::new().set("page", page).set("page_size", page_size)
    ]
  }

  pub fn ground_truth() -> QueryKey {
    query_key!["ground-truth"]
  }

  pub fn ground_truth_health() -> QueryKey {
    query_key!["ground-truth", "health"]
  }

  pub fn normalizer_health() -> QueryKey {
    query_key!["normalizer", "health"]
  }

  pub fn normalizer_versions() -> QueryKey {
    query_key!["normalizer", "versions"]
  }

  pub fn corrections() -> QueryKey {
    query_key!["corrections"]
  }

  pub fn correction_list(status: Option<&str>) -> QueryKey {
    query_key!["corrections", KeyParams::new().set_opt("status", status)]
  }

  pub fn scan_job(job_id: &str) -> QueryKey {
    query_key!["scan-v1", "job", job_id]
  }

  pub fn task_queue() -> QueryKey {
    query_key!["task-queue"]
  }

  pub fn task_queue_stats() -> QueryKey {
    query_key!["task-queue", "stats"]
  }

  pub fn acquisition_metrics() -> QueryKey {
    query_key!["acquisition-metrics"]
  }
}

/// The application's data layer: one client, one cache, one executor.
#[derive(Clone)]
pub struct Workbench {
  client: ApiClient,
  cache: QueryCache,
  mutations: MutationExecutor,
  query_config: QueryConfig,
}

impl Workbench {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let client = ApiClient::new(config)?;
    Ok(Self::from_parts(client, Notifier::new(), config.query.clone()))
  }

  pub fn from_parts(client: ApiClient, notifier: Notifier, query_config: QueryConfig) -> Self {
    let cache = QueryCache::new(query_config.cache_config());
    let mutations = MutationExecutor::new(cache.clone(), notifier, query_config.write_retry());
    Self {
      client,
      cache,
      mutations,
      query_config,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn notifier(&self) -> &Notifier {
    self.mutations.notifier()
  }

  pub fn client(&self) -> &ApiClient {
    &self.client
  }

  fn options<T>(&self) -> QueryOptions<T> {
    QueryOptions::new().stale_time(self.query_config.stale_time())
  }

  fn fetcher<T>(
    &self,
    endpoint: Endpoint,
    params: Params,
  ) -> impl Fn() -> BoxFuture<'static, Result<T, RemoteError>> + Send + Sync + 'static
  where
    T: DeserializeOwned + Send + 'static,
  {
    let client = self.client.clone();
    move || {
      let client = client.clone();
      let params = params.clone();
      async move { client.fetch(endpoint, params).await }.boxed()
    }
  }

  async fn query<T>(
    &self,
    key: QueryKey,
    options: QueryOptions<T>,
    endpoint: Endpoint,
    params: Params,
  ) -> CacheEntry<T>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    self
      .cache
      .read(&key, &options, self.fetcher(endpoint, params))
      .await
  }

  /// Keep `key` refreshed in the background until the poller is dropped.
  pub fn poll<T>(
    &self,
    key: QueryKey,
    options: QueryOptions<T>,
    endpoint: Endpoint,
    params: Params,
  ) -> Poller<T>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    Poller::spawn(&self.cache, key, options, self.fetcher(endpoint, params))
  }

  /// A non-blocking handle onto `key` for an event loop to drive.
  pub fn observe<T>(
    &self,
    key: QueryKey,
    options: QueryOptions<T>,
    endpoint: Endpoint,
    params: Params,
  ) -> Query<T>
  where
    T: DeserializeOwned + Send + Sync + 'static,
  {
    Query::new(&self.cache, key, self.fetcher(endpoint, params)).with_options(options)
  }

  async fn mutate<T>(
    &self,
    mutation: Mutation<T>,
    endpoint: Endpoint,
    params: Params,
  ) -> Result<T, RemoteError>
  where
    T: DeserializeOwned,
  {
    let client = &self.client;
    self
      .mutations
      .execute(mutation, || client.fetch(endpoint, params.clone()))
      .await
  }

  // ==========================================================================
  // benchmark
  // ==========================================================================

  pub async fn benchmark_results(&self) -> CacheEntry<BenchmarkResults> {
    self
      .query(keys::benchmark_results(), self.options(), Endpoint::BenchmarkResults, Params::new())
      .await
  }

  pub async fn benchmark_history(&self, limit: u32) -> CacheEntry<BenchmarkHistory> {
    self
      .query(
        keys::benchmark_history(limit),
        self.options(),
        Endpoint::BenchmarkHistory,
        Params::new().query("limit", limit),
      )
      .await
  }

  pub async fn benchmark_metrics(&self) -> CacheEntry<BenchmarkMetrics> {
    self
      .query(keys::benchmark_metrics(), self.options(), Endpoint::BenchmarkMetrics, Params::new())
      .await
  }

  pub async fn benchmark_dataset(&self) -> CacheEntry<DatasetInfo> {
    self
      .query(
        keys::benchmark_dataset(),
        self.options(),
        Endpoint::BenchmarkDatasetInfo,
        Params::new(),
      )
      .await
  }

  pub async fn run_benchmark(
    &self,
    request: &BenchmarkRunRequest,
  ) -> Result<BenchmarkRun, RemoteError> {
    let mutation = Mutation::new("Benchmark run")
      .invalidates(keys::benchmark())
      .on_success_message(|run: &BenchmarkRun| match run.accuracy {
        Some(accuracy) => format!(
          "Benchmark complete: {}/{} passed ({:.1}% accuracy)",
          run.passed,
          run.total,
          accuracy * 100.0
        ),
        None => format!("Benchmark complete: {}/{} passed", run.passed, run.total),
      });
    self
      .mutate(mutation, Endpoint::BenchmarkRun, Params::new().json(request))
      .await
  }

  // ==========================================================================
  // data-quality
  // ==========================================================================

  fn quality_options<T>(&self) -> QueryOptions<T> {
    QueryOptions::new()
      .stale_time(QUALITY_REFRESH / 2)
      .poll(PollInterval::fixed(QUALITY_REFRESH))
  }

  fn quality_endpoint(report: QualityReportKind) -> Endpoint {
    match report {
      QualityReportKind::Coverage => Endpoint::QualityCoverage,
      QualityReportKind::Drift => Endpoint::QualityDrift,
      QualityReportKind::Freshness => Endpoint::QualityFreshness,
      QualityReportKind::IngestionSummary => Endpoint::QualityIngestionSummary,
    }
  }

  pub async fn quality_report(&self, report: QualityReportKind) -> CacheEntry<QualityReport> {
    self
      .query(
        keys::data_quality(report.as_str()),
        self.quality_options(),
        Self::quality_endpoint(report),
        Params::new(),
      )
      .await
  }

  /// Refresh a data quality report every minute.
  pub fn watch_quality_report(&self, report: QualityReportKind) -> Poller<QualityReport> {
    self.poll(
      keys::data_quality(report.as_str()),
      self.quality_options(),
      Self::quality_endpoint(report),
      Params::new(),
    )
  }

  pub async fn validation_errors(&self, limit: u32) -> CacheEntry<ValidationErrors> {
    self
      .query(
        keys::validation_errors(limit),
        self.quality_options(),
        Endpoint::QualityValidationErrors,
        Params::new().query("limit", limit),
      )
      .await
  }

  // ==========================================================================
  // documents
  // ==========================================================================

  pub async fn documents(&self, page: u32, page_size: u32) -> CacheEntry<DocumentPage> {
    self
      .query(
        keys::document_page(page, page_size),
        self.options(),
        Endpoint::DocumentsList,
        Params::new()
          .query("page", page)
          .query("page_size", page_size),
      )
      .await
  }

  pub async fn upload_document(&self, file: FileUpload) -> Result<DocumentUpload, RemoteError> {
    let mutation = Mutation::new("Upload")
      .require(!file.bytes.is_empty(), format!("{} is empty", file.filename))
      .invalidates(keys::documents())
      .on_success_message(|doc: &DocumentUpload| format!("Uploaded {}", doc.filename))
      .error_title(format!("Upload of {} failed", file.filename));
    self
      .mutate(mutation, Endpoint::DocumentsUpload, Params::new().file(file))
      .await
  }

  // ==========================================================================
  // ground-truth
  // ==========================================================================

  pub async fn ground_truth_health(&self) -> CacheEntry<HealthStatus> {
    self
      .query(
        keys::ground_truth_health(),
        self.options(),
        Endpoint::GroundTruthHealth,
        Params::new(),
      )
      .await
  }

  pub fn observe_ground_truth_health(&self) -> Query<HealthStatus> {
    self.observe(
      keys::ground_truth_health(),
      self.options(),
      Endpoint::GroundTruthHealth,
      Params::new(),
    )
  }

  pub async fn suggest_ground_truth(&self, body: &Value) -> Result<SuggestResponse, RemoteError> {
    let mutation = Mutation::new("Suggest").on_success_message(|r: &SuggestResponse| {
      format!("Generated {} suggestions", r.total_suggestions)
    });
    self
      .mutate(mutation, Endpoint::GroundTruthSuggest, Params::new().json(body))
      .await
  }

  pub async fn validate_ground_truth(&self, body: &Value) -> Result<ValidateResponse, RemoteError> {
    let mutation = Mutation::new("Validation").on_success_message(|r: &ValidateResponse| {
      if r.is_valid {
        "Ground truth is valid".to_string()
      } else {
        format!("Validation found {} errors", r.errors.len())
      }
    });
    self
      .mutate(mutation, Endpoint::GroundTruthValidate, Params::new().json(body))
      .await
  }

  pub async fn convert_ground_truth(&self, body: &Value) -> Result<ConvertResponse, RemoteError> {
    let mutation = Mutation::new("Conversion")
      .invalidates(keys::ground_truth())
      .on_success_message(|r: &ConvertResponse| format!("Converted {} records", r.total_converted));
    self
      .mutate(mutation, Endpoint::GroundTruthConvert, Params::new().json(body))
      .await
  }

  // ==========================================================================
  // normalizer
  // ==========================================================================

  pub async fn normalizer_health(&self) -> CacheEntry<HealthStatus> {
    self
      .query(keys::normalizer_health(), self.options(), Endpoint::NormalizerHealth, Params::new())
      .await
  }

  pub fn observe_normalizer_health(&self) -> Query<HealthStatus> {
    self.observe(
      keys::normalizer_health(),
      self.options(),
      Endpoint::NormalizerHealth,
      Params::new(),
    )
  }

  pub async fn normalizer_versions(&self) -> CacheEntry<NormalizerVersions> {
    self
      .query(
        keys::normalizer_versions(),
        self.options(),
        Endpoint::NormalizerVersions,
        Params::new(),
      )
      .await
  }

  pub async fn normalize(
    &self,
    request: &NormalizeRequest,
  ) -> Result<NormalizeResponse, RemoteError> {
    let mutation = Mutation::new("Normalization")
      .require(!request.text.trim().is_empty(), "Enter some text to normalize")
      .on_success_message(|_: &NormalizeResponse| "Text normalized".to_string());
    self
      .mutate(mutation, Endpoint::Normalize, Params::new().json(request))
      .await
  }

  pub async fn normalize_batch_ocr(
    &self,
    request: &BatchOcrRequest,
  ) -> Result<BatchOcrResponse, RemoteError> {
    let mutation = Mutation::new("Batch normalization")
      .require(!request.document_ids.is_empty(), "Select at least one document")
      .invalidates(keys::documents())
      .on_success_message(|r: &BatchOcrResponse| {
        format!("Batch complete: {}/{} succeeded", r.succeeded, r.total)
      });
    self
      .mutate(mutation, Endpoint::NormalizeBatchOcr, Params::new().json(request))
      .await
  }

  // ==========================================================================
  // ocr corrections
  // ==========================================================================

  pub async fn corrections(&self, status: Option<&str>) -> CacheEntry<CorrectionList> {
    let mut params = Params::new();
    if let Some(status) = status {
      params = params.query("status", status);
    }
    self
      .query(keys::correction_list(status), self.options(), Endpoint::CorrectionsList, params)
      .await
  }

  pub async fn submit_correction(
    &self,
    request: &CorrectionRequest,
  ) -> Result<Correction, RemoteError> {
    let wrong = request.wrong_text.trim();
    let correct = request.correct_text.trim();
    let mutation = Mutation::new("Correction")
      .require(!wrong.is_empty(), "Enter the misread text")
      .require(!correct.is_empty(), "Enter the corrected text")
      .require(wrong != correct, "Correction must differ from the original text")
      .invalidates(keys::corrections())
      .on_success_message(|c: &Correction| {
        format!("Correction submitted: {} -> {}", c.wrong_text, c.correct_text)
      });
    self
      .mutate(mutation, Endpoint::CorrectionsSubmit, Params::new().json(request))
      .await
  }

  // ==========================================================================
  // scan v1
  // ==========================================================================

  pub async fn submit_scan(&self, image: FileUpload) -> Result<ScanSubmitted, RemoteError> {
    let mutation = Mutation::new("Scan")
      .require(!image.bytes.is_empty(), format!("{} is empty", image.filename))
      .on_success_message(|s: &ScanSubmitted| format!("Scan queued (job {})", s.job_id));
    self
      .mutate(mutation, Endpoint::ScanSubmit, Params::new().file(image))
      .await
  }

  fn scan_job_options(&self) -> QueryOptions<ScanJob> {
    QueryOptions::new().poll(PollInterval::until(SCAN_POLL, |job: &ScanJob| {
      job.status.is_terminal()
    }))
  }

  pub async fn scan_job(&self, job_id: &str) -> CacheEntry<ScanJob> {
    self
      .query(
        keys::scan_job(job_id),
        self.scan_job_options(),
        Endpoint::ScanJobResult,
        Params::new().segment(job_id),
      )
      .await
  }

  /// Poll a scan job every few seconds until it is done or failed.
  pub fn poll_scan_job(&self, job_id: &str) -> Poller<ScanJob> {
    self.poll(
      keys::scan_job(job_id),
      self.scan_job_options(),
      Endpoint::ScanJobResult,
      Params::new().segment(job_id),
    )
  }

  // ==========================================================================
  // task queue
  // ==========================================================================

  fn task_queue_options<T>(&self) -> QueryOptions<T> {
    QueryOptions::new()
      .stale_time(TASK_QUEUE_REFRESH)
      .poll(PollInterval::fixed(TASK_QUEUE_REFRESH))
  }

  pub async fn task_queue_stats(&self) -> CacheEntry<TaskQueueStats> {
    self
      .query(
        keys::task_queue_stats(),
        self.task_queue_options(),
        Endpoint::TaskQueueStats,
        Params::new(),
      )
      .await
  }

  pub fn watch_task_queue(&self) -> Poller<TaskQueueStats> {
    self.poll(
      keys::task_queue_stats(),
      self.task_queue_options(),
      Endpoint::TaskQueueStats,
      Params::new(),
    )
  }

  pub async fn enqueue_task(&self, request: &EnqueueRequest) -> Result<TaskJob, RemoteError> {
    let mutation = Mutation::new("Enqueue")
      .require(!request.task.trim().is_empty(), "Task name is required")
      .invalidates(keys::task_queue())
      .on_success_message(|job: &TaskJob| format!("Enqueued job {}", job.job_id));
    self
      .mutate(mutation, Endpoint::TaskQueueEnqueue, Params::new().json(request))
      .await
  }

  pub async fn cancel_task(&self, job_id: &str) -> Result<TaskJob, RemoteError> {
    let mutation = Mutation::new("Cancel")
      .invalidates(keys::task_queue())
      .on_success_message(|job: &TaskJob| format!("Cancelled job {}", job.job_id))
      .error_title(format!("Could not cancel job {}", job_id));
    self
      .mutate(mutation, Endpoint::TaskQueueCancel, Params::new().segment(job_id))
      .await
  }

  pub async fn retry_task(&self, job_id: &str) -> Result<TaskJob, RemoteError> {
    let mutation = Mutation::new("Retry")
      .invalidates(keys::task_queue())
      .on_success_message(|job: &TaskJob| format!("Retrying job {}", job.job_id))
      .error_title(format!("Could not retry job {}", job_id));
    self
      .mutate(mutation, Endpoint::TaskQueueRetry, Params::new().segment(job_id))
      .await
  }

  // ==========================================================================
  // acquisition metrics / dlq
  // ==========================================================================

  fn acquisition_options(&self) -> QueryOptions<AcquisitionMetrics> {
    QueryOptions::new()
      .stale_time(ACQUISITION_REFRESH)
      .poll(PollInterval::fixed(ACQUISITION_REFRESH))
  }

  pub async fn acquisition_metrics(&self) -> CacheEntry<AcquisitionMetrics> {
    self
      .query(
        keys::acquisition_metrics(),
        self.acquisition_options(),
        Endpoint::AcquisitionMetrics,
        Params::new(),
      )
      .await
  }

  pub fn watch_acquisition_metrics(&self) -> Poller<AcquisitionMetrics> {
    self.poll(
      keys::acquisition_metrics(),
      self.acquisition_options(),
      Endpoint::AcquisitionMetrics,
      Params::new(),
    )
  }
}

/// The data quality reports that share one response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityReportKind {
  Coverage,
  Drift,
  Freshness,
  IngestionSummary,
}

impl QualityReportKind {
  pub const ALL: [QualityReportKind; 4] = [
    QualityReportKind::Coverage,
    QualityReportKind::Drift,
    QualityReportKind::Freshness,
    QualityReportKind::IngestionSummary,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      QualityReportKind::Coverage => "coverage",
      QualityReportKind::Drift => "drift",
      QualityReportKind::Freshness => "freshness",
      QualityReportKind::IngestionSummary => "ingestion-summary",
    }
  }
}

impl std::str::FromStr for QualityReportKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    QualityReportKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| format!("unknown report '{}'", s))
  }
}
