//! Serde types matching the review backend's JSON payloads.
//!
//! Only the fields the workbench reads are typed; everything else is kept in
//! `extra` so that nothing the backend sends is lost when re-displayed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

type Extra = HashMap<String, Value>;

// ============================================================================
// benchmark
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkRunRequest {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dataset: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
  #[serde(default)]
  pub run_id: Option<String>,
  #[serde(default)]
  pub accuracy: Option<f64>,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub passed: u64,
  #[serde(default)]
  pub started_at: Option<String>,
  #[serde(flatten)]
  pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResults {
  #[serde(default)]
  pub results: Vec<BenchmarkRun>,
  #[serde(flatten)]
  pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkHistory {
  #[serde(default)]
  pub runs: Vec<BenchmarkRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
  #[serde(flatten)]
  pub metrics: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub size: u64,
  #[serde(flatten)]
  pub extra: Extra,
}

// ============================================================================
// data-quality
// ============================================================================

/// Data quality reports share one loose shape: a handful of headline numbers
/// plus arbitrary breakdowns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
  #[serde(flatten)]
  pub fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorRecord {
  #[serde(default)]
  pub field: Option<String>,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub occurred_at: Option<String>,
  #[serde(flatten)]
  pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrors {
  #[serde(default)]
  pub errors: Vec<ValidationErrorRecord>,
  #[serde(default)]
  pub total: u64,
}

// ============================================================================
// documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
  pub document_id: String,
  pub filename: String,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub uploaded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
  #[serde(default)]
  pub documents: Vec<Document>,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub page: u32,
  #[serde(default)]
  pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpload {
  pub filename: String,
  pub document_id: String,
}

// ============================================================================
// ground-truth
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
  pub status: String,
  #[serde(default)]
  pub version: Option<String>,
  #[serde(flatten)]
  pub extra: Extra,
}

impl HealthStatus {
  pub fn is_healthy(&self) -> bool {
    matches!(self.status.as_str(), "ok" | "healthy" | "up")
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestResponse {
  pub total_suggestions: u64,
  #[serde(default)]
  pub suggestions: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
  pub is_valid: bool,
  #[serde(default)]
  pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
  pub total_converted: u64,
  #[serde(flatten)]
  pub extra: Extra,
}

// ============================================================================
// normalizer
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerVersions {
  #[serde(default)]
  pub versions: Vec<String>,
  #[serde(default)]
  pub current: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeRequest {
  pub text: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeResponse {
  pub normalized_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOcrRequest {
  pub document_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOcrResponse {
  pub succeeded: u64,
  pub total: u64,
  #[serde(default)]
  pub results: Vec<Value>,
}

// ============================================================================
// ocr corrections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRequest {
  pub wrong_text: String,
  pub correct_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
  pub id: String,
  pub wrong_text: String,
  pub correct_text: String,
  pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionList {
  #[serde(default)]
  pub corrections: Vec<Correction>,
}

// ============================================================================
// scan v1
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
  Queued,
  Running,
  Done,
  Failed,
}

impl JobStatus {
  /// No further polling is meaningful once a job reaches one of these.
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Done | JobStatus::Failed)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSubmitted {
  pub job_id: String,
  pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
  pub job_id: String,
  pub status: JobStatus,
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error: Option<String>,
}

// ============================================================================
// task queue
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
  pub task: String,
  #[serde(default)]
  pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJob {
  pub job_id: String,
  pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueStats {
  #[serde(default)]
  pub queued: u64,
  #[serde(default)]
  pub running: u64,
  #[serde(default)]
  pub failed: u64,
  #[serde(default)]
  pub completed: u64,
  #[serde(flatten)]
  pub extra: Extra,
}

// ============================================================================
// acquisition metrics / dlq
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMetrics {
  pub name: String,
  #[serde(flatten)]
  pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionMetrics {
  #[serde(default)]
  pub channels: Vec<ChannelMetrics>,
  pub dlq_depth: u64,
  pub dedup_rate: f64,
}
