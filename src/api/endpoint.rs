//! Statically registered backend routes.

use reqwest::Method;

/// Every route the workbench is allowed to call.
///
/// Path templates use `{}` placeholders that are filled in order from
/// `Params::path` segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
  // benchmark
  BenchmarkRun,
  BenchmarkResults,
  BenchmarkHistory,
  BenchmarkMetrics,
  BenchmarkDatasetInfo,

  // data-quality
  QualityCoverage,
  QualityDrift,
  QualityFreshness,
  QualityValidationErrors,
  QualityIngestionSummary,

  // documents
  DocumentsList,
  DocumentsUpload,

  // ground-truth
  GroundTruthHealth,
  GroundTruthSuggest,
  GroundTruthValidate,
  GroundTruthConvert,

  // normalizer
  NormalizerHealth,
  NormalizerVersions,
  Normalize,
  NormalizeBatchOcr,

  // ocr corrections
  CorrectionsList,
  CorrectionsSubmit,

  // scan v1
  ScanSubmit,
  ScanJobResult,

  // task queue
  TaskQueueStats,
  TaskQueueEnqueue,
  TaskQueueCancel,
  TaskQueueRetry,

  // acquisition / dlq
  AcquisitionMetrics,
}

impl Endpoint {
  pub fn method(&self) -> Method {
    match self {
      Endpoint::BenchmarkRun
      | Endpoint::DocumentsUpload
      | Endpoint::GroundTruthSuggest
      | Endpoint::GroundTruthValidate
      | Endpoint::GroundTruthConvert
      | Endpoint::Normalize
      | Endpoint::NormalizeBatchOcr
      | Endpoint::CorrectionsSubmit
      | Endpoint::ScanSubmit
      | Endpoint::TaskQueueEnqueue
      | Endpoint::TaskQueueCancel
      | Endpoint::TaskQueueRetry => Method::POST,
      _ => Method::GET,
    }
  }

  pub fn path_template(&self) -> &'static str {
    match self {
      Endpoint::BenchmarkRun => "/api/benchmark/run",
      Endpoint::BenchmarkResults => "/api/benchmark/results",
      Endpoint::BenchmarkHistory => "/api/benchmark/history",
      Endpoint::BenchmarkMetrics => "/api/benchmark/metrics",
      Endpoint::BenchmarkDatasetInfo => "/api/benchmark/dataset",

      Endpoint::QualityCoverage => "/api/data-quality/coverage",
      Endpoint::QualityDrift => "/api/data-quality/drift",
      Endpoint::QualityFreshness => "/api/data-quality/freshness",
      Endpoint::QualityValidationErrors => "/api/data-quality/validation-errors",
      Endpoint::QualityIngestionSummary => "/api/data-quality/ingestion-summary",

      Endpoint::DocumentsList => "/api/documents",
      Endpoint::DocumentsUpload => "/api/documents/upload",

      Endpoint::GroundTruthHealth => "/api/ground-truth/health",
      Endpoint::GroundTruthSuggest => "/api/ground-truth/suggest",
      Endpoint::GroundTruthValidate => "/api/ground-truth/validate",
      Endpoint::GroundTruthConvert => "/api/ground-truth/convert",

      Endpoint::NormalizerHealth => "/api/normalizer/health",
      Endpoint::NormalizerVersions => "/api/normalizer/versions",
      Endpoint::Normalize => "/api/normalizer/normalize",
      Endpoint::NormalizeBatchOcr => "/api/normalizer/normalize/batch-ocr",

      Endpoint::CorrectionsList => "/api/ocr/corrections",
      Endpoint::CorrectionsSubmit => "/api/ocr/corrections",

      Endpoint::ScanSubmit => "/api/v1/scan",
      Endpoint::ScanJobResult => "/api/v1/scan/{}",

      Endpoint::TaskQueueStats => "/api/tasks/stats",
      Endpoint::TaskQueueEnqueue => "/api/tasks",
      Endpoint::TaskQueueCancel => "/api/tasks/{}/cancel",
      Endpoint::TaskQueueRetry => "/api/tasks/{}/retry",

      Endpoint::AcquisitionMetrics => "/api/acquisition/metrics",
    }
  }

  /// Fill the template's placeholders with the given segments.
  ///
  /// Returns `None` when the number of segments doesn't match the template.
  pub fn render_path(&self, segments: &[String]) -> Option<String> {
    let template = self.path_template();
    let mut parts = template.split("{}");
    let mut path = parts.next().unwrap_or_default().to_string();
    let mut used = 0;

    for rest in parts {
      let segment = segments.get(used)?;
      path.push_str(&encode_segment(segment));
      path.push_str(rest);
      used += 1;
    }

    (used == segments.len()).then_some(path)
  }
}

/// Percent-encode a single path segment.
fn encode_segment(segment: &str) -> String {
  url::form_urlencoded::byte_serialize(segment.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_render_static_path() {
    assert_eq!(
      Endpoint::DocumentsList.render_path(&[]),
      Some("/api/documents".to_string())
    );
  }

  #[test]
  fn test_render_templated_path() {
    let path = Endpoint::ScanJobResult.render_path(&["job-42".to_string()]);
    assert_eq!(path, Some("/api/v1/scan/job-42".to_string()));
  }

  #[test]
  fn test_segment_count_mismatch() {
    assert_eq!(Endpoint::TaskQueueCancel.render_path(&[]), None);
    assert_eq!(
      Endpoint::DocumentsList.render_path(&["extra".to_string()]),
      None
    );
  }

  #[test]
  fn test_segments_are_encoded() {
    let path = Endpoint::TaskQueueRetry.render_path(&["a b/c".to_string()]);
    assert_eq!(path, Some("/api/tasks/a%20b%2Fc/retry".to_string()));
  }

  #[test]
  fn test_methods() {
    assert_eq!(Endpoint::DocumentsUpload.method(), Method::POST);
    assert_eq!(Endpoint::ScanJobResult.method(), Method::GET);
  }
}
