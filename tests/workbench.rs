use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use workbench::api::types::{CorrectionRequest, JobStatus};
use workbench::api::{ApiClient, Endpoint, FileUpload, Params, RemoteError, RemoteErrorKind};
use workbench::config::QueryConfig;
use workbench::notify::{ChannelSink, Notification, NotificationLevel, Notifier};
use workbench::resources::keys;
use workbench::Workbench;

fn quick_config(read_retries: u32) -> QueryConfig {
  QueryConfig {
    read_retries,
    write_retries: 0,
    retry_base_delay_ms: 10,
    retry_max_delay_ms: 20,
    ..QueryConfig::default()
  }
}

fn client(server: &MockServer) -> ApiClient {
  ApiClient::with_token(&server.uri(), Duration::from_secs(5), None).unwrap()
}

fn workbench(
  server: &MockServer,
  config: QueryConfig,
) -> (Workbench, mpsc::UnboundedReceiver<Notification>) {
  let notifier = Notifier::new();
  let (sink, rx) = ChannelSink::new();
  notifier.subscribe(Arc::new(sink));
  (Workbench::from_parts(client(server), notifier, config), rx)
}

#[tokio::test]
async fn test_http_error_uses_backend_detail() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/v1/scan/job-9"))
    .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "detail": "Job not found" })))
    .mount(&server)
    .await;

  let result: Result<serde_json::Value, RemoteError> = client(&server)
    .fetch(Endpoint::ScanJobResult, Params::new().segment("job-9"))
    .await;

  let err = result.unwrap_err();
  assert_eq!(err.kind, RemoteErrorKind::Http);
  assert_eq!(err.status, Some(500));
  assert_eq!(err.message, "Job not found");
}

#[tokio::test]
async fn test_http_error_without_detail_falls_back_to_status() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/tasks/stats"))
    .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
    .mount(&server)
    .await;

  let err = client(&server)
    .fetch::<serde_json::Value>(Endpoint::TaskQueueStats, Params::new())
    .await
    .unwrap_err();
  assert_eq!(err.message, "Request failed with status 503");
}

#[tokio::test]
async fn test_malformed_body_is_parse_error() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/normalizer/versions"))
    .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
    .mount(&server)
    .await;

  let err = client(&server)
    .fetch::<serde_json::Value>(Endpoint::NormalizerVersions, Params::new())
    .await
    .unwrap_err();
  assert_eq!(err.kind, RemoteErrorKind::Parse);
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
  let server = MockServer::start().await;
  let uri = server.uri();
  drop(server);

  let client = ApiClient::with_token(&uri, Duration::from_secs(2), None).unwrap();
  let err = client
    .fetch::<serde_json::Value>(Endpoint::NormalizerHealth, Params::new())
    .await
    .unwrap_err();
  assert_eq!(err.kind, RemoteErrorKind::Transport);
  assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/ground-truth/health"))
    .and(wiremock::matchers::header("authorization", "Bearer secret"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
    .expect(1)
    .mount(&server)
    .await;

  let client =
    ApiClient::with_token(&server.uri(), Duration::from_secs(5), Some("secret".into())).unwrap();
  let health: workbench::api::types::HealthStatus = client
    .fetch(Endpoint::GroundTruthHealth, Params::new())
    .await
    .unwrap();
  assert!(health.is_healthy());
}

#[tokio::test]
async fn test_upload_invalidates_documents_and_notifies() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/documents"))
    .and(query_param("page", "1"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "documents": [],
      "total": 0,
      "page": 1,
      "page_size": 20
    })))
    .expect(2)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/api/documents/upload"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "filename": "label.pdf",
      "document_id": "doc-42"
    })))
    .expect(1)
    .mount(&server)
    .await;

  let config = QueryConfig {
    stale_time_ms: 60_000,
    ..quick_config(0)
  };
  let (wb, mut rx) = workbench(&server, config);

  assert!(wb.documents(1, 20).await.is_success());
  // fresh, served from cache
  assert!(wb.documents(1, 20).await.is_success());

  let upload =
    FileUpload::new("file", "label.pdf", b"%PDF-1.4".to_vec()).with_mime("application/pdf");
  let uploaded = wb.upload_document(upload).await.unwrap();
  assert_eq!(uploaded.filename, "label.pdf");
  assert_eq!(uploaded.document_id, "doc-42");

  let note = rx.try_recv().unwrap();
  assert_eq!(note.level, NotificationLevel::Success);
  assert!(note.message.contains("label.pdf"));

  // invalidated, so this refetches (second GET)
  let page = wb.documents(1, 20).await;
  assert!(page.is_success());
  assert!(!page.is_stale);
}

#[tokio::test]
async fn test_correction_round_trip() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/ocr/corrections"))
    .and(body_json(json!({ "wrong_text": "vegtable", "correct_text": "vegetable" })))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "id": "corr-1",
      "wrong_text": "vegtable",
      "correct_text": "vegetable",
      "status": "candidate"
    })))
    .expect(1)
    .mount(&server)
    .await;

  let (wb, mut rx) = workbench(&server, quick_config(0));
  wb.cache().set_data(&keys::correction_list(None), 0u32);

  let correction = wb
    .submit_correction(&CorrectionRequest {
      wrong_text: "vegtable".into(),
      correct_text: "vegetable".into(),
    })
    .await
    .unwrap();

  assert_eq!(correction.id, "corr-1");
  assert_eq!(correction.status, "candidate");
  assert!(wb
    .cache()
    .peek::<u32>(&keys::correction_list(None), Duration::from_secs(600))
    .is_stale);
  assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Success);
}

#[tokio::test]
async fn test_identical_correction_is_rejected_locally() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/ocr/corrections"))
    .respond_with(ResponseTemplate::new(200))
    .expect(0)
    .mount(&server)
    .await;

  let (wb, mut rx) = workbench(&server, quick_config(0));
  let err = wb
    .submit_correction(&CorrectionRequest {
      wrong_text: "milk".into(),
      correct_text: "milk".into(),
    })
    .await
    .unwrap_err();

  assert_eq!(err.kind, RemoteErrorKind::Validation);
  assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Error);
}

#[tokio::test]
async fn test_read_retries_then_keeps_error() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/acquisition/metrics"))
    .respond_with(ResponseTemplate::new(502).set_body_json(json!({ "error": "bad gateway" })))
    .expect(3)
    .mount(&server)
    .await;

  let (wb, _rx) = workbench(&server, quick_config(2));
  let entry = wb.acquisition_metrics().await;
  assert!(entry.is_error());
  assert_eq!(entry.error().unwrap().message, "bad gateway");
  assert!(entry.data().is_none());
}

#[tokio::test]
async fn test_batch_ocr_message() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/normalizer/normalize/batch-ocr"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "succeeded": 2,
      "total": 3,
      "results": []
    })))
    .mount(&server)
    .await;

  let (wb, mut rx) = workbench(&server, quick_config(0));
  let request = workbench::api::types::BatchOcrRequest {
    document_ids: vec!["a".into(), "b".into(), "c".into()],
  };
  wb.normalize_batch_ocr(&request).await.unwrap();
  assert_eq!(rx.try_recv().unwrap().message, "Batch complete: 2/3 succeeded");
}

#[tokio::test]
async fn test_scan_job_poller_stops_when_done() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/v1/scan/job-1"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "job_id": "job-1",
      "status": "done",
      "result": { "gtin": "00012345678905" }
    })))
    .expect(1)
    .mount(&server)
    .await;

  let (wb, _rx) = workbench(&server, quick_config(0));
  let mut poller = wb.poll_scan_job("job-1");
  let snapshot = poller.finished().await;

  assert_eq!(snapshot.fetches, 1);
  let job = snapshot.entry.data().unwrap();
  assert_eq!(job.status, JobStatus::Done);
  assert!(poller.is_finished());
}
