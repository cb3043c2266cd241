use crate::api::endpoint::Endpoint;
use crate::api::error::RemoteError;
use crate::config::Config;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A file attached to a multipart upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
  pub field: String,
  pub filename: String,
  pub bytes: Vec<u8>,
  pub mime: Option<String>,
}

impl FileUpload {
  pub fn new(field: impl Into<String>, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
    Self {
      field: field.into(),
      filename: filename.into(),
      bytes,
      mime: None,
    }
  }

  pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
    self.mime = Some(mime.into());
    self
  }
}

/// Path, query and body values for one request.
#[derive(Debug, Clone, Default)]
pub struct Params {
  pub path: Vec<String>,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub file: Option<FileUpload>,
  /// Set when `json` could not serialize its body
  body_error: Option<String>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn segment(mut self, value: impl ToString) -> Self {
    self.path.push(value.to_string());
    self
  }

  pub fn query(mut self, name: &str, value: impl ToString) -> Self {
    self.query.push((name.to_string(), value.to_string()));
    self
  }

  /// Serialize a request body. Serialization failures surface as a parse error
  /// when the request is sent.
  pub fn json<B: Serialize>(mut self, body: &B) -> Self {
    match serde_json::to_value(body) {
      Ok(value) => {
        self.body = Some(value);
        self.body_error = None;
      }
      Err(e) => {
        self.body = None;
        self.body_error = Some(e.to_string());
      }
    }
    self
  }

  pub fn file(mut self, file: FileUpload) -> Self {
    self.file = Some(file);
    self
  }
}

/// HTTP client for the review backend.
///
/// Performs no caching and no retries; both belong to the query layer.
#[derive(Clone)]
pub struct ApiClient {
  client: reqwest::Client,
  base_url: Url,
}

impl ApiClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    Self::with_token(
      &config.api.url,
      Duration::from_millis(config.api.timeout_ms),
      Config::get_api_token(),
    )
  }

  /// Build a client without a config file (used by tests and embedders).
  pub fn with_token(
    base_url: &str,
    timeout: Duration,
    token: Option<String>,
  ) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url '{}': {}", base_url, e))?;

    let mut headers = HeaderMap::new();
    if let Some(token) = token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Call a registered endpoint and parse the JSON response.
  pub async fn fetch<T: DeserializeOwned>(
    &self,
    endpoint: Endpoint,
    params: Params,
  ) -> Result<T, RemoteError> {
    if let Some(cause) = &params.body_error {
      return Err(RemoteError::parse("Request body could not be serialized", cause));
    }
    let path = endpoint.render_path(&params.path).ok_or_else(|| {
      RemoteError::validation(format!(
        "Wrong number of path parameters for {}",
        endpoint.path_template()
      ))
    })?;
    let url = self
      .base_url
      .join(&path)
      .map_err(|e| RemoteError::validation(format!("Invalid request path {}: {}", path, e)))?;

    debug!(method = %endpoint.method(), %url, "request");

    let mut request = self.client.request(endpoint.method(), url);
    if !params.query.is_empty() {
      request = request.query(&params.query);
    }
    if let Some(file) = params.file {
      let mut part = Part::bytes(file.bytes).file_name(file.filename);
      if let Some(mime) = file.mime {
        part = part
          .mime_str(&mime)
          .map_err(|e| RemoteError::validation(format!("Invalid content type {}: {}", mime, e)))?;
      }
      request = request.multipart(Form::new().part(file.field, part));
    } else if let Some(body) = params.body {
      request = request.json(&body);
    }

    let response = request.send().await?;
    parse_response(response).await
  }
}

async fn parse_response<T: DeserializeOwned>(
  response: reqwest::Response,
) -> Result<T, RemoteError> {
  let status = response.status();
  let bytes = response.bytes().await?;

  if !status.is_success() {
    let message = error_message(&bytes)
      .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
    return Err(RemoteError::http(status.as_u16(), message));
  }

  Ok(serde_json::from_slice(&bytes)?)
}

/// Pull a human readable message out of a backend error body.
///
/// The backend reports errors as `{"detail": ...}`, `{"message": ...}` or
/// `{"error": ...}`; anything else falls back to the status line.
fn error_message(body: &[u8]) -> Option<String> {
  let value: Value = serde_json::from_slice(body).ok()?;
  ["detail", "message", "error"]
    .iter()
    .find_map(|field| match value.get(field)? {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Null => None,
      other => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_message_fields() {
    assert_eq!(
      error_message(br#"{"detail": "Job not found"}"#),
      Some("Job not found".to_string())
    );
    assert_eq!(
      error_message(br#"{"message": "bad input"}"#),
      Some("bad input".to_string())
    );
    assert_eq!(error_message(b"<html>oops</html>"), None);
    assert_eq!(error_message(br#"{"status": "error"}"#), None);
  }

  #[test]
  fn test_params_builder() {
    let params = Params::new()
      .segment("job-1")
      .query("limit", 20)
      .json(&serde_json::json!({ "text": "milk" }));
    assert_eq!(params.path, vec!["job-1".to_string()]);
    assert_eq!(params.query, vec![("limit".to_string(), "20".to_string())]);
    assert!(params.body.is_some());
  }

  #[tokio::test]
  async fn test_unserializable_body_is_parse_error() {
    let mut body = std::collections::BTreeMap::new();
    body.insert(vec![1u8], "not a string key");
    let params = Params::new().json(&body);
    assert!(params.body.is_none());

    // never reaches the network
    let client = ApiClient::with_token("http://127.0.0.1:9", Duration::from_secs(1), None).unwrap();
    let err = client
      .fetch::<Value>(Endpoint::Normalize, params)
      .await
      .unwrap_err();
    assert_eq!(err.kind, crate::api::RemoteErrorKind::Parse);
    assert_eq!(err.message, "Request body could not be serialized");
  }
}
