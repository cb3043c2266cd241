//! Normalized error shape for everything that goes wrong talking to the backend.

use std::fmt;

/// Which part of the request cycle failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
  /// Network unreachable, connection reset, timeout
  Transport,
  /// Backend answered with a non-2xx status
  Http,
  /// Response body did not match the expected contract
  Parse,
  /// User input rejected locally, no request was sent
  Validation,
  /// Request was cancelled before it settled
  Cancelled,
}

impl fmt::Display for RemoteErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      RemoteErrorKind::Transport => "transport error",
      RemoteErrorKind::Http => "http error",
      RemoteErrorKind::Parse => "parse error",
      RemoteErrorKind::Validation => "validation error",
      RemoteErrorKind::Cancelled => "cancelled",
    };
    f.write_str(label)
  }
}

/// Error returned by the remote client, the query cache and the mutation executor.
///
/// `message` is safe to show to a user. `cause` carries the underlying
/// transport/parse detail for logs. The type is `Clone` so that one failed
/// in-flight request can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
  pub kind: RemoteErrorKind,
  pub message: String,
  pub status: Option<u16>,
  pub cause: Option<String>,
}

impl RemoteError {
  pub fn transport(message: impl Into<String>, cause: impl fmt::Display) -> Self {
    Self {
      kind: RemoteErrorKind::Transport,
      message: message.into(),
      status: None,
      cause: Some(cause.to_string()),
    }
  }

  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self {
      kind: RemoteErrorKind::Http,
      message: message.into(),
      status: Some(status),
      cause: None,
    }
  }

  pub fn parse(message: impl Into<String>, cause: impl fmt::Display) -> Self {
    Self {
      kind: RemoteErrorKind::Parse,
      message: message.into(),
      status: None,
      cause: Some(cause.to_string()),
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self {
      kind: RemoteErrorKind::Validation,
      message: message.into(),
      status: None,
      cause: None,
    }
  }

  pub fn cancelled() -> Self {
    Self {
      kind: RemoteErrorKind::Cancelled,
      message: "Request was cancelled".to_string(),
      status: None,
      cause: None,
    }
  }

  /// Transport and HTTP failures may succeed on a second try; malformed
  /// bodies, rejected input and cancellations never will.
  pub fn is_retryable(&self) -> bool {
    matches!(self.kind, RemoteErrorKind::Transport | RemoteErrorKind::Http)
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      return RemoteError::parse("Unexpected response from server", &err);
    }
    if let Some(status) = err.status() {
      return RemoteError::http(status.as_u16(), format!("Request failed with status {}", status));
    }
    let message = if err.is_timeout() {
      "Request timed out"
    } else if err.is_connect() {
      "Could not reach the server"
    } else {
      "Network error"
    };
    RemoteError::transport(message, &err)
  }
}

impl From<serde_json::Error> for RemoteError {
  fn from(err: serde_json::Error) -> Self {
    RemoteError::parse("Unexpected response from server", &err)
  }
}
