//! Entry snapshots and per-query options.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use super::key::QueryKey;
use super::poll::PollInterval;
use crate::api::RemoteError;

/// Lifecycle of a cache entry: `Idle -> Loading -> (Success | Error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Nothing fetched yet (or the query is disabled)
  Idle,
  /// First fetch in progress, no data yet
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed after all retries
  Error,
}

/// A read-only snapshot of one cache entry.
///
/// `data` survives failed refetches so callers can keep showing last-good
/// data next to the error.
#[derive(Debug)]
pub struct CacheEntry<T> {
  pub key: QueryKey,
  pub status: QueryStatus,
  pub data: Option<Arc<T>>,
  pub error: Option<RemoteError>,
  pub fetched_at: Option<Instant>,
  /// A request for this key is in flight
  pub is_fetching: bool,
  /// The data is past its stale time or was invalidated
  pub is_stale: bool,
}

// Derive would require T: Clone
impl<T> Clone for CacheEntry<T> {
  fn clone(&self) -> Self {
    Self {
      key: self.key.clone(),
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      is_fetching: self.is_fetching,
      is_stale: self.is_stale,
    }
  }
}

impl<T> CacheEntry<T> {
  pub(crate) fn idle(key: QueryKey) -> Self {
    Self {
      key,
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      is_fetching: false,
      is_stale: true,
    }
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&RemoteError> {
    self.error.as_ref()
  }

  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// Turn the snapshot into a plain result, for callers that don't render
  /// last-good data next to an error.
  pub fn into_result(self) -> Result<Arc<T>, RemoteError> {
    match (self.status, self.data, self.error) {
      (QueryStatus::Error, _, Some(err)) => Err(err),
      (_, Some(data), _) => Ok(data),
      (_, None, Some(err)) => Err(err),
      (_, None, None) => Err(RemoteError::cancelled()),
    }
  }
}

/// How many times, and how far apart, a failed request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries after the first attempt
  pub retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl RetryPolicy {
  pub const fn new(retries: u32) -> Self {
    Self {
      retries,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }

  pub const fn none() -> Self {
    Self::new(0)
  }

  pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
    self.base_delay = base;
    self.max_delay = max;
    self
  }

  /// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped.
  pub fn delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// Call `op` until it succeeds, fails with a non-retryable error, or the
  /// retries run out.
  pub async fn run<T, F, Fut>(
    &self,
    label: &(dyn fmt::Display + Sync),
    op: F,
  ) -> Result<T, RemoteError>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_retryable() && attempt < self.retries => {
          let delay = self.delay(attempt);
          warn!(
            request = %label,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "request failed, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3)
  }
}

/// Options for reading one key.
pub struct QueryOptions<T> {
  /// Data at least this old is stale. Zero means always stale.
  pub stale_time: Duration,
  /// When false no fetch is issued and a missing entry stays idle
  pub enabled: bool,
  /// Overrides the cache's default read retry policy
  pub retry: Option<RetryPolicy>,
  /// Only used by observers and pollers
  pub poll: Option<PollInterval<T>>,
}

impl<T> QueryOptions<T> {
  pub fn new() -> Self {
    Self {
      stale_time: Duration::ZERO,
      enabled: true,
      retry: None,
      poll: None,
    }
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }

  pub fn poll(mut self, poll: PollInterval<T>) -> Self {
    self.poll = Some(poll);
    self
  }
}

impl<T> Default for QueryOptions<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for QueryOptions<T> {
  fn clone(&self) -> Self {
    Self {
      stale_time: self.stale_time,
      enabled: self.enabled,
      retry: self.retry,
      poll: self.poll.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retry_delay_backoff() {
    let policy = RetryPolicy::new(3);
    assert_eq!(policy.delay(0), Duration::from_secs(1));
    assert_eq!(policy.delay(1), Duration::from_secs(2));
    assert_eq!(policy.delay(2), Duration::from_secs(4));
    assert_eq!(policy.delay(10), Duration::from_secs(30));
    assert_eq!(policy.delay(40), Duration::from_secs(30));
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_retries_transport_errors() {
    let calls = std::sync::atomic::AtomicU32::new(0);
    let policy = RetryPolicy::new(3);

    let result = policy
      .run(&"test", || {
        let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
          if n < 3 {
            Err(RemoteError::transport("down", "connection refused"))
          } else {
            Ok(n)
          }
        }
      })
      .await;

    assert_eq!(result, Ok(3));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_gives_up_after_retries() {
    let calls = std::sync::atomic::AtomicU32::new(0);
    let policy = RetryPolicy::new(1);

    let result: Result<(), _> = policy
      .run(&"test", || {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Err(RemoteError::http(502, "bad gateway")) }
      })
      .await;

    assert_eq!(result.unwrap_err().status, Some(502));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_run_never_retries_parse_errors() {
    let calls = std::sync::atomic::AtomicU32::new(0);
    let policy = RetryPolicy::new(3);

    let result: Result<(), _> = policy
      .run(&"test", || {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Err(RemoteError::parse("bad body", "expected `}`")) }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[test]
  fn test_into_result_prefers_error_status() {
    let mut entry: CacheEntry<u32> = CacheEntry::idle(QueryKey::new("x"));
    entry.status = QueryStatus::Error;
    entry.data = Some(Arc::new(1));
    entry.error = Some(RemoteError::http(500, "boom"));
    assert_eq!(entry.into_result().unwrap_err().message, "boom");
  }

  #[test]
  fn test_into_result_data() {
    let mut entry: CacheEntry<u32> = CacheEntry::idle(QueryKey::new("x"));
    entry.status = QueryStatus::Success;
    entry.data = Some(Arc::new(7));
    assert_eq!(*entry.into_result().unwrap(), 7);
  }
}
