//! One-shot writes with cache invalidation and notifications.

use std::future::Future;

use super::cache::QueryCache;
use super::key::QueryKey;
use super::state::RetryPolicy;
use crate::api::RemoteError;
use crate::notify::Notifier;
use tracing::{debug, info, warn};

type MessageFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Description of one write: what it invalidates and what it tells the user.
pub struct Mutation<T> {
  name: String,
  invalidates: Vec<QueryKey>,
  retry: Option<RetryPolicy>,
  success_message: Option<MessageFn<T>>,
  error_title: Option<String>,
  rejected: Option<RemoteError>,
}

impl<T> Mutation<T> {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      invalidates: Vec::new(),
      retry: None,
      success_message: None,
      error_title: None,
      rejected: None,
    }
  }

  /// Mark every key starting with `prefix` stale once the write succeeds.
  pub fn invalidates(mut self, prefix: QueryKey) -> Self {
    self.invalidates.push(prefix);
    self
  }

  pub fn retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = Some(retry);
    self
  }

  /// Success notification text, computed from the response.
  pub fn on_success_message<F>(mut self, f: F) -> Self
  where
    F: Fn(&T) -> String + Send + Sync + 'static,
  {
    self.success_message = Some(Box::new(f));
    self
  }

  /// Prefix for the error notification, e.g. "Upload failed".
  pub fn error_title(mut self, title: impl Into<String>) -> Self {
    self.error_title = Some(title.into());
    self
  }

  /// Local input check. The first failing check wins and no request is sent.
  pub fn require(mut self, ok: bool, message: impl Into<String>) -> Self {
    if !ok && self.rejected.is_none() {
      self.rejected = Some(RemoteError::validation(message));
    }
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn invalidated_keys(&self) -> &[QueryKey] {
    &self.invalidates
  }
}

/// Runs mutations against the remote client and applies their side effects.
///
/// Never panics or raises past its boundary: callers always get a `Result`,
/// and the user always gets a notification.
#[derive(Clone)]
pub struct MutationExecutor {
  cache: QueryCache,
  notifier: Notifier,
  default_retry: RetryPolicy,
}

impl MutationExecutor {
  pub fn new(cache: QueryCache, notifier: Notifier, default_retry: RetryPolicy) -> Self {
    Self {
      cache,
      notifier,
      default_retry,
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  pub fn notifier(&self) -> &Notifier {
    &self.notifier
  }

  /// Perform `op`, then invalidate and notify.
  ///
  /// On failure the cache is left alone and an error notification is raised.
  pub async fn execute<T, F, Fut>(&self, mutation: Mutation<T>, op: F) -> Result<T, RemoteError>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
  {
    let result = match mutation.rejected.clone() {
      Some(err) => Err(err),
      None => {
        let retry = mutation.retry.unwrap_or(self.default_retry);
        retry.run(&mutation.name.as_str(), op).await
      }
    };

    match &result {
      Ok(data) => {
        for prefix in &mutation.invalidates {
          let count = self.cache.invalidate(prefix);
          debug!(mutation = %mutation.name, %prefix, count, "invalidated after mutation");
        }
        let message = match &mutation.success_message {
          Some(f) => f(data),
          None => format!("{} succeeded", mutation.name),
        };
        info!(mutation = %mutation.name, "mutation succeeded");
        self.notifier.success(message);
      }
      Err(err) => {
        let title = mutation
          .error_title
          .clone()
          .unwrap_or_else(|| format!("{} failed", mutation.name));
        warn!(mutation = %mutation.name, kind = %err.kind, error = %err, "mutation failed");
        self.notifier.error(format!("{}: {}", title, err.message));
      }
    }

    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::RemoteErrorKind;
  use crate::notify::{ChannelSink, NotificationLevel};
  use crate::query::state::QueryOptions;
  use crate::query_key;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::sync::mpsc;

  fn executor() -> (MutationExecutor, mpsc::UnboundedReceiver<crate::notify::Notification>) {
    let notifier = Notifier::new();
    let (sink, rx) = ChannelSink::new();
    notifier.subscribe(Arc::new(sink));
    let executor = MutationExecutor::new(QueryCache::default(), notifier, RetryPolicy::new(1));
    (executor, rx)
  }

  async fn warm(cache: &QueryCache, key: &QueryKey) {
    let options = QueryOptions::new().stale_time(Duration::from_secs(600));
    cache.read(key, &options, || async { Ok::<_, RemoteError>(1u32) }).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_invalidates_and_notifies() {
    let (executor, mut rx) = executor();
    let documents = query_key!["documents", 1];
    let benchmark = query_key!["benchmark", "results"];
    warm(executor.cache(), &documents).await;
    warm(executor.cache(), &benchmark).await;

    let mutation = Mutation::new("upload")
      .invalidates(query_key!["documents"])
      .on_success_message(|name: &String| format!("Uploaded {}", name));

    let result = executor
      .execute(mutation, || async { Ok("label.pdf".to_string()) })
      .await;

    assert_eq!(result.unwrap(), "label.pdf");
    let stale = Duration::from_secs(600);
    assert!(executor.cache().peek::<u32>(&documents, stale).is_stale);
    assert!(!executor.cache().peek::<u32>(&benchmark, stale).is_stale);

    let note = rx.try_recv().unwrap();
    assert_eq!(note.level, NotificationLevel::Success);
    assert_eq!(note.message, "Uploaded label.pdf");
  }

  #[tokio::test(start_paused = true)]
  async fn test_each_invalidated_key_refetches_once() {
    let (executor, _rx) = executor();
    let cache = executor.cache().clone();
    let documents = query_key!["documents", 1];
    let corrections = query_key!["corrections", "list"];
    let queue = query_key!["task-queue", "stats"];
    for key in [&documents, &corrections, &queue] {
      warm(&cache, key).await;
    }

    let mutation = Mutation::new("upload")
      .invalidates(query_key!["documents"])
      .invalidates(query_key!["corrections"]);
    executor
      .execute(mutation, || async { Ok::<_, RemoteError>(()) })
      .await
      .unwrap();

    let stale = Duration::from_secs(600);
    assert!(cache.peek::<u32>(&documents, stale).is_stale);
    assert!(cache.peek::<u32>(&corrections, stale).is_stale);
    assert!(!cache.peek::<u32>(&queue, stale).is_stale);

    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().stale_time(stale);
    for key in [&documents, &corrections, &queue] {
      let calls = calls.clone();
      let entry = cache
        .read(key, &options, move || {
          let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
          async move { Ok::<_, RemoteError>(10 + n) }
        })
        .await;
      assert!(!entry.is_stale);
    }

    // documents and corrections went back to the server, the queue stats did not
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get_data::<u32>(&queue).as_deref(), Some(&1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_leaves_cache_alone() {
    let (executor, mut rx) = executor();
    let key = query_key!["task-queue", "stats"];
    warm(executor.cache(), &key).await;

    let calls = AtomicU32::new(0);
    let mutation: Mutation<()> = Mutation::new("cancel job")
      .invalidates(query_key!["task-queue"])
      .error_title("Could not cancel job");

    let result = executor
      .execute(mutation, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(RemoteError::http(409, "Job already finished")) }
      })
      .await;

    assert_eq!(result.unwrap_err().status, Some(409));
    // one attempt plus the single write retry
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!executor.cache().peek::<u32>(&key, Duration::from_secs(600)).is_stale);

    let note = rx.try_recv().unwrap();
    assert_eq!(note.level, NotificationLevel::Error);
    assert_eq!(note.message, "Could not cancel job: Job already finished");
  }

  #[tokio::test]
  async fn test_rejected_input_sends_nothing() {
    let (executor, mut rx) = executor();
    let calls = AtomicU32::new(0);

    let mutation: Mutation<()> = Mutation::new("submit correction")
      .require(false, "Correction must differ from the original text")
      .require(false, "second check");

    let result = executor
      .execute(mutation, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
      })
      .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Validation);
    assert_eq!(err.message, "Correction must differ from the original text");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(rx.try_recv().unwrap().level, NotificationLevel::Error);
  }

  #[tokio::test]
  async fn test_default_success_message() {
    let (executor, mut rx) = executor();
    executor
      .execute(Mutation::new("retry job"), || async { Ok::<_, RemoteError>(()) })
      .await
      .unwrap();
    assert_eq!(rx.try_recv().unwrap().message, "retry job succeeded");
  }
}
