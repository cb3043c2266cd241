//! Per-view handle onto a cache key.
//!
//! A `Query<T>` is what a screen or command holds while it is interested in a
//! key: it starts fetches through the shared cache without blocking, and the
//! owner picks up results by calling `poll()` from its event loop.
//!
//! # Example
//!
//! ```ignore
//! let api = client.clone();
//! let mut query = Query::new(&cache, query_key!["task-queue", "stats"], move || {
//!   let api = api.clone();
//!   async move { api.fetch(Endpoint::TaskQueueStats, Params::new()).await }
//! })
//! .with_options(QueryOptions::new().stale_time(Duration::from_secs(10)));
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!   // State changed, re-render
//! }
//! ```

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::cache::QueryCache;
use super::key::QueryKey;
use super::state::{CacheEntry, QueryOptions, QueryStatus};
use crate::api::RemoteError;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = dyn Fn() -> BoxFuture<'static, Result<T, RemoteError>> + Send + Sync;

pub struct Query<T> {
  cache: QueryCache,
  key: QueryKey,
  options: QueryOptions<T>,
  fetcher: Arc<FetcherFn<T>>,
  entry: CacheEntry<T>,
  receiver: Option<mpsc::UnboundedReceiver<CacheEntry<T>>>,
  task: Option<AbortHandle>,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a query for `key`. Nothing is fetched until `fetch()`.
  pub fn new<F, Fut>(cache: &QueryCache, key: QueryKey, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
  {
    let options = QueryOptions::new();
    let entry = cache.peek(&key, options.stale_time);
    Self {
      cache: cache.clone(),
      key,
      options,
      fetcher: Arc::new(move || Box::pin(fetcher()) as BoxFuture<'static, _>),
      entry,
      receiver: None,
      task: None,
    }
  }

  pub fn with_options(mut self, options: QueryOptions<T>) -> Self {
    self.options = options;
    self.entry = self.cache.peek(&self.key, self.options.stale_time);
    self
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// The last snapshot this query has seen.
  pub fn entry(&self) -> &CacheEntry<T> {
    &self.entry
  }

  pub fn status(&self) -> QueryStatus {
    self.entry.status
  }

  pub fn data(&self) -> Option<&T> {
    self.entry.data()
  }

  pub fn error(&self) -> Option<&RemoteError> {
    self.entry.error()
  }

  /// True while this query is waiting on the cache.
  pub fn is_loading(&self) -> bool {
    self.receiver.is_some()
  }

  pub fn is_enabled(&self) -> bool {
    self.options.enabled
  }

  /// Check whether the cached data is stale right now.
  pub fn is_stale(&self) -> bool {
    self
      .cache
      .peek::<T>(&self.key, self.options.stale_time)
      .is_stale
  }

  /// Read through the cache if not already waiting on it.
  ///
  /// No-op when disabled or when a previous fetch hasn't been polled yet.
  pub fn fetch(&mut self) {
    if !self.options.enabled || self.receiver.is_some() {
      return;
    }
    self.start(false);
  }

  /// Force a new request, replacing whatever this query was waiting on.
  pub fn refetch(&mut self) {
    if !self.options.enabled {
      return;
    }
    self.abort_wait();
    self.start(true);
  }

  /// Turn the `enabled` gate on or off. Switching it on issues one fetch.
  pub fn set_enabled(&mut self, enabled: bool) {
    let was_enabled = self.options.enabled;
    self.options.enabled = enabled;

    if enabled && !was_enabled {
      self.fetch();
    } else if !enabled && was_enabled && self.receiver.is_some() {
      // Our read is dropped with the task; the request stops if nobody
      // else is waiting on it
      self.abort_wait();
      self.entry = self.cache.peek(&self.key, self.options.stale_time);
    }
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(entry) => {
        self.entry = entry;
        self.receiver = None;
        self.task = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Waiter went away without sending; take whatever the cache has
        self.entry = self.cache.peek(&self.key, self.options.stale_time);
        self.receiver = None;
        self.task = None;
        true
      }
    }
  }

  /// Wait for the pending fetch (if any) and return the resulting snapshot.
  pub async fn settled(&mut self) -> &CacheEntry<T> {
    if let Some(rx) = &mut self.receiver {
      match rx.recv().await {
        Some(entry) => self.entry = entry,
        None => self.entry = self.cache.peek(&self.key, self.options.stale_time),
      }
      self.receiver = None;
      self.task = None;
    }
    &self.entry
  }

  fn start(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let cache = self.cache.clone();
    let key = self.key.clone();
    let options = self.options.clone();
    let fetcher = Arc::clone(&self.fetcher);

    let handle = tokio::spawn(async move {
      let call = move || fetcher();
      let entry = if force {
        cache.refetch(&key, &options, call).await
      } else {
        cache.read(&key, &options, call).await
      };
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(entry);
    });
    self.task = Some(handle.abort_handle());
  }

  fn abort_wait(&mut self) {
    if let Some(task) = self.task.take() {
      task.abort();
    }
    self.receiver = None;
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    // Releases this view's interest in the pending request only
    if let Some(task) = self.task.take() {
      task.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("entry", &self.entry)
      .field("enabled", &self.options.enabled)
      .finish_non_exhaustive()
  }
}
