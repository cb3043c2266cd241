//! Process-wide, in-memory query cache.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::key::QueryKey;
use super::state::{CacheEntry, QueryOptions, QueryStatus, RetryPolicy};
use crate::api::RemoteError;

type AnyData = Arc<dyn Any + Send + Sync>;

/// Settles when the request finishes or is aborted.
type FetchFuture = Shared<BoxFuture<'static, ()>>;

/// Defaults applied to every query unless its options override them.
#[derive(Debug, Clone, Copy)]
pub struct QueryCacheConfig {
  pub read_retry: RetryPolicy,
  /// Entries unused for this long (and not fetching) are dropped by `collect_garbage`
  pub gc_time: Duration,
}

impl Default for QueryCacheConfig {
  fn default() -> Self {
    Self {
      read_retry: RetryPolicy::new(3),
      gc_time: Duration::from_secs(300),
    }
  }
}

struct InFlight {
  generation: u64,
  future: FetchFuture,
  abort: AbortHandle,
  /// Callers currently awaiting `future`
  waiters: usize,
}

/// One caller's interest in an in-flight request.
///
/// Dropping the last waiter of a request cancels it: whoever asked for it has
/// gone away, so its result must not land.
struct Waiter {
  cache: QueryCache,
  key: QueryKey,
  generation: u64,
}

impl Drop for Waiter {
  fn drop(&mut self) {
    self.cache.release(&self.key, self.generation);
  }
}

/// Everything the cache knows about one key.
///
/// Generations: every request gets `issued + 1`. A result is written only if
/// its generation is newer than both `applied` (the last written result) and
/// `discard_through` (raised by cancellation).
struct Slot {
  status: QueryStatus,
  data: Option<AnyData>,
  error: Option<RemoteError>,
  fetched_at: Option<Instant>,
  issued: u64,
  applied: u64,
  discard_through: u64,
  /// Results up to this generation predate the last invalidation
  invalidated_through: Option<u64>,
  in_flight: Option<InFlight>,
  last_used: Instant,
}

impl Slot {
  fn new(now: Instant) -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      issued: 0,
      applied: 0,
      discard_through: 0,
      invalidated_through: None,
      in_flight: None,
      last_used: now,
    }
  }

  fn is_invalidated(&self) -> bool {
    self
      .invalidated_through
      .map(|generation| self.applied <= generation)
      .unwrap_or(false)
  }

  /// Stale at exactly `stale_time` old, not one tick later.
  fn is_stale(&self, now: Instant, stale_time: Duration) -> bool {
    if self.data.is_none() || self.is_invalidated() {
      return true;
    }
    self
      .fetched_at
      .map(|t| now.saturating_duration_since(t) >= stale_time)
      .unwrap_or(true)
  }

  fn snapshot<T: Send + Sync + 'static>(
    &self,
    key: &QueryKey,
    now: Instant,
    stale_time: Duration,
  ) -> CacheEntry<T> {
    let data = match self.data.clone().map(|d| d.downcast::<T>()) {
      Some(Ok(data)) => Some(data),
      Some(Err(_)) => {
        warn!(%key, "cached data has a different type than requested");
        None
      }
      None => None,
    };

    CacheEntry {
      key: key.clone(),
      status: self.status,
      data,
      error: self.error.clone(),
      fetched_at: self.fetched_at,
      is_fetching: self.in_flight.is_some(),
      is_stale: self.is_stale(now, stale_time),
    }
  }
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Slot>>,
  config: QueryCacheConfig,
}

/// Keyed store shared by every consumer in the process.
///
/// Created once at startup and passed explicitly to whoever needs it; clones
/// share the same entries. At most one entry exists per key, and concurrent
/// reads of a stale or missing key share a single request.
///
/// Fetches run as spawned tokio tasks, so a fetch keeps going if the caller
/// that started it stops waiting. Use [`QueryCache::cancel`] to stop one.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl QueryCache {
  pub fn new(config: QueryCacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        config,
      }),
    }
  }

  pub fn config(&self) -> &QueryCacheConfig {
    &self.inner.config
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    // Slots are only mutated in short synchronous sections, so a panic
    // elsewhere can't leave one half-written.
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// Read-through lookup.
  ///
  /// Fresh data is returned without a request. Stale or missing data is
  /// fetched (or an in-flight fetch for the key is joined) and the updated
  /// entry returned once it settles. Disabled queries never fetch.
  pub async fn read<T, F, Fut>(
    &self,
    key: &QueryKey,
    options: &QueryOptions<T>,
    fetcher: F,
  ) -> CacheEntry<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
  {
    if !options.enabled {
      return self.peek(key, options.stale_time);
    }

    let pending = {
      let mut entries = self.lock();
      let now = Instant::now();
      let slot = entries
        .entry(key.clone())
        .or_insert_with(|| Slot::new(now));
      slot.last_used = now;

      if !slot.is_stale(now, options.stale_time) {
        trace!(%key, "cache hit");
        None
      } else {
        if let Some(in_flight) = &slot.in_flight {
          debug!(%key, generation = in_flight.generation, "joining in-flight fetch");
        } else {
          self.start_fetch(key, slot, options, fetcher);
        }
        self.join(key, slot)
      }
    };

    if let Some((pending, _waiter)) = pending {
      pending.await;
    }
    self.peek(key, options.stale_time)
  }

  /// Fetch regardless of freshness, joining a request that is already in
  /// flight for the key. Used by pollers and explicit refresh actions.
  pub async fn refetch<T, F, Fut>(
    &self,
    key: &QueryKey,
    options: &QueryOptions<T>,
    fetcher: F,
  ) -> CacheEntry<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
  {
    if !options.enabled {
      return self.peek(key, options.stale_time);
    }

    let pending = {
      let mut entries = self.lock();
      let now = Instant::now();
      let slot = entries
        .entry(key.clone())
        .or_insert_with(|| Slot::new(now));
      slot.last_used = now;

      if slot.in_flight.is_none() {
        self.start_fetch(key, slot, options, fetcher);
      }
      self.join(key, slot)
    };

    if let Some((pending, _waiter)) = pending {
      pending.await;
    }
    self.peek(key, options.stale_time)
  }

  /// Snapshot an entry without fetching. Missing keys read as idle.
  pub fn peek<T: Send + Sync + 'static>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
  ) -> CacheEntry<T> {
    let entries = self.lock();
    match entries.get(key) {
      Some(slot) => slot.snapshot(key, Instant::now(), stale_time),
      None => CacheEntry::idle(key.clone()),
    }
  }

  /// The cached data for a key, if any (and of the right type).
  pub fn get_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
    self.peek::<T>(key, Duration::MAX).data
  }

  /// Write data directly, as if a fetch had just returned it.
  ///
  /// Requests issued before this call can no longer overwrite it.
  pub fn set_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
    let mut entries = self.lock();
    let now = Instant::now();
    let slot = entries
      .entry(key.clone())
      .or_insert_with(|| Slot::new(now));

    slot.issued += 1;
    slot.applied = slot.issued;
    slot.status = QueryStatus::Success;
    slot.data = Some(Arc::new(data));
    slot.error = None;
    slot.fetched_at = Some(now);
    slot.last_used = now;
  }

  /// Mark every entry whose key starts with `prefix` as stale.
  ///
  /// The next read of those keys issues a new request even if one is already
  /// in flight, since that request may have been answered with pre-invalidation
  /// data. Returns how many entries were marked.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    let mut entries = self.lock();
    let mut count = 0;

    for (key, slot) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
      slot.invalidated_through = Some(slot.issued);
      // The old request may still land, but it no longer counts as fresh
      // and newer requests won't join it.
      slot.in_flight = None;
      count += 1;
      debug!(%key, "invalidated");
    }

    count
  }

  /// Stop any in-flight request for `key` without touching the entry, no
  /// matter who else is waiting on it.
  ///
  /// Consumers that merely lose interest should drop their read instead; the
  /// request is then cancelled only once nobody is waiting on it.
  pub fn cancel(&self, key: &QueryKey) {
    let mut entries = self.lock();
    if let Some(slot) = entries.get_mut(key) {
      cancel_slot(key, slot);
    }
  }

  /// Drop an entry, cancelling its request.
  pub fn remove(&self, key: &QueryKey) {
    self.cancel(key);
    self.lock().remove(key);
  }

  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Drop entries that have been unused for `gc_time` and aren't fetching.
  pub fn collect_garbage(&self) -> usize {
    let gc_time = self.inner.config.gc_time;
    let now = Instant::now();
    let mut entries = self.lock();
    let before = entries.len();

    entries.retain(|key, slot| {
      let idle = now.saturating_duration_since(slot.last_used);
      let keep = slot.in_flight.is_some() || idle < gc_time;
      if !keep {
        trace!(%key, "collected");
      }
      keep
    });

    before - entries.len()
  }

  /// Run `collect_garbage` every `every` until the handle is aborted.
  pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
    let cache = self.clone();
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let removed = cache.collect_garbage();
        if removed > 0 {
          debug!(removed, "query cache garbage collected");
        }
      }
    })
  }

  /// Spawn the request for `slot` and record it as in flight.
  fn start_fetch<T, F, Fut>(
    &self,
    key: &QueryKey,
    slot: &mut Slot,
    options: &QueryOptions<T>,
    fetcher: F,
  ) where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
  {
    slot.issued += 1;
    let generation = slot.issued;
    if slot.data.is_none() && slot.status != QueryStatus::Error {
      slot.status = QueryStatus::Loading;
    }

    let retry = options.retry.unwrap_or(self.inner.config.read_retry);
    let cache = self.clone();
    let task_key = key.clone();

    debug!(%key, generation, "fetch start");
    let handle = tokio::spawn(async move {
      let attempt = AssertUnwindSafe(retry.run(&task_key, fetcher))
        .catch_unwind()
        .await;
      let result = match attempt {
        Ok(result) => result,
        Err(_) => {
          warn!(key = %task_key, generation, "fetcher panicked");
          Err(RemoteError::transport("Request failed unexpectedly", "fetcher panicked"))
        }
      };
      cache.apply(&task_key, generation, result.map(|data| Arc::new(data) as AnyData));
    });

    let abort = handle.abort_handle();
    let future = async move {
      // Only an abort gets here as a JoinError, and whoever aborted the task
      // already took it out of the slot.
      let _ = handle.await;
    }
    .boxed()
    .shared();

    slot.in_flight = Some(InFlight {
      generation,
      future,
      abort,
      waiters: 0,
    });
  }

  /// Register a waiter on the slot's in-flight request.
  fn join(&self, key: &QueryKey, slot: &mut Slot) -> Option<(FetchFuture, Waiter)> {
    let in_flight = slot.in_flight.as_mut()?;
    in_flight.waiters += 1;
    let waiter = Waiter {
      cache: self.clone(),
      key: key.clone(),
      generation: in_flight.generation,
    };
    Some((in_flight.future.clone(), waiter))
  }

  /// A waiter of request `generation` went away.
  fn release(&self, key: &QueryKey, generation: u64) {
    let mut entries = self.lock();
    let Some(slot) = entries.get_mut(key) else {
      return;
    };
    let Some(in_flight) = slot
      .in_flight
      .as_mut()
      .filter(|f| f.generation == generation)
    else {
      // Already settled, or detached by an invalidation
      return;
    };

    in_flight.waiters = in_flight.waiters.saturating_sub(1);
    if in_flight.waiters == 0 {
      debug!(%key, generation, "no one waiting on fetch");
      cancel_slot(key, slot);
    }
  }

  /// Record the outcome of request `generation` unless something newer won.
  fn apply(&self, key: &QueryKey, generation: u64, result: Result<AnyData, RemoteError>) {
    let mut entries = self.lock();
    let Some(slot) = entries.get_mut(key) else {
      debug!(%key, generation, "entry removed before fetch finished");
      return;
    };

    if slot
      .in_flight
      .as_ref()
      .map(|f| f.generation == generation)
      .unwrap_or(false)
    {
      slot.in_flight = None;
    }

    if generation <= slot.discard_through || generation <= slot.applied {
      debug!(%key, generation, applied = slot.applied, "discarding superseded result");
      return;
    }

    slot.applied = generation;
    match result {
      Ok(data) => {
        debug!(%key, generation, "fetch success");
        slot.status = QueryStatus::Success;
        slot.data = Some(data);
        slot.error = None;
        slot.fetched_at = Some(Instant::now());
      }
      Err(err) => {
        warn!(%key, generation, error = %err, "fetch failed");
        slot.status = QueryStatus::Error;
        slot.error = Some(err);
      }
    }
  }
}

fn cancel_slot(key: &QueryKey, slot: &mut Slot) {
  slot.discard_through = slot.issued;
  if let Some(in_flight) = slot.in_flight.take() {
    in_flight.abort.abort();
    debug!(%key, generation = in_flight.generation, "cancelled fetch");
  }
  if slot.status == QueryStatus::Loading {
    slot.status = QueryStatus::Idle;
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(QueryCacheConfig::default())
  }
}
