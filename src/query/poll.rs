//! Interval polling on top of the query cache.
//!
//! A poller walks an explicit state machine per key:
//!
//! ```text
//! Idle --Start--> Fetching --Settled(Continue(d))--> Waiting(d) --TimerFired--> Fetching
//!                     |
//!                     +--Settled(Stop)--> Stopped      (Cancel from any phase -> Stopped)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::cache::QueryCache;
use super::key::QueryKey;
use super::state::{CacheEntry, QueryOptions};
use crate::api::RemoteError;

/// What to do after a fetch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
  Continue(Duration),
  Stop,
}

type IntervalFn<T> = Arc<dyn Fn(Option<&T>) -> PollDecision + Send + Sync>;

/// How often to refetch a key.
pub enum PollInterval<T> {
  Fixed(Duration),
  /// Computed from the latest cached value after every fetch
  Dynamic(IntervalFn<T>),
}

impl<T> PollInterval<T> {
  pub fn fixed(every: Duration) -> Self {
    PollInterval::Fixed(every)
  }

  pub fn dynamic<F>(f: F) -> Self
  where
    F: Fn(Option<&T>) -> PollDecision + Send + Sync + 'static,
  {
    PollInterval::Dynamic(Arc::new(f))
  }

  /// Poll every `every` until `is_terminal` holds for the latest data.
  pub fn until<P>(every: Duration, is_terminal: P) -> Self
  where
    P: Fn(&T) -> bool + Send + Sync + 'static,
  {
    Self::dynamic(move |latest| match latest {
      Some(data) if is_terminal(data) => PollDecision::Stop,
      _ => PollDecision::Continue(every),
    })
  }

  pub fn next(&self, latest: Option<&T>) -> PollDecision {
    match self {
      PollInterval::Fixed(every) => PollDecision::Continue(*every),
      PollInterval::Dynamic(f) => f(latest),
    }
  }
}

impl<T> Clone for PollInterval<T> {
  fn clone(&self) -> Self {
    match self {
      PollInterval::Fixed(every) => PollInterval::Fixed(*every),
      PollInterval::Dynamic(f) => PollInterval::Dynamic(Arc::clone(f)),
    }
  }
}

impl<T> fmt::Debug for PollInterval<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PollInterval::Fixed(every) => f.debug_tuple("Fixed").field(every).finish(),
      PollInterval::Dynamic(_) => f.write_str("Dynamic(..)"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
  Idle,
  Fetching,
  Waiting(Duration),
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
  Start,
  Settled(PollDecision),
  TimerFired,
  Cancel,
}

impl PollPhase {
  /// Transition table. Events that don't apply to the current phase leave it
  /// unchanged.
  pub fn on(self, event: PollEvent) -> PollPhase {
    match (self, event) {
      (_, PollEvent::Cancel) => PollPhase::Stopped,
      (PollPhase::Stopped, _) => PollPhase::Stopped,
      (PollPhase::Idle, PollEvent::Start) => PollPhase::Fetching,
      (PollPhase::Fetching, PollEvent::Settled(PollDecision::Continue(every))) => {
        PollPhase::Waiting(every)
      }
      (PollPhase::Fetching, PollEvent::Settled(PollDecision::Stop)) => PollPhase::Stopped,
      (PollPhase::Waiting(_), PollEvent::TimerFired) => PollPhase::Fetching,
      (phase, event) => {
        trace!(?phase, ?event, "ignored poll event");
        phase
      }
    }
  }
}

/// What a poller last observed.
#[derive(Debug)]
pub struct PollSnapshot<T> {
  pub phase: PollPhase,
  pub entry: CacheEntry<T>,
  pub fetches: u32,
}

impl<T> Clone for PollSnapshot<T> {
  fn clone(&self) -> Self {
    Self {
      phase: self.phase,
      entry: self.entry.clone(),
      fetches: self.fetches,
    }
  }
}

/// Background task that keeps one key refreshed.
///
/// Dropping the poller (or calling [`Poller::stop`]) stops the timer and
/// drops its pending read. The key's request is cancelled unless another
/// consumer is still waiting on it.
pub struct Poller<T> {
  key: QueryKey,
  handle: JoinHandle<()>,
  joined: bool,
  rx: watch::Receiver<PollSnapshot<T>>,
}

impl<T: Send + Sync + 'static> Poller<T> {
  /// Start polling `key`. Without `options.poll` the key is fetched once.
  pub fn spawn<F, Fut>(
    cache: &QueryCache,
    key: QueryKey,
    options: QueryOptions<T>,
    fetcher: F,
  ) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
  {
    let (tx, rx) = watch::channel(PollSnapshot {
      phase: PollPhase::Idle,
      entry: cache.peek(&key, options.stale_time),
      fetches: 0,
    });

    let handle = tokio::spawn(run_poll_loop(
      cache.clone(),
      key.clone(),
      options,
      Arc::new(fetcher),
      tx,
    ));

    Self {
      key,
      handle,
      joined: false,
      rx,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn latest(&self) -> PollSnapshot<T> {
    self.rx.borrow().clone()
  }

  /// Wait for the next fetch to settle. Returns `None` once polling stopped.
  pub async fn changed(&mut self) -> Option<PollSnapshot<T>> {
    self.rx.changed().await.ok()?;
    Some(self.rx.borrow_and_update().clone())
  }

  /// Wait for polling to stop on its own (a `Stop` decision).
  pub async fn finished(&mut self) -> PollSnapshot<T> {
    if !self.joined {
      let _ = (&mut self.handle).await;
      self.joined = true;
    }
    self.latest()
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }

  pub fn stop(self) {
    // Drop does the work
  }
}

impl<T> Drop for Poller<T> {
  fn drop(&mut self) {
    if !self.handle.is_finished() {
      debug!(key = %self.key, "stopping poller");
      self.handle.abort();
    }
  }
}

async fn run_poll_loop<T, F, Fut>(
  cache: QueryCache,
  key: QueryKey,
  options: QueryOptions<T>,
  fetcher: Arc<F>,
  tx: watch::Sender<PollSnapshot<T>>,
) where
  T: Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
{
  let interval = options.poll.clone();
  let mut phase = PollPhase::Idle.on(PollEvent::Start);
  let mut fetches = 0u32;

  loop {
    match phase {
      PollPhase::Fetching => {
        let call = {
          let fetcher = Arc::clone(&fetcher);
          move || fetcher()
        };
        // The first round respects whatever fresh data is already cached
        let entry = if fetches == 0 {
          cache.read(&key, &options, call).await
        } else {
          cache.refetch(&key, &options, call).await
        };
        fetches += 1;

        let decision = match &interval {
          Some(interval) => interval.next(entry.data()),
          None => PollDecision::Stop,
        };
        phase = phase.on(PollEvent::Settled(decision));
        trace!(%key, ?phase, fetches, "poll settled");

        tx.send_replace(PollSnapshot {
          phase,
          entry,
          fetches,
        });
      }
      PollPhase::Waiting(every) => {
        tokio::time::sleep(every).await;
        phase = phase.on(PollEvent::TimerFired);
      }
      PollPhase::Stopped => {
        debug!(%key, fetches, "polling stopped");
        return;
      }
      PollPhase::Idle => {
        phase = phase.on(PollEvent::Start);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::query_key;
  use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  enum Status {
    Queued,
    Running,
    Done,
  }

  #[test]
  fn test_phase_transitions() {
    let every = Duration::from_secs(3);
    let phase = PollPhase::Idle.on(PollEvent::Start);
    assert_eq!(phase, PollPhase::Fetching);

    let phase = phase.on(PollEvent::Settled(PollDecision::Continue(every)));
    assert_eq!(phase, PollPhase::Waiting(every));

    let phase = phase.on(PollEvent::TimerFired);
    assert_eq!(phase, PollPhase::Fetching);

    assert_eq!(phase.on(PollEvent::Settled(PollDecision::Stop)), PollPhase::Stopped);
    assert_eq!(PollPhase::Waiting(every).on(PollEvent::Cancel), PollPhase::Stopped);
    assert_eq!(PollPhase::Stopped.on(PollEvent::Start), PollPhase::Stopped);
    // A timer firing mid-fetch is ignored
    assert_eq!(PollPhase::Fetching.on(PollEvent::TimerFired), PollPhase::Fetching);
  }

  #[test]
  fn test_until_interval() {
    let interval = PollInterval::until(Duration::from_secs(3), |s: &Status| *s == Status::Done);
    assert_eq!(interval.next(None), PollDecision::Continue(Duration::from_secs(3)));
    assert_eq!(
      interval.next(Some(&Status::Running)),
      PollDecision::Continue(Duration::from_secs(3))
    );
    assert_eq!(interval.next(Some(&Status::Done)), PollDecision::Stop);
  }

  #[tokio::test(start_paused = true)]
  async fn test_polling_stops_at_terminal_state() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let sequence = [Status::Queued, Status::Running, Status::Done];

    let options = QueryOptions::new().poll(PollInterval::until(
      Duration::from_secs(3),
      |s: &Status| *s == Status::Done,
    ));
    let fetcher = {
      let calls = calls.clone();
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(sequence[n.min(sequence.len() - 1)]) }
      }
    };

    let mut poller = Poller::spawn(&cache, query_key!["scan-v1", "job", "j-1"], options, fetcher);
    let last = poller.finished().await;

    assert_eq!(last.phase, PollPhase::Stopped);
    assert_eq!(last.fetches, 3);
    assert_eq!(last.entry.data(), Some(&Status::Done));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_poller_stops_fetching() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let options = QueryOptions::new().poll(PollInterval::fixed(Duration::from_secs(1)));
    let fetcher = {
      let calls = calls.clone();
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(n) }
      }
    };

    let poller = Poller::spawn(&cache, query_key!["task-queue", "stats"], options, fetcher);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    poller.stop();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_interval_fetches_once() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let fetcher = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok(1u32) }
      }
    };

    let key = query_key!["normalizer", "health"];
    let mut poller = Poller::spawn(&cache, key, QueryOptions::new(), fetcher);
    let last = poller.finished().await;
    assert_eq!(last.fetches, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_poller_leaves_joined_reader_alone() {
    let cache = QueryCache::default();
    let calls = Arc::new(AtomicU32::new(0));
    let key = query_key!["task-queue", "stats"];
    let options = QueryOptions::new().poll(PollInterval::fixed(Duration::from_secs(10)));
    let fetcher = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
          tokio::time::sleep(Duration::from_millis(100)).await;
          Ok(7u32)
        }
      }
    };

    let poller = Poller::spawn(&cache, key.clone(), options, fetcher.clone());
    tokio::time::sleep(Duration::from_millis(5)).await;

    let reader = tokio::spawn({
      let cache = cache.clone();
      let key = key.clone();
      async move { cache.read(&key, &QueryOptions::new(), fetcher).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    drop(poller);

    let entry = reader.await.unwrap();
    assert_eq!(entry.data(), Some(&7));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
