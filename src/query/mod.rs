//! Query/mutation layer between views and the backend client.
//!
//! Inspired by TanStack Query:
//! - `QueryCache` owns every cached entry, keyed by structural `QueryKey`s
//! - reads are read-through with a stale time, and concurrent reads of one
//!   key share a single request
//! - every request carries a per-key generation so late answers to superseded
//!   requests are dropped
//! - `MutationExecutor` runs writes, invalidates key prefixes on success and
//!   reports the outcome through a `Notifier`
//! - `Poller` refetches a key on a fixed or data-driven interval

mod cache;
mod key;
mod mutation;
mod observer;
mod poll;
mod state;

pub use cache::{QueryCache, QueryCacheConfig};
pub use key::{KeyParams, KeyPart, QueryKey};
pub use mutation::{Mutation, MutationExecutor};
pub use observer::Query;
pub use poll::{PollDecision, PollEvent, PollInterval, PollPhase, PollSnapshot, Poller};
pub use state::{CacheEntry, QueryOptions, QueryStatus, RetryPolicy};
