//! Client-side data layer for the review workbench: a typed backend client,
//! a keyed query cache with coalescing and invalidation, mutations with
//! notifications, and pollers for long-running jobs.

pub mod api;
pub mod config;
pub mod logging;
pub mod notify;
pub mod prefs;
pub mod query;
pub mod resources;

pub use resources::Workbench;
