//! Resilient fetching: a tiered response cache paired with a self-rescheduling
//! fetch loop that retries, cools down and falls back to stale data while
//! offline.

pub mod cache;
pub mod component;
pub mod config;
pub mod error;
pub mod fetch;
pub mod files;
pub mod host;
pub mod http;
pub mod last_requested;
pub mod logger;
pub mod probe;

pub use component::{Component, LifecycleObserver, UptimeReport};
pub use config::Config;
pub use error::{CacheError, FetchError, FileError};
pub use fetch::{Delivery, FetchHandler, FetchScheduler};
pub use host::HostContext;
