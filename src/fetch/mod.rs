//! Self-rescheduling fetch loop.
//!
//! A [`FetchScheduler`] keeps one url fresh: it serves the cache while it is
//! fresh, goes to the network otherwise, retries failures a bounded number of
//! times and then cools down before trying again.

mod policy;
mod scheduler;
#[cfg(test)]
pub(crate) mod testing;

pub use policy::{decide, refresh_interval, Decision};
pub use scheduler::FetchScheduler;

use crate::cache::CachedResponse;
use crate::error::FetchError;

/// A response handed to the data callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
  pub response: CachedResponse,
  /// Served from the cache rather than the network
  pub is_cached: bool,
  /// Probe result, set only when stale data is served after a failure
  pub is_offline: Option<bool>,
}

/// Receives what the scheduler produces.
pub trait FetchHandler: Send + Sync {
  fn process_data(&self, delivery: Delivery);

  /// Called once per failure streak, when the retry budget is spent.
  fn process_error(&self, _error: &FetchError) {}
}
