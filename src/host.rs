//! Host capabilities handed to the engine at construction.

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::logger::{EventLogger, LoggerIdentity};
use crate::probe::ConnectivityProbe;

/// Wall-clock source for freshness math and log throttling.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Wall clock that advances with tokio's clock.
///
/// Under `tokio::time::pause()` it moves only when tokio time moves, which
/// keeps cache ages and scheduler timers on the same timeline.
#[derive(Debug, Clone)]
pub struct TokioClock {
  origin_wall: DateTime<Utc>,
  origin: tokio::time::Instant,
}

impl TokioClock {
  pub fn starting_at(origin_wall: DateTime<Utc>) -> Self {
    Self {
      origin_wall,
      origin: tokio::time::Instant::now(),
    }
  }
}

impl Clock for TokioClock {
  fn now(&self) -> DateTime<Utc> {
    let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
    self.origin_wall + elapsed
  }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self { now: Mutex::new(now) }
  }

  /// 2024-01-01T00:00:00Z
  pub fn epoch() -> Self {
    Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default())
  }

  pub fn set(&self, now: DateTime<Utc>) {
    *self.now.lock() = now;
  }

  pub fn advance(&self, by: Duration) {
    let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    *self.now.lock() += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

/// Everything the engine needs from its environment.
#[derive(Clone)]
pub struct HostContext {
  /// Preview/editor mode: all logging is suppressed
  pub preview: bool,
  pub clock: Arc<dyn Clock>,
  pub probe: Arc<dyn ConnectivityProbe>,
}

impl HostContext {
  pub fn new(clock: Arc<dyn Clock>, probe: Arc<dyn ConnectivityProbe>) -> Self {
    Self {
      preview: false,
      clock,
      probe,
    }
  }

  pub fn with_preview(mut self, preview: bool) -> Self {
    self.preview = preview;
    self
  }

  pub fn logger(&self, identity: LoggerIdentity) -> EventLogger {
    EventLogger::new(identity, self.preview, self.clock.clone())
  }
}

impl std::fmt::Debug for HostContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HostContext")
      .field("preview", &self.preview)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances_only_on_request() {
    let clock = ManualClock::epoch();
    let start = clock.now();

    assert_eq!(clock.now(), start);

    clock.advance(Duration::from_millis(1500));
    assert_eq!((clock.now() - start).num_milliseconds(), 1500);
  }

  #[tokio::test(start_paused = true)]
  async fn test_tokio_clock_follows_paused_time() {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let clock = TokioClock::starting_at(start);

    tokio::time::sleep(Duration::from_secs(90)).await;

    assert_eq!((clock.now() - start).num_seconds(), 90);
  }
}
