//! Structured event logging on top of `tracing`.
//!
//! Every event carries the identity of the component that produced it. Events
//! can be throttled ("at most once per day") and are dropped entirely when the
//! host runs in preview mode.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::host::Clock;

pub const ONCE_PER_DAY: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Warning,
  Error,
}

/// Who is logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerIdentity {
  pub name: String,
  pub id: String,
  pub version: String,
}

impl Default for LoggerIdentity {
  fn default() -> Self {
    Self {
      name: "refetch".to_string(),
      id: "logger".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

#[derive(Clone)]
pub struct EventLogger {
  identity: Arc<LoggerIdentity>,
  preview: bool,
  clock: Arc<dyn Clock>,
  /// Last emission and window per throttle key, shared by every logger
  /// derived from this one
  throttle: Arc<Mutex<HashMap<String, (DateTime<Utc>, chrono::Duration)>>>,
}

impl EventLogger {
  pub fn new(identity: LoggerIdentity, preview: bool, clock: Arc<dyn Clock>) -> Self {
    Self {
      identity: Arc::new(identity),
      preview,
      clock,
      throttle: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// A logger for another component that shares this one's throttle state.
  pub fn with_identity(&self, identity: LoggerIdentity) -> Self {
    Self {
      identity: Arc::new(identity),
      ..self.clone()
    }
  }

  pub fn identity(&self) -> &LoggerIdentity {
    &self.identity
  }

  pub fn log(&self, severity: Severity, event: &str, details: Option<Value>, extra: Option<Value>) {
    if self.preview {
      return;
    }

    let details = details.map(|d| d.to_string()).unwrap_or_default();
    let extra = extra.map(|e| e.to_string()).unwrap_or_default();
    let id = &self.identity;

    match severity {
      Severity::Info => tracing::info!(
        component = %id.name, component_id = %id.id, version = %id.version,
        details = %details, extra = %extra, "{}", event
      ),
      Severity::Warning => tracing::warn!(
        component = %id.name, component_id = %id.id, version = %id.version,
        details = %details, extra = %extra, "{}", event
      ),
      Severity::Error => tracing::error!(
        component = %id.name, component_id = %id.id, version = %id.version,
        details = %details, extra = %extra, "{}", event
      ),
    }
  }

  /// Log unless the same event with the same details was logged less than
  /// `per` ago. Returns whether the event was emitted.
  pub fn log_throttled(
    &self,
    severity: Severity,
    event: &str,
    details: Option<Value>,
    extra: Option<Value>,
    per: Duration,
  ) -> bool {
    if self.preview {
      return false;
    }

    let key = format!(
      "{}|{}|{}",
      self.identity.name,
      event,
      details.as_ref().map(Value::to_string).unwrap_or_default()
    );
    let now = self.clock.now();
    let per = chrono::Duration::from_std(per).unwrap_or_else(|_| chrono::Duration::days(365 * 100));

    {
      let mut throttle = self.throttle.lock();
      if let Some((last, _)) = throttle.get(&key) {
        if now.signed_duration_since(*last) < per {
          return false;
        }
      }
      // Entries whose window has passed would log again anyway.
      throttle.retain(|_, (last, window)| now.signed_duration_since(*last) < *window);
      throttle.insert(key, (now, per));
    }

    self.log(severity, event, details, extra);
    true
  }
}

impl std::fmt::Debug for EventLogger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EventLogger")
      .field("identity", &self.identity)
      .field("preview", &self.preview)
      .finish_non_exhaustive()
  }
}

/// Run `f` under a subscriber that records INFO and above, returning the output.
#[cfg(test)]
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
  let buf = Arc::new(Mutex::new(Vec::new()));
  let writer = buf.clone();
  let subscriber = tracing_subscriber::fmt()
    .with_writer(move || CaptureWriter(writer.clone()))
    .with_ansi(false)
    .with_max_level(tracing::Level::INFO)
    .finish();

  tracing::subscriber::with_default(subscriber, f);

  let bytes = buf.lock().clone();
  String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl std::io::Write for CaptureWriter {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.lock().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}
