//! Persisted "last checked" timestamps per resource.
//!
//! Used to avoid revalidating a resource more often than a minimum interval.
//! Stored as one key/value entry holding a JSON array of
//! `[resource, http-date]` pairs.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{http_date, parse_http_date, KvStore};
use crate::logger::{EventLogger, Severity, ONCE_PER_DAY};

pub const LAST_REQUESTED_KEY: &str = "refetch_last_requested";

pub struct LastRequestedStorage {
  store: Arc<dyn KvStore>,
  supported: bool,
  logger: EventLogger,
}

impl LastRequestedStorage {
  /// Wrap `store`, checking once whether it accepts writes.
  pub fn new(store: Arc<dyn KvStore>, logger: EventLogger) -> Self {
    let supported = Self::is_supported(store.as_ref());
    if !supported {
      logger.log(
        Severity::Warning,
        "last-requested storage not available",
        Some(json!({ "impact": "resources will always be revalidated" })),
        None,
      );
    }

    Self {
      store,
      supported,
      logger,
    }
  }

  fn is_supported(store: &dyn KvStore) -> bool {
    let test = "test";
    store.set_item(test, test).is_ok() && store.remove_item(test).is_ok()
  }

  /// Record that `resource` was checked at `at`. No-op when unsupported.
  pub fn save(&self, resource: &str, at: DateTime<Utc>) {
    if !self.supported || resource.is_empty() {
      return;
    }

    let mut map = self.load_map();
    map.insert(resource.to_string(), http_date(at));

    let pairs: Vec<(&String, &String)> = map.iter().collect();
    let result = serde_json::to_string(&pairs)
      .map_err(|e| e.to_string())
      .and_then(|json| {
        self
          .store
          .set_item(LAST_REQUESTED_KEY, &json)
          .map_err(|e| format!("{:#}", e))
      });

    if let Err(e) = result {
      self.logger.log(
        Severity::Warning,
        "failed to save last-requested timestamp",
        Some(json!({ "resource": resource })),
        Some(json!({ "error": e })),
      );
    }
  }

  /// When `resource` was last checked, if known.
  pub fn timestamp(&self, resource: &str) -> Option<DateTime<Utc>> {
    if !self.supported || resource.is_empty() {
      return None;
    }

    self
      .load_map()
      .get(resource)
      .and_then(|value| parse_http_date(value))
  }

  fn load_map(&self) -> BTreeMap<String, String> {
    let raw = match self.store.get_item(LAST_REQUESTED_KEY) {
      Ok(Some(raw)) => raw,
      Ok(None) => return BTreeMap::new(),
      Err(e) => {
        self.logger.log_throttled(
          Severity::Warning,
          "failed to read last-requested timestamps",
          None,
          Some(json!({ "error": format!("{:#}", e) })),
          ONCE_PER_DAY,
        );
        return BTreeMap::new();
      }
    };

    match serde_json::from_str::<Vec<(String, String)>>(&raw) {
      Ok(pairs) => pairs.into_iter().collect(),
      Err(e) => {
        self.logger.log(
          Severity::Warning,
          "corrupt last-requested timestamps, starting over",
          None,
          Some(json!({ "error": e.to_string() })),
        );
        BTreeMap::new()
      }
    }
  }
}
