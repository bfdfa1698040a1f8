//! Storage backend contract and one-time backend selection.

use color_eyre::Result;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use super::kv::{FileKvStore, KvBackend};
use super::response::CachedResponse;
use super::sqlite::SqliteBackend;
use crate::config::BackendKind;
use crate::logger::{EventLogger, Severity, ONCE_PER_DAY};

/// Key/response storage bound to one namespace.
///
/// Each operation is atomic per key. Backends store responses as given and
/// never expire anything on their own.
pub trait CacheBackend: Send + Sync {
  /// Which implementation this is.
  fn kind(&self) -> BackendKind;

  /// All keys in the namespace.
  fn keys(&self) -> Result<Vec<String>>;

  /// The stored response for `key`.
  fn match_key(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Store `response` under `key`, replacing anything already there.
  fn put(&self, key: &str, response: &CachedResponse) -> Result<()>;

  /// Remove `key`. Returns whether something was removed.
  fn delete(&self, key: &str) -> Result<bool>;
}

/// Choose the backend for a namespace once, at initialization.
///
/// `Auto` prefers SQLite and falls back to the key/value store. Returns `None`
/// when nothing usable could be opened, which disables the cache.
pub fn select_backend(
  kind: BackendKind,
  data_dir: &Path,
  namespace: &str,
  logger: &EventLogger,
) -> Option<Arc<dyn CacheBackend>> {
  let sqlite = || match SqliteBackend::open(&data_dir.join("cache.db"), namespace) {
    Ok(backend) => Some(Arc::new(backend) as Arc<dyn CacheBackend>),
    Err(e) => {
      logger.log_throttled(
        Severity::Warning,
        "cache API not available",
        Some(json!({ "namespace": namespace })),
        Some(json!({ "error": format!("{:#}", e) })),
        ONCE_PER_DAY,
      );
      None
    }
  };

  let kv = || match FileKvStore::open(&data_dir.join("kv")) {
    Ok(store) => Some(Arc::new(KvBackend::new(Arc::new(store), namespace)) as Arc<dyn CacheBackend>),
    Err(e) => {
      logger.log_throttled(
        Severity::Warning,
        "fallback storage not available",
        Some(json!({ "namespace": namespace })),
        Some(json!({ "error": format!("{:#}", e) })),
        ONCE_PER_DAY,
      );
      None
    }
  };

  let selected = match kind {
    BackendKind::Auto => sqlite().or_else(kv),
    BackendKind::Sqlite => sqlite(),
    BackendKind::Kv => kv(),
    BackendKind::None => None,
  };

  match &selected {
    Some(backend) => tracing::debug!(namespace, backend = ?backend.kind(), "cache backend selected"),
    None => tracing::debug!(namespace, "cache disabled"),
  }

  selected
}
