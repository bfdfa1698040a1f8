//! Namespace cache with two freshness windows.
//!
//! Entries are aged from their `date` header. Within `refresh` an entry is
//! fresh; between `refresh` and `expiry` it is stale but still handed back to
//! callers on the miss path so they can serve it while revalidating; past
//! `expiry` it is gone. Backend failures never escape: they read as misses.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::backend::CacheBackend;
use super::response::CachedResponse;
use crate::config::{CacheConfig, Window};
use crate::error::CacheError;
use crate::host::Clock;
use crate::logger::{EventLogger, Severity, ONCE_PER_DAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Fresh,
  Stale,
  Expired,
}

/// Classify an age against the two windows.
///
/// `age == refresh` is still fresh and `age == expiry` is still stale.
pub fn freshness(refresh: Window, expiry: Window, age: Duration) -> Freshness {
  if refresh.admits(age) {
    Freshness::Fresh
  } else if expiry.admits(age) {
    Freshness::Stale
  } else {
    Freshness::Expired
  }
}

/// The miss side of [`TimedCache::fetch_cached`].
///
/// Carries the stale entry when there is one so the caller can still serve it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheMiss {
  pub stale: Option<CachedResponse>,
}

/// How request urls and responses map to cache keys.
///
/// Override when the stored key must differ from the literal url, e.g. to pair
/// an entry with a synthetic id or to survive redirects.
pub trait KeyMapper: Send + Sync {
  fn request_key(&self, url: &str) -> String {
    url.to_string()
  }

  fn response_key(&self, response: &CachedResponse) -> String {
    response.url.clone()
  }
}

/// Keys are urls.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlKeys;

impl KeyMapper for UrlKeys {}

/// Handle to one cache namespace. Cheap to clone and shared by every
/// scheduler working on the same namespace.
#[derive(Clone)]
pub struct TimedCache {
  inner: Arc<Inner>,
}

struct Inner {
  config: CacheConfig,
  backend: Option<Arc<dyn CacheBackend>>,
  keys: Arc<dyn KeyMapper>,
  clock: Arc<dyn Clock>,
  logger: EventLogger,
}

impl TimedCache {
  /// Bind a handle to `config.namespace` and drop expired entries once,
  /// unless the namespace preserves them.
  pub fn open(
    config: CacheConfig,
    backend: Option<Arc<dyn CacheBackend>>,
    clock: Arc<dyn Clock>,
    logger: EventLogger,
  ) -> Self {
    Self::open_with_keys(config, backend, Arc::new(UrlKeys), clock, logger)
  }

  pub fn open_with_keys(
    config: CacheConfig,
    backend: Option<Arc<dyn CacheBackend>>,
    keys: Arc<dyn KeyMapper>,
    clock: Arc<dyn Clock>,
    logger: EventLogger,
  ) -> Self {
    let cache = Self {
      inner: Arc::new(Inner {
        config,
        backend,
        keys,
        clock,
        logger,
      }),
    };

    if !cache.inner.config.preserve_expired {
      let removed = cache.sweep_expired();
      if removed > 0 {
        tracing::debug!(namespace = %cache.namespace(), removed, "expired cache entries removed");
      }
    }

    cache
  }

  pub fn namespace(&self) -> &str {
    &self.inner.config.namespace
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.backend.is_some()
  }

  pub fn request_key(&self, url: &str) -> String {
    self.inner.keys.request_key(url)
  }

  /// Freshness of `entry` at `now`. Entries without a usable date are expired.
  pub fn classify(&self, entry: &CachedResponse, now: DateTime<Utc>) -> Freshness {
    let Some(stored_at) = entry.date() else {
      return Freshness::Expired;
    };

    // A date in the future (clock skew) counts as age zero.
    let age = now.signed_duration_since(stored_at).to_std().unwrap_or(Duration::ZERO);

    freshness(self.inner.config.refresh, self.inner.config.expiry, age)
  }

  /// Raw lookup, no freshness policy.
  pub fn get(&self, key: &str) -> Option<CachedResponse> {
    self.try_get(key).unwrap_or_else(|e| {
      self.read_failed(key, &e);
      None
    })
  }

  /// Fresh entry for `url`, or a miss carrying the stale entry if there is one.
  ///
  /// Expired entries are deleted on the way out unless the namespace
  /// preserves them.
  pub fn fetch_cached(&self, url: &str) -> Result<CachedResponse, CacheMiss> {
    let key = self.request_key(url);
    let Some(entry) = self.get(&key) else {
      return Err(CacheMiss::default());
    };

    match self.classify(&entry, self.inner.clock.now()) {
      Freshness::Fresh => Ok(entry),
      Freshness::Stale => Err(CacheMiss { stale: Some(entry) }),
      Freshness::Expired => {
        if !self.inner.config.preserve_expired {
          self.delete(&key);
        }
        Err(CacheMiss::default())
      }
    }
  }

  /// Store `entry` under `key`. Failures are logged, never returned.
  pub fn put(&self, key: &str, entry: &CachedResponse) {
    let result = self
      .backend()
      .and_then(|backend| backend.put(key, entry).map_err(CacheError::from));

    if let Err(e) = result {
      self.inner.logger.log(
        Severity::Warning,
        "cache put failed",
        Some(json!({ "url": entry.url, "key": key })),
        Some(json!({ "error": e.to_string() })),
      );
    }
  }

  /// Store `entry` under the key derived from the response itself. For use
  /// when the request url is not known; otherwise store under
  /// [`request_key`](Self::request_key) so lookups find it.
  pub fn put_response(&self, entry: &CachedResponse) {
    let key = self.inner.keys.response_key(entry);
    self.put(&key, entry);
  }

  /// Remove `key`. Returns whether something was removed.
  pub fn delete(&self, key: &str) -> bool {
    self
      .backend()
      .and_then(|backend| backend.delete(key).map_err(CacheError::from))
      .unwrap_or_else(|e| {
        tracing::debug!(namespace = %self.namespace(), key, error = %e, "cache delete failed");
        false
      })
  }

  /// One pass over the namespace, deleting every expired entry.
  /// Returns the number removed.
  pub fn sweep_expired(&self) -> usize {
    let keys = match self
      .backend()
      .and_then(|backend| backend.keys().map_err(CacheError::from))
    {
      Ok(keys) => keys,
      Err(e) => {
        tracing::debug!(namespace = %self.namespace(), error = %e, "cache sweep skipped");
        return 0;
      }
    };

    let now = self.inner.clock.now();
    keys
      .iter()
      .filter(|key| match self.get(key) {
        Some(entry) => self.classify(&entry, now) == Freshness::Expired,
        None => false,
      })
      .filter(|key| self.delete(key))
      .count()
  }

  fn try_get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
    let backend = self.backend()?;
    Ok(backend.match_key(key)?)
  }

  fn backend(&self) -> Result<&Arc<dyn CacheBackend>, CacheError> {
    self.inner.backend.as_ref().ok_or_else(|| {
      self.inner.logger.log_throttled(
        Severity::Warning,
        "cache API not available",
        Some(json!({ "namespace": self.namespace() })),
        None,
        ONCE_PER_DAY,
      );
      CacheError::BackendUnavailable {
        namespace: self.namespace().to_string(),
      }
    })
  }

  fn read_failed(&self, key: &str, err: &CacheError) {
    if let CacheError::Backend { .. } = err {
      self.inner.logger.log_throttled(
        Severity::Warning,
        "cache read failed",
        Some(json!({ "namespace": self.namespace(), "key": key })),
        Some(json!({ "error": err.to_string() })),
        ONCE_PER_DAY,
      );
    }
  }
}

impl std::fmt::Debug for TimedCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TimedCache")
      .field("config", &self.inner.config)
      .field("backend", &self.inner.backend.as_ref().map(|b| b.kind()))
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::kv::{KvBackend, KvStore, MemoryKvStore};
  use crate::cache::response::http_date;
  use crate::cache::sqlite::SqliteBackend;
  use crate::host::ManualClock;
  use crate::logger::LoggerIdentity;
  use color_eyre::eyre::eyre;

  const URL: &str = "https://a.test/data.json";

  struct Fixture {
    clock: Arc<ManualClock>,
    backend: Arc<dyn CacheBackend>,
  }

  impl Fixture {
    fn new() -> Self {
      Self {
        clock: Arc::new(ManualClock::epoch()),
        backend: Arc::new(SqliteBackend::open_in_memory("test").unwrap()),
      }
    }

    fn cache(&self, refresh: Window, expiry: Window) -> TimedCache {
      self.cache_with(CacheConfig {
        namespace: "test".to_string(),
        refresh,
        expiry,
        preserve_expired: false,
      })
    }

    fn cache_with(&self, config: CacheConfig) -> TimedCache {
      let logger = EventLogger::new(LoggerIdentity::default(), false, self.clock.clone());
      TimedCache::open(config, Some(self.backend.clone()), self.clock.clone(), logger)
    }

    /// A response dated "now" on the fixture clock.
    fn response(&self, url: &str) -> CachedResponse {
      CachedResponse::new(url, 200)
        .with_header("date", http_date(self.clock.now()))
        .with_body("payload")
    }

    fn advance(&self, ms: u64) {
      self.clock.advance(Duration::from_millis(ms));
    }
  }

  #[test]
  fn test_freshness_boundaries_are_inclusive() {
    let refresh = Window::millis(1000);
    let expiry = Window::millis(4000);
    let at = |ms| freshness(refresh, expiry, Duration::from_millis(ms));

    assert_eq!(at(0), Freshness::Fresh);
    assert_eq!(at(1000), Freshness::Fresh);
    assert_eq!(at(1001), Freshness::Stale);
    assert_eq!(at(4000), Freshness::Stale);
    assert_eq!(at(4001), Freshness::Expired);
  }

  #[test]
  fn test_never_windows() {
    let ages = [0u64, 1, 1000, 86_400_000, u32::MAX as u64];

    for ms in ages {
      let age = Duration::from_millis(ms);
      assert_eq!(freshness(Window::Never, Window::millis(10), age), Freshness::Fresh);
      assert_ne!(freshness(Window::millis(10), Window::Never, age), Freshness::Expired);
    }
  }

  #[test]
  fn test_scenario_refresh_1000_expiry_4000() {
    let fx = Fixture::new();
    let cache = fx.cache(Window::millis(1000), Window::millis(4000));
    cache.put(URL, &fx.response(URL));

    fx.advance(500);
    assert!(cache.fetch_cached(URL).is_ok());

    fx.advance(1500);
    let miss = cache.fetch_cached(URL).unwrap_err();
    assert_eq!(miss.stale.as_ref().map(|r| r.url.as_str()), Some(URL));

    fx.advance(3000);
    assert_eq!(cache.fetch_cached(URL), Err(CacheMiss::default()));
    // Expired entries are evicted on read.
    assert!(cache.get(URL).is_none());
    assert_eq!(cache.fetch_cached(URL), Err(CacheMiss::default()));
  }

  #[test]
  fn test_write_then_read_is_fresh() {
    let fx = Fixture::new();
    let cache = fx.cache(Window::millis(1000), Window::millis(4000));
    let response = fx.response(URL);

    cache.put(URL, &response);
    let stored = cache.get(URL).unwrap();

    assert_eq!(stored, response);
    assert_eq!(cache.classify(&stored, fx.clock.now()), Freshness::Fresh);
  }

  #[test]
  fn test_entry_without_date_is_expired() {
    let fx = Fixture::new();
    let cache = fx.cache(Window::Never, Window::Never);
    let undated = CachedResponse::new(URL, 200);

    assert_eq!(cache.classify(&undated, fx.clock.now()), Freshness::Expired);
  }

  #[test]
  fn test_future_date_counts_as_fresh() {
    let fx = Fixture::new();
    let cache = fx.cache(Window::millis(1000), Window::millis(4000));
    let response = fx.response(URL);

    fx.clock.set(fx.clock.now() - chrono::Duration::seconds(30));

    assert_eq!(cache.classify(&response, fx.clock.now()), Freshness::Fresh);
  }

  #[test]
  fn test_sweep_removes_only_expired_and_is_idempotent() {
    let fx = Fixture::new();
    let cache = fx.cache(Window::millis(1000), Window::millis(4000));
    cache.put("old", &fx.response("old"));
    fx.advance(3000);
    cache.put("stale", &fx.response("stale"));
    fx.advance(1500);
    cache.put("fresh", &fx.response("fresh"));
    cache.put("undated", &CachedResponse::new("undated", 200));

    assert_eq!(cache.sweep_expired(), 2);
    assert_eq!(cache.sweep_expired(), 0);

    assert!(cache.get("old").is_none());
    assert!(cache.get("undated").is_none());
    assert!(cache.get("stale").is_some());
    assert!(cache.get("fresh").is_some());
  }

  #[test]
  fn test_open_sweeps_unless_preserving() {
    let fx = Fixture::new();
    let first = fx.cache(Window::millis(10), Window::millis(20));
    first.put("k", &fx.response("k"));
    fx.advance(100);

    let preserving = fx.cache_with(CacheConfig {
      namespace: "test".to_string(),
      refresh: Window::millis(10),
      expiry: Window::millis(20),
      preserve_expired: true,
    });
    assert!(preserving.get("k").is_some());
    assert_eq!(preserving.fetch_cached("k"), Err(CacheMiss::default()));
    assert!(preserving.get("k").is_some(), "preserved entries survive reads");

    let sweeping = fx.cache(Window::millis(10), Window::millis(20));
    assert!(sweeping.get("k").is_none());
  }

  #[test]
  fn test_disabled_cache_reads_as_miss() {
    let clock = Arc::new(ManualClock::epoch());
    let logger = EventLogger::new(LoggerIdentity::default(), false, clock.clone());
    let cache = TimedCache::open(CacheConfig::default(), None, clock, logger);

    cache.put(URL, &CachedResponse::new(URL, 200));

    assert!(!cache.is_enabled());
    assert_eq!(cache.get(URL), None);
    assert_eq!(cache.fetch_cached(URL), Err(CacheMiss::default()));
    assert_eq!(cache.sweep_expired(), 0);
    assert!(!cache.delete(URL));
  }

  #[test]
  fn test_open_does_not_sweep_a_namespace_sharing_its_prefix() {
    let clock = Arc::new(ManualClock::epoch());
    let logger = EventLogger::new(LoggerIdentity::default(), false, clock.clone());
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let open = |namespace: &str, expiry: Window| {
      let backend: Arc<dyn CacheBackend> = Arc::new(KvBackend::new(store.clone(), namespace));
      let config = CacheConfig {
        namespace: namespace.to_string(),
        refresh: Window::secs(5),
        expiry,
        preserve_expired: false,
      };
      TimedCache::open(config, Some(backend), clock.clone(), logger.clone())
    };

    let feeds = open("feeds", Window::secs(3600));
    let dated = CachedResponse::new(URL, 200).with_header("date", http_date(clock.now()));
    feeds.put(URL, &dated);
    clock.advance(Duration::from_secs(60));

    let feed = open("feed", Window::secs(10));

    assert_eq!(feed.sweep_expired(), 0);
    assert!(feeds.get(URL).is_some());
  }

  struct BrokenStore;

  impl KvStore for BrokenStore {
    fn get_item(&self, _key: &str) -> color_eyre::Result<Option<String>> {
      Err(eyre!("storage disabled"))
    }

    fn set_item(&self, _key: &str, _value: &str) -> color_eyre::Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn remove_item(&self, _key: &str) -> color_eyre::Result<()> {
      Err(eyre!("storage disabled"))
    }

    fn keys(&self) -> color_eyre::Result<Vec<String>> {
      Err(eyre!("storage disabled"))
    }
  }

  #[test]
  fn test_backend_failures_degrade_to_miss() {
    let clock = Arc::new(ManualClock::epoch());
    let logger = EventLogger::new(LoggerIdentity::default(), false, clock.clone());
    let backend: Arc<dyn CacheBackend> = Arc::new(KvBackend::new(Arc::new(BrokenStore), "ns"));
    let cache = TimedCache::open(CacheConfig::default(), Some(backend), clock, logger);

    cache.put(URL, &CachedResponse::new(URL, 200));

    assert_eq!(cache.fetch_cached(URL), Err(CacheMiss::default()));
    assert_eq!(cache.sweep_expired(), 0);
  }

  struct IdKeys;

  impl KeyMapper for IdKeys {
    fn request_key(&self, url: &str) -> String {
      url.rsplit('/').next().unwrap_or(url).to_string()
    }

    fn response_key(&self, response: &CachedResponse) -> String {
      response.header("x-file-id").unwrap_or(&response.url).to_string()
    }
  }

  #[test]
  fn test_key_mapper_pairs_redirected_response_with_request() {
    let fx = Fixture::new();
    let logger = EventLogger::new(LoggerIdentity::default(), false, fx.clock.clone());
    let backend: Arc<dyn CacheBackend> = Arc::new(KvBackend::new(Arc::new(MemoryKvStore::new()), "ns"));
    let cache = TimedCache::open_with_keys(
      CacheConfig::default(),
      Some(backend),
      Arc::new(IdKeys),
      fx.clock.clone(),
      logger,
    );

    let redirected = fx
      .response("https://cdn.test/abc?sig=1")
      .with_header("x-file-id", "file-42");
    cache.put_response(&redirected);

    let hit = cache.fetch_cached("https://storage.test/bucket/file-42").unwrap();
    assert_eq!(hit.url, "https://cdn.test/abc?sig=1");
  }
}
