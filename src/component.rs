//! A fetching component: identity, lifecycle notifications and uptime.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{CacheBackend, TimedCache};
use crate::config::{CacheConfig, FetchConfig};
use crate::error::FetchError;
use crate::fetch::{Delivery, FetchHandler, FetchScheduler};
use crate::host::HostContext;
use crate::http::Transport;
use crate::logger::{EventLogger, LoggerIdentity, Severity};

/// Notified as the component moves through its lifecycle. Every method has
/// an empty default so observers implement only what they need.
pub trait LifecycleObserver: Send + Sync {
  fn on_configured(&self, _component: &LoggerIdentity) {}

  fn on_start(&self, _component: &LoggerIdentity) {}

  fn on_data(&self, _delivery: &Delivery) {}

  fn on_error(&self, _error: &FetchError) {}
}

/// Answer to an uptime request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UptimeReport {
  pub component_id: String,
  pub component_type: String,
  /// Set once the retry budget runs out, cleared by the next delivery
  pub error: bool,
}

#[derive(Default)]
struct Shared {
  observers: RwLock<Vec<Arc<dyn LifecycleObserver>>>,
  uptime_error: AtomicBool,
}

impl FetchHandler for Shared {
  fn process_data(&self, delivery: Delivery) {
    self.uptime_error.store(false, Ordering::SeqCst);
    for observer in self.observers.read().iter() {
      observer.on_data(&delivery);
    }
  }

  fn process_error(&self, error: &FetchError) {
    self.uptime_error.store(true, Ordering::SeqCst);
    for observer in self.observers.read().iter() {
      observer.on_error(error);
    }
  }
}

pub struct Component {
  logger: EventLogger,
  host: HostContext,
  cache_config: CacheConfig,
  fetch_config: FetchConfig,
  transport: Arc<dyn Transport>,
  shared: Arc<Shared>,
  started: AtomicBool,
  cache: Option<TimedCache>,
  scheduler: Option<FetchScheduler>,
}

impl Component {
  pub fn new(
    identity: LoggerIdentity,
    cache_config: CacheConfig,
    fetch_config: FetchConfig,
    transport: Arc<dyn Transport>,
    host: HostContext,
  ) -> Self {
    Self {
      logger: host.logger(identity),
      host,
      cache_config,
      fetch_config,
      transport,
      shared: Arc::new(Shared::default()),
      started: AtomicBool::new(false),
      cache: None,
      scheduler: None,
    }
  }

  pub fn identity(&self) -> &LoggerIdentity {
    self.logger.identity()
  }

  pub fn logger(&self) -> &EventLogger {
    &self.logger
  }

  pub fn cache(&self) -> Option<&TimedCache> {
    self.cache.as_ref()
  }

  pub fn observe(&self, observer: Arc<dyn LifecycleObserver>) {
    self.shared.observers.write().push(observer);
  }

  /// Open the cache and start the fetch loop. Must run inside a tokio
  /// runtime. A second call does nothing.
  pub fn init(&mut self, backend: Option<Arc<dyn CacheBackend>>) {
    if self.scheduler.is_some() {
      return;
    }

    // Cache entries go stale a little before the next refresh tick.
    let cache_config = CacheConfig {
      refresh: self.fetch_config.cache_refresh(),
      ..self.cache_config.clone()
    };
    let cache = TimedCache::open(cache_config, backend, self.host.clock.clone(), self.logger.clone());

    let handler: Arc<dyn FetchHandler> = self.shared.clone();
    self.scheduler = Some(FetchScheduler::spawn(
      self.fetch_config.clone(),
      Some(cache.clone()),
      self.transport.clone(),
      self.host.clone(),
      self.logger.clone(),
      handler,
    ));
    self.cache = Some(cache);

    tracing::debug!(component = %self.identity().name, id = %self.identity().id, "component configured");
    for observer in self.shared.observers.read().iter() {
      observer.on_configured(self.identity());
    }
  }

  /// Handle the start signal. Only the first call has any effect.
  pub fn start(&self) {
    if self.started.swap(true, Ordering::SeqCst) {
      return;
    }

    self.logger.log(Severity::Info, "start received", None, None);
    for observer in self.shared.observers.read().iter() {
      observer.on_start(self.identity());
    }
  }

  pub fn fetch(&self, url: &str, headers: Vec<(String, String)>) {
    match &self.scheduler {
      Some(scheduler) => scheduler.fetch(url, headers),
      None => self
        .logger
        .log(Severity::Warning, "fetch before init ignored", Some(json!({ "url": url })), None),
    }
  }

  pub fn uptime(&self) -> UptimeReport {
    UptimeReport {
      component_id: self.identity().id.clone(),
      component_type: self.identity().name.clone(),
      error: self.shared.uptime_error.load(Ordering::SeqCst),
    }
  }

  /// Stop fetching. No observer is called afterwards.
  pub fn teardown(&mut self) {
    if let Some(scheduler) = self.scheduler.take() {
      scheduler.shutdown();
    }
  }
}
