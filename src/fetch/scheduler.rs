use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::policy::{self, Decision};
use super::{Delivery, FetchHandler};
use crate::cache::{CacheMiss, CachedResponse, TimedCache};
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::host::HostContext;
use crate::http::{Request, Transport};
use crate::logger::{EventLogger, Severity};
use crate::probe::ConnectivityProbe;

const REQUEST_ERROR_CODE: &str = "E000000037";

enum Command {
  Fetch { url: String, headers: Vec<(String, String)> },
  Shutdown,
}

/// Handle to a running fetch loop.
///
/// The loop lives in its own task and owns all session state. Dropping the
/// handle aborts the task.
pub struct FetchScheduler {
  tx: mpsc::UnboundedSender<Command>,
  active: Arc<AtomicBool>,
  task: JoinHandle<()>,
}

impl FetchScheduler {
  pub fn spawn(
    config: FetchConfig,
    cache: Option<TimedCache>,
    transport: Arc<dyn Transport>,
    host: HostContext,
    logger: EventLogger,
    handler: Arc<dyn FetchHandler>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let active = Arc::new(AtomicBool::new(true));

    let driver = Driver {
      config,
      cache,
      transport,
      probe: host.probe,
      logger,
      handler,
      active: active.clone(),
      session: None,
      deadline: None,
    };
    let task = tokio::spawn(driver.run(rx));

    Self { tx, active, task }
  }

  /// Start (or restart) the loop for `url`.
  ///
  /// Replaces any pending timer and cancels an attempt in flight. An empty
  /// url is ignored.
  pub fn fetch(&self, url: &str, headers: Vec<(String, String)>) {
    if url.is_empty() {
      tracing::debug!("fetch ignored: empty url");
      return;
    }

    let _ = self.tx.send(Command::Fetch {
      url: url.to_string(),
      headers,
    });
  }

  /// Stop the loop. No callback fires after this returns.
  pub fn shutdown(&self) {
    self.active.store(false, Ordering::SeqCst);
    let _ = self.tx.send(Command::Shutdown);
  }

  pub fn is_running(&self) -> bool {
    !self.task.is_finished()
  }
}

impl Drop for FetchScheduler {
  fn drop(&mut self) {
    self.active.store(false, Ordering::SeqCst);
    self.task.abort();
  }
}

/// Which "data received" events are still owed for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataLog {
  Unlogged,
  LoggedCached,
  Done,
}

impl DataLog {
  /// Advance on a delivery. Returns the `cached` flag to log, if any.
  fn record(&mut self, is_cached: bool) -> Option<bool> {
    match (*self, is_cached) {
      (DataLog::Unlogged, true) => {
        *self = DataLog::LoggedCached;
        Some(true)
      }
      (DataLog::Unlogged, false) | (DataLog::LoggedCached, false) => {
        *self = DataLog::Done;
        Some(false)
      }
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
struct Session {
  url: String,
  headers: Vec<(String, String)>,
  retry_count: u32,
  data_log: DataLog,
}

enum Wake {
  Command(Option<Command>),
  Due,
  Cycled(Session, Duration),
}

struct Driver {
  config: FetchConfig,
  cache: Option<TimedCache>,
  transport: Arc<dyn Transport>,
  probe: Arc<dyn ConnectivityProbe>,
  logger: EventLogger,
  handler: Arc<dyn FetchHandler>,
  active: Arc<AtomicBool>,
  session: Option<Session>,
  deadline: Option<Instant>,
}

impl Driver {
  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
    loop {
      let wake = match self.deadline {
        None => Wake::Command(rx.recv().await),
        Some(deadline) => tokio::select! {
          biased;
          command = rx.recv() => Wake::Command(command),
          () = time::sleep_until(deadline) => Wake::Due,
        },
      };

      let wake = match wake {
        Wake::Due => {
          self.deadline = None;
          let Some(session) = self.session.clone() else {
            continue;
          };
          // A command arriving mid-attempt abandons the attempt.
          tokio::select! {
            biased;
            command = rx.recv() => Wake::Command(command),
            (session, next) = self.cycle(session) => Wake::Cycled(session, next),
          }
        }
        other => other,
      };

      match wake {
        Wake::Command(Some(Command::Fetch { url, headers })) => {
          tracing::debug!(url = %url, "fetch scheduled");
          self.session = Some(Session {
            url,
            headers,
            retry_count: 0,
            data_log: DataLog::Unlogged,
          });
          self.deadline = Some(Instant::now());
        }
        Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => break,
        Wake::Cycled(session, next) => {
          tracing::debug!(url = %session.url, retry_count = session.retry_count, next_ms = next.as_millis() as u64, "next attempt armed");
          self.session = Some(session);
          self.deadline = Some(Instant::now() + next);
        }
        Wake::Due => {}
      }
    }

    tracing::debug!("fetch loop stopped");
  }

  /// One attempt. Returns the updated session and the delay until the next.
  async fn cycle(&self, mut session: Session) -> (Session, Duration) {
    let stale = match self.fetch_cached(&session.url) {
      Ok(response) => {
        tracing::debug!(url = %session.url, "serving fresh cache");
        session.retry_count = 0;
        self.deliver(&mut session, response, true, None);
        return (session, self.config.refresh);
      }
      Err(miss) => miss.stale,
    };

    let request = Request::get(session.url.as_str()).with_headers(session.headers.clone());
    let error = match self.transport.send(&request).await {
      Ok(response) if response.is_ok() => {
        session.retry_count = 0;
        let next = policy::refresh_interval(&self.config, &response, &mut rand::thread_rng());
        // Keyed by the url asked for, not the one reqwest ended up at.
        if let Some(cache) = &self.cache {
          cache.put(&cache.request_key(&session.url), &response);
        }
        self.deliver(&mut session, response, false, None);
        return (session, next);
      }
      Ok(response) => FetchError::HttpRejection {
        status: response.status,
        status_text: response.status_text.clone(),
        response_text: response.text().into_owned(),
      },
      Err(e) => e,
    };

    let offline = self.probe.is_offline().await;
    tracing::debug!(url = %session.url, error = %error, offline, retry_count = session.retry_count, "attempt failed");

    // Stale data goes out once, at the start of a failure streak.
    if session.retry_count == 0 {
      if let Some(response) = stale {
        self.deliver(&mut session, response, true, Some(offline));
      }
    }

    match policy::decide(&self.config, &error, offline, session.retry_count) {
      Decision::Retry => {
        session.retry_count += 1;
        (session, self.config.retry)
      }
      Decision::Cooldown => {
        let attempts = session.retry_count + 1;
        session.retry_count = 0;
        self.cool_down(error, attempts, offline);
        (session, self.config.cooldown)
      }
    }
  }

  fn fetch_cached(&self, url: &str) -> Result<CachedResponse, CacheMiss> {
    match &self.cache {
      Some(cache) => cache.fetch_cached(url),
      None => Err(CacheMiss::default()),
    }
  }

  fn deliver(&self, session: &mut Session, response: CachedResponse, is_cached: bool, is_offline: Option<bool>) {
    if !self.active.load(Ordering::SeqCst) {
      return;
    }

    if let Some(cached) = session.data_log.record(is_cached) {
      self.logger.log(
        Severity::Info,
        "data received",
        Some(json!({ "url": session.url, "cached": cached })),
        None,
      );
    }

    self.handler.process_data(Delivery {
      response,
      is_cached,
      is_offline,
    });
  }

  fn cool_down(&self, error: FetchError, attempts: u32, offline: bool) {
    if !self.active.load(Ordering::SeqCst) {
      return;
    }

    self.logger.log(
      Severity::Error,
      "request error",
      Some(json!({
        "errorCode": REQUEST_ERROR_CODE,
        "error": error.to_string(),
        "status": error.status(),
        "responseText": error.response_text(),
        "offline": offline,
      })),
      None,
    );

    self.handler.process_error(&FetchError::RetryExhausted {
      attempts,
      offline,
      source: Box::new(error),
    });
  }
}
