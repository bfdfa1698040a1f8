use serde_json::json;
use std::sync::Arc;

use crate::cache::{CachedResponse, TimedCache};
use crate::config::FilesConfig;
use crate::error::{FetchError, FileError};
use crate::host::Clock;
use crate::http::{with_cache_buster, Request, Transport};
use crate::last_requested::LastRequestedStorage;
use crate::logger::{EventLogger, Severity, ONCE_PER_DAY};

/// Whether a cached file can still be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
  Fresh,
  Stale,
  Deleted,
}

/// Serves files from the cache, revalidating them by etag at most once per
/// `status_check_interval`.
pub struct FileStore {
  config: FilesConfig,
  cache: TimedCache,
  last_requested: LastRequestedStorage,
  transport: Arc<dyn Transport>,
  clock: Arc<dyn Clock>,
  logger: EventLogger,
}

impl FileStore {
  pub fn new(
    config: FilesConfig,
    cache: TimedCache,
    last_requested: LastRequestedStorage,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    logger: EventLogger,
  ) -> Self {
    Self {
      config,
      cache,
      last_requested,
      transport,
      clock,
      logger,
    }
  }

  pub fn cache(&self) -> &TimedCache {
    &self.cache
  }

  /// The file at `url`, from the cache when it is still current.
  ///
  /// `Ok(None)` means storage reports the file as gone.
  pub async fn get_file(&self, url: &str, omit_status_check: bool) -> Result<Option<CachedResponse>, FileError> {
    let Some(cached) = self.cache.get(url) else {
      return self.request_file(url).await.map(Some);
    };

    if omit_status_check {
      return Ok(Some(cached));
    }

    match self.file_status(url, &cached).await {
      FileStatus::Fresh => Ok(Some(cached)),
      FileStatus::Stale => self.request_file(url).await.map(Some),
      FileStatus::Deleted => {
        tracing::debug!(url, "file deleted from storage");
        Ok(None)
      }
    }
  }

  /// Compare `cached` against storage. Skipped (fresh) when the last check
  /// is recent enough.
  pub async fn file_status(&self, url: &str, cached: &CachedResponse) -> FileStatus {
    if !self.status_check_due(url) {
      return FileStatus::Fresh;
    }

    let now = self.clock.now();
    let request = Request::head(with_cache_buster(url, now.timestamp_millis()));

    let status = match self.transport.send(&request).await {
      Ok(response) if response.is_ok() => {
        if cached.etag() == response.etag() {
          FileStatus::Fresh
        } else {
          FileStatus::Stale
        }
      }
      Ok(response) if self.config.deleted_status_codes.contains(&response.status) => FileStatus::Deleted,
      Ok(response) => {
        self.logger.log_throttled(
          Severity::Warning,
          "file status request error",
          Some(json!({ "url": url, "err": response.status_text })),
          None,
          ONCE_PER_DAY,
        );
        FileStatus::Fresh
      }
      Err(e) => {
        self.logger.log_throttled(
          Severity::Warning,
          "failed to check file status",
          Some(json!({ "url": url, "err": e.to_string() })),
          None,
          ONCE_PER_DAY,
        );
        FileStatus::Fresh
      }
    };

    self.last_requested.save(url, self.clock.now());

    status
  }

  fn status_check_due(&self, url: &str) -> bool {
    let Some(last) = self.last_requested.timestamp(url) else {
      return true;
    };

    match self.clock.now().signed_duration_since(last).to_std() {
      Ok(elapsed) => elapsed > self.config.status_check_interval,
      // Last check in the future: trust it.
      Err(_) => false,
    }
  }

  async fn request_file(&self, url: &str) -> Result<CachedResponse, FileError> {
    let result = match self.transport.send(&Request::get(url)).await {
      Ok(response) if response.is_ok() => Ok(response),
      Ok(response) => Err(FileError::Rejected {
        url: url.to_string(),
        status: response.status,
        status_text: response.status_text,
      }),
      Err(source) => Err(FileError::Fetch {
        url: url.to_string(),
        source,
      }),
    };

    match result {
      Ok(response) => {
        self.cache.put(url, &response);
        Ok(response)
      }
      Err(e) => {
        self.logger.log_throttled(
          Severity::Error,
          "failed to get file from storage",
          Some(json!({ "url": url, "err": describe(&e) })),
          None,
          ONCE_PER_DAY,
        );
        Err(e)
      }
    }
  }
}

fn describe(err: &FileError) -> String {
  match err {
    FileError::Fetch {
      source: FetchError::Network { message },
      ..
    } => message.clone(),
    FileError::Fetch { source, .. } => source.to_string(),
    FileError::Rejected { status_text, .. } => status_text.clone(),
  }
}
