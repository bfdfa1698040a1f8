//! Error types for the cache, the fetch scheduler and the file store.

/// Cache errors.
///
/// These never leave `TimedCache`: every public lookup turns them into a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// No storage backend could be opened for this namespace.
  #[error("no cache backend available for namespace '{namespace}'")]
  BackendUnavailable { namespace: String },

  /// The backend failed an individual operation (quota, I/O, corrupt row).
  #[error("cache backend error: {message}")]
  Backend { message: String },
}

impl From<color_eyre::Report> for CacheError {
  fn from(err: color_eyre::Report) -> Self {
    Self::Backend {
      message: format!("{:#}", err),
    }
  }
}

/// Fetch errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
  /// The request never produced a response (offline, DNS, TLS, timeout).
  #[error("network error: {message}")]
  Network { message: String },

  /// The server answered with a non-success status.
  #[error("Request rejected with status {status}: {status_text}")]
  HttpRejection {
    status: u16,
    status_text: String,
    response_text: String,
  },

  /// The retry budget for the current failure streak is spent.
  #[error("retry budget exhausted after {attempts} attempts (offline: {offline}): {source}")]
  RetryExhausted {
    attempts: u32,
    offline: bool,
    #[source]
    source: Box<FetchError>,
  },
}

impl FetchError {
  /// HTTP status carried by the failure, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::HttpRejection { status, .. } => Some(*status),
      Self::RetryExhausted { source, .. } => source.status(),
      Self::Network { .. } => None,
    }
  }

  /// Response body carried by an HTTP rejection.
  pub fn response_text(&self) -> Option<&str> {
    match self {
      Self::HttpRejection { response_text, .. } => Some(response_text),
      Self::RetryExhausted { source, .. } => source.response_text(),
      Self::Network { .. } => None,
    }
  }

  /// Whether the client was offline when the streak ended.
  pub fn is_offline(&self) -> bool {
    matches!(self, Self::RetryExhausted { offline: true, .. })
  }
}

impl From<reqwest::Error> for FetchError {
  fn from(err: reqwest::Error) -> Self {
    Self::Network {
      message: err.to_string(),
    }
  }
}

/// File store errors.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
  /// The file request failed before a response arrived.
  #[error("failed to get file {url}: {source}")]
  Fetch {
    url: String,
    #[source]
    source: FetchError,
  },

  /// Storage answered with a non-success status.
  #[error("failed to get file {url}: {status} {status_text}")]
  Rejected {
    url: String,
    status: u16,
    status_text: String,
  },
}
