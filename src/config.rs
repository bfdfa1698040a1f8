use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A time window configured in milliseconds, where `-1` means "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Window {
  Never,
  After(Duration),
}

impl Window {
  pub const fn millis(ms: u64) -> Self {
    Self::After(Duration::from_millis(ms))
  }

  pub const fn secs(secs: u64) -> Self {
    Self::After(Duration::from_secs(secs))
  }

  /// Whether an entry of the given age is still inside the window.
  /// The boundary itself is inside.
  pub fn admits(&self, age: Duration) -> bool {
    match self {
      Window::Never => true,
      Window::After(limit) => age <= *limit,
    }
  }

  pub fn duration(&self) -> Option<Duration> {
    match self {
      Window::Never => None,
      Window::After(d) => Some(*d),
    }
  }
}

impl TryFrom<i64> for Window {
  type Error = String;

  fn try_from(ms: i64) -> std::result::Result<Self, Self::Error> {
    match ms {
      -1 => Ok(Window::Never),
      ms if ms >= 0 => Ok(Window::After(Duration::from_millis(ms as u64))),
      other => Err(format!("invalid window {}: use -1 or a non-negative number of milliseconds", other)),
    }
  }
}

impl From<Window> for i64 {
  fn from(window: Window) -> Self {
    match window {
      Window::Never => -1,
      Window::After(d) => d.as_millis() as i64,
    }
  }
}

/// Durations in YAML are plain milliseconds.
mod millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
  }
}

/// Per-namespace cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Logical partition name
  pub namespace: String,
  /// Age after which an entry is stale but still servable
  pub refresh: Window,
  /// Age after which an entry must not be served
  pub expiry: Window,
  /// Keep expired entries instead of deleting them on read and at open
  pub preserve_expired: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      namespace: "refetch".to_string(),
      refresh: Window::secs(60 * 60 * 2),
      expiry: Window::secs(60 * 60 * 4),
      preserve_expired: false,
    }
  }
}

/// Fetch scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  /// Delay between retries inside a failure streak
  #[serde(with = "millis")]
  pub retry: Duration,
  /// Delay after the retry budget is spent
  #[serde(with = "millis")]
  pub cooldown: Duration,
  /// Delay between successful refreshes
  #[serde(with = "millis")]
  pub refresh: Duration,
  /// Retry budget per failure streak
  pub count: u32,
  /// Statuses that go straight to cooldown while online
  pub avoid_retries_for_status_codes: Vec<u16>,
  /// Derive the refresh delay from `Cache-Control: max-age`
  pub refresh_from_cache_control: bool,
  /// Fixed extra delay added to a `max-age` derived refresh
  #[serde(with = "millis")]
  pub refresh_jitter: Duration,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      retry: Duration::from_secs(60),
      cooldown: Duration::from_secs(60 * 10),
      refresh: Duration::from_secs(60 * 60),
      count: 5,
      avoid_retries_for_status_codes: Vec::new(),
      refresh_from_cache_control: false,
      refresh_jitter: Duration::from_secs(1),
    }
  }
}

impl FetchConfig {
  /// Refresh window for the cache backing this fetch loop.
  ///
  /// Slightly shorter than the fetch refresh so the entry is already stale
  /// when the next tick fires.
  pub fn cache_refresh(&self) -> Window {
    let margin = if self.refresh > Duration::from_secs(10) {
      Duration::from_secs(5)
    } else {
      Duration::ZERO
    };
    Window::After(self.refresh - margin)
  }
}

/// File store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
  pub cache: CacheConfig,
  /// Minimum delay between two etag checks of the same file
  #[serde(with = "millis")]
  pub status_check_interval: Duration,
  /// Statuses that mean the file is gone
  pub deleted_status_codes: Vec<u16>,
}

impl Default for FilesConfig {
  fn default() -> Self {
    Self {
      cache: CacheConfig {
        namespace: "store-files".to_string(),
        ..CacheConfig::default()
      },
      status_check_interval: Duration::from_secs(60 * 10),
      deleted_status_codes: vec![401, 403, 404],
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// SQLite when it opens, else the key/value store, else no cache
  #[default]
  Auto,
  Sqlite,
  Kv,
  None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: BackendKind,
  /// Data directory (default: $XDG_DATA_HOME/refetch)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("refetch"))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  /// Endpoint that answers HEAD requests whenever the network is up
  pub endpoint: String,
  #[serde(with = "millis")]
  pub timeout: Duration,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://widgets.risevision.com".to_string(),
      timeout: Duration::from_secs(10),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// `tracing_subscriber::EnvFilter` directive, overridden by RUST_LOG
  pub filter: String,
  /// Also write logs to a daily rolling file under the data dir
  pub file: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "refetch=info,warn".to_string(),
      file: true,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  pub fetch: FetchConfig,
  pub files: FilesConfig,
  pub storage: StorageConfig,
  pub probe: ProbeConfig,
  pub log: LogConfig,
  /// Preview mode: suppress all logging
  pub preview: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./refetch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/refetch/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("refetch.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("refetch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_documented_values() {
    let config = Config::default();

    assert_eq!(config.cache.namespace, "refetch");
    assert_eq!(config.fetch.retry, Duration::from_secs(60));
    assert_eq!(config.fetch.cooldown, Duration::from_secs(600));
    assert_eq!(config.fetch.refresh, Duration::from_secs(3600));
    assert_eq!(config.fetch.count, 5);
    assert!(!config.fetch.refresh_from_cache_control);
    assert_eq!(config.files.deleted_status_codes, vec![401, 403, 404]);
    assert_eq!(config.files.cache.namespace, "store-files");
  }

  #[test]
  fn test_parse_partial_yaml_keeps_defaults() {
    let config = Config::parse(
      r#"
cache:
  namespace: weather
  refresh: 1000
  expiry: -1
fetch:
  count: 2
  avoid_retries_for_status_codes: [404, 410]
storage:
  backend: kv
"#,
    )
    .unwrap();

    assert_eq!(config.cache.namespace, "weather");
    assert_eq!(config.cache.refresh, Window::millis(1000));
    assert_eq!(config.cache.expiry, Window::Never);
    assert!(!config.cache.preserve_expired);
    assert_eq!(config.fetch.count, 2);
    assert_eq!(config.fetch.avoid_retries_for_status_codes, vec![404, 410]);
    assert_eq!(config.fetch.retry, Duration::from_secs(60));
    assert_eq!(config.storage.backend, BackendKind::Kv);
  }

  #[test]
  fn test_window_rejects_negative_values_other_than_never() {
    assert!(Config::parse("cache:\n  refresh: -5\n").is_err());
  }

  #[test]
  fn test_window_admits_boundary() {
    let window = Window::millis(1000);

    assert!(window.admits(Duration::from_millis(999)));
    assert!(window.admits(Duration::from_millis(1000)));
    assert!(!window.admits(Duration::from_millis(1001)));
    assert!(Window::Never.admits(Duration::from_secs(u32::MAX as u64)));
  }

  #[test]
  fn test_cache_refresh_keeps_margin_for_long_intervals() {
    let mut fetch = FetchConfig::default();
    assert_eq!(fetch.cache_refresh(), Window::secs(3600 - 5));

    fetch.refresh = Duration::from_secs(10);
    assert_eq!(fetch.cache_refresh(), Window::secs(10));
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }
}
