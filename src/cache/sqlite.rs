//! SQLite-backed primary cache storage.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::backend::CacheBackend;
use super::response::CachedResponse;
use crate::config::BackendKind;

/// Schema for the response cache.
const CACHE_SCHEMA: &str = r#"
-- Full responses, one row per (namespace, key)
CREATE TABLE IF NOT EXISTS responses (
    namespace TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, cache_key)
);

CREATE INDEX IF NOT EXISTS idx_responses_namespace ON responses(namespace);
"#;

/// Structured response storage for one namespace.
pub struct SqliteBackend {
  conn: Mutex<Connection>,
  namespace: String,
}

impl SqliteBackend {
  /// Open (or create) the database at `path` and bind to `namespace`.
  pub fn open(path: &Path, namespace: &str) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn, namespace)
  }

  /// In-memory database, mostly for tests.
  pub fn open_in_memory(namespace: &str) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn, namespace)
  }

  fn with_connection(conn: Connection, namespace: &str) -> Result<Self> {
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let backend = Self {
      conn: Mutex::new(conn),
      namespace: namespace.to_string(),
    };
    backend.run_migrations()?;

    Ok(backend)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheBackend for SqliteBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Sqlite
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT cache_key FROM responses WHERE namespace = ? ORDER BY cache_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![self.namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn match_key(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, u16, String, String, Vec<u8>)> = conn
      .query_row(
        "SELECT url, status, status_text, headers, body FROM responses
         WHERE namespace = ? AND cache_key = ?",
        params![self.namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached response {}: {}", key, e))?;

    match row {
      Some((url, status, status_text, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;

        Ok(Some(CachedResponse {
          url,
          status,
          status_text,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, response: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO responses (namespace, cache_key, url, status, status_text, headers, body, written_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          self.namespace,
          key,
          response.url,
          response.status,
          response.status_text,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store response: {}", e))?;

    Ok(())
  }

  fn delete(&self, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM responses WHERE namespace = ? AND cache_key = ?",
        params![self.namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete response: {}", e))?;

    Ok(removed > 0)
  }
}
