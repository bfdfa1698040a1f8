//! Synchronous key/value storage and the fallback cache backend built on it.
//!
//! Each cached response is one entry keyed `namespace + key` whose value is a
//! JSON [`StoredDocument`]. The medium keeps no response semantics of its own,
//! so the url is stored explicitly. A namespace's keys are listed from its own
//! index entry, never by prefix, so `feed` and `feeds` stay apart.

use color_eyre::{eyre::eyre, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::backend::CacheBackend;
use super::response::{CachedResponse, StoredDocument};
use crate::config::BackendKind;

/// String-to-string storage with per-key atomic operations.
pub trait KvStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  fn keys(&self) -> Result<Vec<String>>;
}

/// On-disk store: one JSON file per key, named by the key's SHA-256.
#[derive(Debug, Clone)]
pub struct FileKvStore {
  dir: PathBuf,
}

/// File contents; the original key is kept so `keys()` can list it.
#[derive(Serialize, Deserialize)]
struct FileEntry {
  key: String,
  value: String,
}

impl FileKvStore {
  /// Open the store, creating the directory and checking it is writable.
  pub fn open(dir: &Path) -> Result<Self> {
    fs::create_dir_all(dir)
      .map_err(|e| eyre!("Failed to create storage directory {}: {}", dir.display(), e))?;

    let store = Self {
      dir: dir.to_path_buf(),
    };

    let probe = "__refetch_storage_test__";
    store.set_item(probe, probe)?;
    store.remove_item(probe)?;

    Ok(store)
  }

  fn entry_path(&self, key: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    self.dir.join(format!("{}.json", hex::encode(hasher.finalize())))
  }
}

impl KvStore for FileKvStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let path = self.entry_path(key);
    if !path.exists() {
      return Ok(None);
    }

    let content = fs::read_to_string(&path)
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
    let entry: FileEntry = serde_json::from_str(&content)
      .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;

    Ok(Some(entry.value))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let path = self.entry_path(key);
    let entry = FileEntry {
      key: key.to_string(),
      value: value.to_string(),
    };
    let json = serde_json::to_string(&entry).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;

    // Write then rename so readers never see a partial file.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    fs::rename(&tmp, &path).map_err(|e| eyre!("Failed to replace {}: {}", path.display(), e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let path = self.entry_path(key);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove {}: {}", path.display(), e)),
    }
  }

  fn keys(&self) -> Result<Vec<String>> {
    let entries = fs::read_dir(&self.dir)
      .map_err(|e| eyre!("Failed to list {}: {}", self.dir.display(), e))?;

    let mut keys: Vec<String> = entries
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
      .filter_map(|path| fs::read_to_string(path).ok())
      .filter_map(|content| serde_json::from_str::<FileEntry>(&content).ok())
      .map(|entry| entry.key)
      .collect();
    keys.sort();

    Ok(keys)
  }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
  items: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryKvStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.items.lock().get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.items.lock().insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.items.lock().remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.items.lock().keys().cloned().collect())
  }
}

/// Prefix of the entry listing a namespace's keys. The NUL keeps it clear of
/// url-shaped cache keys.
const INDEX_PREFIX: &str = "\u{0}refetch-keys\u{0}";

/// Fallback cache backend over any [`KvStore`].
pub struct KvBackend {
  store: Arc<dyn KvStore>,
  namespace: String,
  /// Serializes read-modify-write of the key index
  index_lock: Mutex<()>,
}

impl KvBackend {
  pub fn new(store: Arc<dyn KvStore>, namespace: &str) -> Self {
    Self {
      store,
      namespace: namespace.to_string(),
      index_lock: Mutex::new(()),
    }
  }

  fn storage_key(&self, key: &str) -> String {
    format!("{}{}", self.namespace, key)
  }

  fn index_key(&self) -> String {
    format!("{}{}", INDEX_PREFIX, self.namespace)
  }

  fn load_index(&self) -> Result<BTreeSet<String>> {
    match self.store.get_item(&self.index_key())? {
      Some(raw) => serde_json::from_str(&raw)
        .map_err(|e| eyre!("Failed to parse key index for namespace {}: {}", self.namespace, e)),
      None => Ok(BTreeSet::new()),
    }
  }

  fn update_index(&self, update: impl FnOnce(&mut BTreeSet<String>) -> bool) -> Result<()> {
    let _guard = self.index_lock.lock();
    let mut index = self.load_index()?;
    if !update(&mut index) {
      return Ok(());
    }

    if index.is_empty() {
      return self.store.remove_item(&self.index_key());
    }

    let json = serde_json::to_string(&index).map_err(|e| eyre!("Failed to serialize key index: {}", e))?;
    self.store.set_item(&self.index_key(), &json)
  }
}

impl CacheBackend for KvBackend {
  fn kind(&self) -> BackendKind {
    BackendKind::Kv
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.load_index()?.into_iter().collect())
  }

  fn match_key(&self, key: &str) -> Result<Option<CachedResponse>> {
    match self.store.get_item(&self.storage_key(key))? {
      Some(value) => {
        let doc: StoredDocument = serde_json::from_str(&value)
          .map_err(|e| eyre!("Failed to deserialize cached response {}: {}", key, e))?;
        Ok(Some(doc.into()))
      }
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, response: &CachedResponse) -> Result<()> {
    let value = serde_json::to_string(&response.to_document())
      .map_err(|e| eyre!("Failed to serialize response: {}", e))?;

    self.store.set_item(&self.storage_key(key), &value)?;
    self.update_index(|index| index.insert(key.to_string()))
  }

  fn delete(&self, key: &str) -> Result<bool> {
    let storage_key = self.storage_key(key);
    let existed = self.store.get_item(&storage_key)?.is_some();
    self.store.remove_item(&storage_key)?;
    self.update_index(|index| index.remove(key))?;

    Ok(existed)
  }
}
