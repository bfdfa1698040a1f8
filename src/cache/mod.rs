//! Response cache with freshness tiers and pluggable storage.
//!
//! - [`TimedCache`] classifies stored responses as fresh, stale or expired
//! - [`CacheBackend`] hides whether responses live in SQLite or in a plain
//!   key/value store
//! - Every storage failure degrades to a cache miss

mod backend;
mod kv;
mod response;
mod sqlite;
mod timed;

pub use backend::{select_backend, CacheBackend};
pub use kv::{FileKvStore, KvBackend, KvStore, MemoryKvStore};
pub use response::{http_date, parse_http_date, CachedResponse, StoredDocument};
pub use sqlite::SqliteBackend;
pub use timed::{freshness, CacheMiss, Freshness, KeyMapper, TimedCache, UrlKeys};
