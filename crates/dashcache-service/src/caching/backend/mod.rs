use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::config::Config;

use super::CacheContents;
use super::cache_key::CacheKey;

mod fs;
mod memory;

pub use fs::FsBackend;
pub use memory::MemoryBackend;

/// The kinds of storage backing the cache, in probing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Persistent filesystem store held to a configured quota; `usage()` is
    /// meaningful.
    QuotaFs,
    /// Persistent filesystem store without quota reporting; `usage()` knows
    /// used bytes but not the ceiling.
    PlainFs,
    /// Process-lifetime map, bounded by entry count rather than bytes.
    Memory,
}

impl AsRef<str> for BackendKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::QuotaFs => "quota_fs",
            Self::PlainFs => "plain_fs",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

/// One stored cache record.
///
/// Entries are immutable once written; a `set` for the same key replaces the
/// whole entry. Only the [`CacheStore`](super::CacheStore) ever holds these.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub subject: String,
    pub query_signature: String,
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub created_at: SystemTime,
}

impl StoredEntry {
    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.subject.as_str(), self.query_signature.as_str())
    }

    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }

    /// The entry's age, computed at read time.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }
}

/// Listing metadata for one stored entry, used by eviction and stats.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    /// Backend-scoped identifier, the same id `delete` accepts.
    pub id: String,
    pub created_at: SystemTime,
    pub size_bytes: u64,
    /// Set when the entry's metadata cannot be parsed. Corrupt entries are
    /// pruned ahead of any age-based selection.
    pub corrupt: bool,
}

/// A best-effort, eventually-consistent view of backend storage usage.
///
/// Never treated as authoritative for correctness, only as a heuristic input
/// to eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsageSnapshot {
    pub used_bytes: u64,
    /// `None` when the backend cannot report a quota.
    pub quota_bytes: Option<u64>,
}

impl StorageUsageSnapshot {
    pub fn usage_percent(&self) -> Option<f64> {
        match self.quota_bytes {
            Some(quota) if quota > 0 => Some(self.used_bytes as f64 / quota as f64 * 100.0),
            _ => None,
        }
    }
}

/// Uniform capability over the interchangeable storage implementations.
///
/// Entry ids are the namespaced paths produced by
/// [`CacheKey::relative_path`]; concurrent callers operating on different ids
/// never interfere with each other.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Looks up an entry. `Ok(None)` is an ordinary miss; a record that
    /// exists but cannot be read back yields
    /// [`CacheError::Malformed`](super::CacheError::Malformed).
    async fn get(&self, id: &str) -> CacheContents<Option<StoredEntry>>;

    /// Writes an entry, replacing any previous one under the same key.
    ///
    /// Quota or storage exhaustion is reported as
    /// [`CacheError::QuotaExceeded`](super::CacheError::QuotaExceeded) so the
    /// store can run its eviction-and-retry cycle.
    async fn set(&self, entry: StoredEntry) -> CacheContents<()>;

    /// Deletes an entry. Removing an absent id is not an error.
    async fn delete(&self, id: &str) -> CacheContents<()>;

    /// Enumerates all entries under the cache namespace.
    async fn list(&self) -> CacheContents<Vec<EntryInfo>>;

    async fn usage(&self) -> StorageUsageSnapshot;

    /// Deletes every entry under the cache namespace.
    async fn clear(&self) -> CacheContents<()>;
}

/// Selects the storage backend for this process.
///
/// Backends are probed in priority order, each falling back to the next when
/// unavailable: quota-reporting filesystem store, plain filesystem store,
/// in-memory map. The selection happens once at cache construction;
/// everything above the backend is oblivious to which kind won.
pub fn select_backend(config: &Config) -> Arc<dyn StorageBackend> {
    if let Some(cache_dir) = config.cache_dir.as_deref() {
        if let Some(quota_bytes) = config.cache.quota_bytes {
            match FsBackend::with_quota(cache_dir, quota_bytes) {
                Ok(backend) => return Arc::new(backend),
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        path = %cache_dir.display(),
                        "quota-reporting store unavailable, probing plain store"
                    );
                }
            }
        }
        match FsBackend::plain(cache_dir) {
            Ok(backend) => return Arc::new(backend),
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    path = %cache_dir.display(),
                    "persistent store unavailable, falling back to memory"
                );
            }
        }
    }

    Arc::new(MemoryBackend::new(config.cache.in_memory_capacity))
}

pub(super) fn catch_not_found<F, R>(f: F) -> std::io::Result<Option<R>>
where
    F: FnOnce() -> std::io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            std::io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
