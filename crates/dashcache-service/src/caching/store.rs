use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Config;

use super::CacheError;
use super::backend::{
    BackendKind, StorageBackend, StorageUsageSnapshot, StoredEntry, select_backend,
};
use super::cache_key::CacheKey;
use super::codec::Codec;
use super::eviction::EvictionPolicy;

/// The outcome of a staleness-aware lookup.
#[derive(Debug)]
pub enum Lookup<T> {
    /// A value younger than the TTL.
    Fresh(T),
    /// A decodable value past its TTL. Only the freshness coordinator serves
    /// these; plain `get` treats them as misses.
    Stale(T),
    Miss,
}

/// Operational statistics, for visibility rather than correctness.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub backend: BackendKind,
    pub entry_count: usize,
    pub oldest_entry_age: Option<Duration>,
    pub newest_entry_age: Option<Duration>,
    pub usage: StorageUsageSnapshot,
}

/// Cleanup accounting reported by [`CacheStore::cleanup`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupStats {
    pub removed_entries: usize,
    pub removed_bytes: u64,
    pub retained_entries: usize,
    pub retained_bytes: u64,
}

/// Composes codec, storage backend and eviction policy into the keyed cache.
///
/// The store is the sole owner of the backend namespace and the only
/// component allowed to mutate it. It never returns an expired or corrupt
/// value: both TTL and decode validation happen on the same call that returns
/// the value. Where data comes from is not its concern; the freshness
/// coordinator layers network awareness on top.
#[derive(Debug)]
pub struct CacheStore {
    backend: Arc<dyn StorageBackend>,
    codec: Codec,
    policy: EvictionPolicy,
    ttl: Duration,
}

impl CacheStore {
    /// Creates a store from configuration, probing for the best available
    /// storage backend.
    pub fn from_config(config: &Config) -> Self {
        Self::with_backend(select_backend(config), config)
    }

    /// Creates a store on an explicitly chosen backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: &Config) -> Self {
        tracing::debug!(backend = %backend.kind(), "cache store initialized");
        Self {
            backend,
            codec: Codec::from_config(&config.cache),
            policy: EvictionPolicy::from_config(&config.cache),
            ttl: config.cache.ttl,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Looks up a value, reporting its freshness.
    ///
    /// Corrupt entries are deleted on detection (the cache self-heals) and
    /// reported as misses. Expired entries are *not* purged here; the
    /// coordinator needs them for stale serving.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Lookup<T> {
        let id = key.relative_path();
        let entry = match self.backend.get(&id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Lookup::Miss,
            Err(error) => {
                tracing::debug!(%key, %error, "removing unreadable cache entry");
                self.remove(key).await;
                return Lookup::Miss;
            }
        };

        let age = entry.age();
        match self.codec.decode(&entry.payload, entry.compressed) {
            Ok(value) if age <= self.ttl => Lookup::Fresh(value),
            Ok(value) => Lookup::Stale(value),
            Err(error) => {
                tracing::debug!(%key, %error, "removing undecodable cache entry");
                self.remove(key).await;
                Lookup::Miss
            }
        }
    }

    /// Looks up a fresh value.
    ///
    /// Expired entries are purged opportunistically and reported as misses;
    /// there is no background sweep that would get to them otherwise.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.lookup(key).await {
            Lookup::Fresh(value) => Some(value),
            Lookup::Stale(_) => {
                self.remove(key).await;
                None
            }
            Lookup::Miss => None,
        }
    }

    /// Writes a value under the given key.
    ///
    /// Failures never propagate: a value that cannot be serialized skips the
    /// write, and a write rejected on quota triggers one eviction-and-retry
    /// cycle before being dropped. The cache is an optimization; a dropped
    /// write only costs a later refetch.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let encoded = match self.codec.encode(value) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(%key, %error, "skipping cache write");
                return;
            }
        };

        let entry = StoredEntry {
            subject: key.subject().to_owned(),
            query_signature: key.query_signature().to_owned(),
            payload: encoded.data,
            compressed: encoded.compressed,
            created_at: SystemTime::now(),
        };

        match self.backend.set(entry.clone()).await {
            Ok(()) => {}
            Err(CacheError::QuotaExceeded) => self.evict_and_retry(key, entry).await,
            Err(error) => {
                tracing::warn!(%key, %error, "cache write failed");
            }
        }
    }

    /// Runs one eviction cycle and retries the write exactly once.
    async fn evict_and_retry(&self, key: &CacheKey, entry: StoredEntry) {
        let usage = self.backend.usage().await;
        let entries = match self.backend.list().await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(%key, %error, "cannot list entries for eviction, dropping write");
                return;
            }
        };

        let selected = self.policy.prune(&entries, usage);
        tracing::debug!(
            %key,
            evicting = selected.len(),
            used_bytes = usage.used_bytes,
            "storage exhausted, evicting oldest entries"
        );
        for id in &selected {
            if let Err(error) = self.backend.delete(id).await {
                tracing::warn!(id = %id, %error, "failed to evict cache entry");
            }
        }

        if let Err(error) = self.backend.set(entry).await {
            tracing::warn!(%key, %error, "cache write dropped after eviction retry");
        }
    }

    /// Deletes the entry for this key. Idempotent.
    pub async fn remove(&self, key: &CacheKey) {
        if let Err(error) = self.backend.delete(&key.relative_path()).await {
            tracing::debug!(%key, %error, "failed to remove cache entry");
        }
    }

    /// Deletes every entry under this cache's namespace.
    pub async fn clear_all(&self) {
        if let Err(error) = self.backend.clear().await {
            tracing::warn!(%error, "failed to clear cache");
        }
    }

    /// Reports entry counts, age bounds and the backend's usage snapshot.
    pub async fn stats(&self) -> CacheStats {
        let usage = self.backend.usage().await;
        let entries = self.backend.list().await.unwrap_or_default();

        let now = SystemTime::now();
        let live = entries.iter().filter(|entry| !entry.corrupt);
        let ages: Vec<Duration> = live
            .map(|entry| now.duration_since(entry.created_at).unwrap_or_default())
            .collect();

        CacheStats {
            backend: self.backend.kind(),
            entry_count: ages.len(),
            oldest_entry_age: ages.iter().max().copied(),
            newest_entry_age: ages.iter().min().copied(),
            usage,
        }
    }

    /// Deletes expired and corrupt entries.
    ///
    /// This is operator-triggered maintenance (the `cleanup` CLI command);
    /// the library itself only ever evicts in response to failed writes.
    pub async fn cleanup(&self, dry_run: bool) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let entries = self.backend.list().await.unwrap_or_default();
        let now = SystemTime::now();

        for entry in entries {
            let age = now.duration_since(entry.created_at).unwrap_or_default();
            if entry.corrupt || age > self.ttl {
                if !dry_run {
                    if let Err(error) = self.backend.delete(&entry.id).await {
                        tracing::warn!(id = %entry.id, %error, "failed to delete cache entry");
                        stats.retained_entries += 1;
                        stats.retained_bytes += entry.size_bytes;
                        continue;
                    }
                }
                stats.removed_entries += 1;
                stats.removed_bytes += entry.size_bytes;
            } else {
                stats.retained_entries += 1;
                stats.retained_bytes += entry.size_bytes;
            }
        }

        stats
    }
}
