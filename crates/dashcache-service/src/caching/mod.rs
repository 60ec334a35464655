//! # Dashboard result caching
//!
//! This module contains the whole client-side caching layer for dashboard
//! query results, our central [`CacheError`] type, and an explanation of how
//! the pieces fit together.
//!
//! ## Layers
//!
//! From the bottom up:
//!
//! - A [`StorageBackend`] holds raw entries. Three implementations exist and
//!   are probed in order at startup by [`select_backend`]: quota-aware
//!   filesystem storage, plain filesystem storage, and a process-local
//!   in-memory map as the last resort. Whichever tier answers the probe first
//!   serves for the rest of the process lifetime.
//! - The [`Codec`] turns values into bytes and back, transparently
//!   zstd-compressing payloads over a size threshold. Whether a payload is
//!   compressed is recorded next to it, never sniffed from the content.
//! - The [`EvictionPolicy`] decides, oldest-first, which entries to drop when
//!   a write runs out of room. It only ever runs in response to a failed
//!   write; there is no periodic sweep.
//! - The [`CacheStore`] composes the three into a keyed store with TTL
//!   expiry. Corrupt entries are deleted the moment they are detected, so a
//!   bad entry costs one miss and never a crash.
//! - The [`FreshnessCoordinator`] sits on top and is the read path callers
//!   actually use: fresh values are served directly, expired values are
//!   served immediately while a single deduplicated background revalidation
//!   fetches a replacement, and misses block on the fetch.
//!
//! ## Error philosophy
//!
//! The cache is an optimization. Failures on the write path are logged and
//! swallowed (a dropped write costs a later refetch), failures on the read
//! path degrade to a miss, and the only errors that reach callers are fetch
//! errors on a cold read, where there is nothing to fall back on.

mod backend;
mod cache_error;
mod cache_key;
mod codec;
mod coordinator;
mod eviction;
mod store;


pub use backend::{
    BackendKind, EntryInfo, FsBackend, MemoryBackend, StorageBackend, StorageUsageSnapshot,
    StoredEntry, select_backend,
};
pub use cache_error::{CacheContents, CacheError};
pub use cache_key::{CacheKey, SignatureBuilder};
pub use codec::{Codec, EncodedPayload};
pub use coordinator::{FreshnessCoordinator, ReadOptions};
pub use eviction::EvictionPolicy;
pub use store::{CacheStats, CacheStore, CleanupStats, Lookup};
