use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::caching::{CacheContents, CacheError};

use super::{BackendKind, EntryInfo, StorageBackend, StorageUsageSnapshot, StoredEntry};

/// Last-resort in-memory storage, used when no persistent store is available.
///
/// Holds entries only for the current process lifetime and is bounded by
/// entry count rather than bytes. A full map rejects new keys with
/// [`CacheError::QuotaExceeded`], which routes through the same
/// eviction-and-retry cycle as the persistent backends.
#[derive(Debug)]
pub struct MemoryBackend {
    max_entries: usize,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, id: &str) -> CacheContents<Option<StoredEntry>> {
        Ok(self.entries.lock().unwrap().get(id).cloned())
    }

    async fn set(&self, entry: StoredEntry) -> CacheContents<()> {
        let id = entry.key().relative_path();
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&id) && entries.len() >= self.max_entries {
            return Err(CacheError::QuotaExceeded);
        }
        entries.insert(id, entry);
        Ok(())
    }

    async fn delete(&self, id: &str) -> CacheContents<()> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list(&self) -> CacheContents<Vec<EntryInfo>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .map(|(id, entry)| EntryInfo {
                id: id.clone(),
                created_at: entry.created_at,
                size_bytes: entry.size_bytes(),
                corrupt: false,
            })
            .collect())
    }

    async fn usage(&self) -> StorageUsageSnapshot {
        let entries = self.entries.lock().unwrap();
        StorageUsageSnapshot {
            used_bytes: entries.values().map(StoredEntry::size_bytes).sum(),
            quota_bytes: None,
        }
    }

    async fn clear(&self) -> CacheContents<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}
