use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::caching::cache_key::KEY_PREFIX;
use crate::caching::{CacheContents, CacheError};

use super::{
    BackendKind, EntryInfo, StorageBackend, StorageUsageSnapshot, StoredEntry, catch_not_found,
};

/// Sidecar record persisted next to each payload file.
///
/// The payload file holds the (possibly compressed) bytes; everything needed
/// to interpret them lives here. A payload whose sidecar is missing or
/// unparsable is a corrupt entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    subject: String,
    query_signature: String,
    compressed: bool,
    created_at: SystemTime,
}

/// Persistent filesystem storage.
///
/// Entries live under `{base_dir}/dashboard/{subject}/{signature}`, written
/// via a temp file in a sibling `tmp` directory and atomically persisted.
/// The quota-reporting flavor checks writes against a configured byte quota;
/// the plain flavor stores identically but cannot report a ceiling.
#[derive(Debug)]
pub struct FsBackend {
    base_dir: PathBuf,
    tmp_dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FsBackend {
    /// Creates the quota-reporting flavor.
    pub fn with_quota(base_dir: &Path, quota_bytes: u64) -> io::Result<Self> {
        Self::new(base_dir, Some(quota_bytes))
    }

    /// Creates the plain flavor; `usage()` will report an unknown quota.
    pub fn plain(base_dir: &Path) -> io::Result<Self> {
        Self::new(base_dir, None)
    }

    fn new(base_dir: &Path, quota_bytes: Option<u64>) -> io::Result<Self> {
        let base_dir = base_dir.to_path_buf();
        let tmp_dir = base_dir.join("tmp");
        fs::create_dir_all(base_dir.join(KEY_PREFIX))?;
        fs::create_dir_all(&tmp_dir)?;

        // Capability probe: storage that cannot take a write right now is no
        // use as a cache and the next tier should be tried instead.
        let mut probe = NamedTempFile::new_in(&tmp_dir)?;
        probe.write_all(b"probe")?;
        probe.as_file().sync_all()?;

        Ok(Self {
            base_dir,
            tmp_dir,
            quota_bytes,
        })
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    fn namespace_dir(&self) -> PathBuf {
        self.base_dir.join(KEY_PREFIX)
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    fn kind(&self) -> BackendKind {
        match self.quota_bytes {
            Some(_) => BackendKind::QuotaFs,
            None => BackendKind::PlainFs,
        }
    }

    async fn get(&self, id: &str) -> CacheContents<Option<StoredEntry>> {
        let path = self.entry_path(id);
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let raw_metadata = match tokio::fs::read(metadata_path(&path)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::Malformed("metadata sidecar missing".into()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: Metadata = serde_json::from_slice(&raw_metadata)
            .map_err(|e| CacheError::Malformed(e.to_string()))?;

        Ok(Some(StoredEntry {
            subject: metadata.subject,
            query_signature: metadata.query_signature,
            payload,
            compressed: metadata.compressed,
            created_at: metadata.created_at,
        }))
    }

    async fn set(&self, entry: StoredEntry) -> CacheContents<()> {
        if let Some(quota_bytes) = self.quota_bytes {
            let usage = self.usage().await;
            if usage.used_bytes + entry.size_bytes() > quota_bytes {
                return Err(CacheError::QuotaExceeded);
            }
        }

        let path = self.entry_path(&entry.key().relative_path());
        let metadata = Metadata {
            subject: entry.subject,
            query_signature: entry.query_signature,
            compressed: entry.compressed,
            created_at: entry.created_at,
        };

        let mut temp_file = NamedTempFile::new_in(&self.tmp_dir)?;
        temp_file.write_all(&entry.payload)?;
        persist_tempfile(temp_file, &path)?;

        // The sidecar is written after the payload; a crash in between leaves
        // a payload without metadata, which reads back as corrupt and is
        // self-healed on the next lookup.
        let raw_metadata = serde_json::to_vec(&metadata).map_err(CacheError::from_std_error)?;
        tokio::fs::write(metadata_path(&path), raw_metadata).await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> CacheContents<()> {
        let path = self.entry_path(id);
        catch_not_found(|| fs::remove_file(&path))?;
        catch_not_found(|| fs::remove_file(metadata_path(&path)))?;
        Ok(())
    }

    async fn list(&self) -> CacheContents<Vec<EntryInfo>> {
        let mut entries = Vec::new();
        collect_entries(&self.base_dir, &self.namespace_dir(), &mut entries)?;
        Ok(entries)
    }

    async fn usage(&self) -> StorageUsageSnapshot {
        StorageUsageSnapshot {
            used_bytes: directory_size(&self.namespace_dir()).unwrap_or_default(),
            quota_bytes: self.quota_bytes,
        }
    }

    async fn clear(&self) -> CacheContents<()> {
        let namespace = self.namespace_dir();
        catch_not_found(|| fs::remove_dir_all(&namespace))?;
        fs::create_dir_all(&namespace)?;
        Ok(())
    }
}

fn metadata_path(path: &Path) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".meta");
    PathBuf::from(os_string)
}

/// Recursively collects entry listings below `dir`.
///
/// Ids are paths relative to `base`, matching what [`CacheKey::relative_path`]
/// produces. Sidecar files are folded into their payload's listing; a payload
/// with a missing or unparsable sidecar is reported corrupt, with the file
/// mtime standing in for its creation time.
///
/// [`CacheKey::relative_path`]: crate::caching::CacheKey::relative_path
fn collect_entries(base: &Path, dir: &Path, out: &mut Vec<EntryInfo>) -> io::Result<()> {
    let Some(read_dir) = catch_not_found(|| fs::read_dir(dir))? else {
        return Ok(());
    };

    for dir_entry in read_dir {
        let path = dir_entry?.path();
        if path.is_dir() {
            collect_entries(base, &path, out)?;
            continue;
        }
        if path.extension().is_some_and(|ext| ext == "meta") {
            continue;
        }

        let Some(fs_metadata) = catch_not_found(|| path.metadata())? else {
            continue;
        };
        let size_bytes = fs_metadata.len();

        let sidecar = fs::read(metadata_path(&path))
            .ok()
            .and_then(|raw| serde_json::from_slice::<Metadata>(&raw).ok());

        let id = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();

        match sidecar {
            Some(metadata) => out.push(EntryInfo {
                id,
                created_at: metadata.created_at,
                size_bytes,
                corrupt: false,
            }),
            None => out.push(EntryInfo {
                id,
                created_at: fs_metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size_bytes,
                corrupt: true,
            }),
        }
    }

    Ok(())
}

fn directory_size(dir: &Path) -> io::Result<u64> {
    let Some(read_dir) = catch_not_found(|| fs::read_dir(dir))? else {
        return Ok(0);
    };

    let mut total = 0;
    for dir_entry in read_dir {
        let path = dir_entry?.path();
        if path.is_dir() {
            total += directory_size(&path)?;
        } else if let Some(metadata) = catch_not_found(|| path.metadata())? {
            total += metadata.len();
        }
    }
    Ok(total)
}

fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<()> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    // `clear` could potentially remove the parent directories we are
    // operating in, so retry the fs operations.
    const MAX_RETRIES: usize = 2;
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %parent.display(),
                "Failed to create cache directory"
            );
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(_) => return Ok(()),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!(
                    error = &err as &dyn std::error::Error,
                    path = %cache_path.display(),
                    "Failed to persist cache file"
                );
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}
