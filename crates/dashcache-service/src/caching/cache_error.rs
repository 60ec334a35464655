use std::io;

use thiserror::Error;

/// The error taxonomy of the caching layer.
///
/// Every failure the cache can encounter maps to exactly one of these
/// variants. Only [`Fetch`](Self::Fetch) ever crosses the coordinator
/// boundary towards a caller; all other variants are recovered locally and
/// degrade to cache-miss semantics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No entry exists for the requested key.
    #[error("not found")]
    NotFound,
    /// A stored record could not be read back, either because its payload
    /// fails to decode or because its metadata is unparsable.
    ///
    /// Detection of this variant deletes the offending entry.
    #[error("malformed: {0}")]
    Malformed(String),
    /// The value could not be serialized for storage. The write is skipped
    /// and the cache is left unchanged.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The storage backend rejected a write due to a reported or inferred
    /// quota/storage exhaustion condition.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    /// A blocking fetch performed on behalf of the caller failed.
    ///
    /// This is the only variant surfaced as a user-facing error state.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// An unexpected error in the cache itself, e.g. filesystem access
    /// failures outside the quota path.
    #[error("internal error")]
    InternalError,
}

impl From<io::Error> for CacheError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => Self::QuotaExceeded,
            _ => Self::from_std_error(err),
        }
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The result of a cache operation, containing either `Ok(T)` or the
/// [`CacheError`] describing why no usable value exists.
pub type CacheContents<T = ()> = Result<T, CacheError>;
