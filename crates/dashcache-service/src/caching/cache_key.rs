use std::fmt::{self, Display, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Fixed prefix namespacing every persisted cache entry.
///
/// No other subsystem may write under this prefix.
pub const KEY_PREFIX: &str = "dashboard";

/// Signatures longer than this are hashed down to a hex token so persisted
/// ids stay bounded regardless of how many parameters a query carries.
const MAX_PLAIN_SIGNATURE: usize = 96;

/// Identifies one cacheable query result.
///
/// A key is the composite of the `subject` the result is scoped to (e.g. a
/// user id) and a deterministic `query_signature` describing the query
/// parameters. Two logically identical queries must produce byte-identical
/// signatures; that determinism is the caller's responsibility, typically
/// upheld by deriving signatures through [`SignatureBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    subject: Arc<str>,
    query_signature: Arc<str>,
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.query_signature)
    }
}

impl CacheKey {
    pub fn new(subject: impl Into<Arc<str>>, query_signature: impl Into<Arc<str>>) -> Self {
        Self {
            subject: subject.into(),
            query_signature: query_signature.into(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn query_signature(&self) -> &str {
        &self.query_signature
    }

    /// Returns the namespaced storage id for this key.
    ///
    /// The id doubles as the relative file path in the filesystem backends
    /// and as the map key in the in-memory backend:
    /// `dashboard/{subject}/{query_signature}`, with both segments sanitized.
    pub fn relative_path(&self) -> String {
        let subject = safe_path_segment(&self.subject);
        let signature = safe_path_segment(&self.query_signature);
        format!("{KEY_PREFIX}/{subject}/{signature}")
    }
}

/// A builder for deterministic query signatures.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the
/// intention of it is to accept human readable, but most importantly
/// **stable**, input: parameter names and values in a fixed order. Short
/// signatures stay readable as-is; anything long or path-hostile is
/// SHA256-hashed into a fixed-width hex token.
#[derive(Debug, Default)]
pub struct SignatureBuilder {
    text: String,
}

impl SignatureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes one named query parameter into the signature.
    pub fn write_param(&mut self, name: &str, value: impl Display) -> fmt::Result {
        if !self.text.is_empty() {
            self.text.push(';');
        }
        write!(self.text, "{name}={value}")
    }

    /// Finalize the signature.
    pub fn build(self) -> String {
        let needs_hashing = self.text.len() > MAX_PLAIN_SIGNATURE
            || self
                .text
                .bytes()
                .any(|b| !b.is_ascii_alphanumeric() && !matches!(b, b'-' | b'_' | b';' | b'='));

        if needs_hashing {
            let hash = Sha256::digest(self.text.as_bytes());
            let mut token = String::with_capacity(64);
            for b in hash {
                write!(token, "{b:02x}").expect("writing to a String never fails");
            }
            token
        } else {
            self.text
        }
    }
}

impl fmt::Write for SignatureBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.write_str(s)
    }
}

/// Protect against:
/// * ".."
/// * absolute paths
/// * ":" (not a threat on POSIX filesystems, but confuses OS X Finder)
fn safe_path_segment(s: &str) -> String {
    s.replace(['.', '/', '\\', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path() {
        let key = CacheKey::new("u1", "30_days");
        assert_eq!(key.relative_path(), "dashboard/u1/30_days");

        // hostile segments are defanged
        let key = CacheKey::new("../u1", "a/b:c");
        assert_eq!(key.relative_path(), "dashboard/___u1/a_b_c");
    }

    #[test]
    fn test_signature_stability() {
        let build = || {
            let mut builder = SignatureBuilder::new();
            builder.write_param("range", "30_days").unwrap();
            builder.write_param("status", "open").unwrap();
            builder.build()
        };
        assert_eq!(build(), build());
        assert_eq!(build(), "range=30_days;status=open");
    }

    #[test]
    fn test_long_signature_is_hashed() {
        let mut builder = SignatureBuilder::new();
        for i in 0..32 {
            builder.write_param("filter", i).unwrap();
        }
        let signature = builder.build();
        assert_eq!(signature.len(), 64);
        assert!(signature.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unsafe_signature_is_hashed() {
        let mut builder = SignatureBuilder::new();
        builder.write_param("range", "2024-01-01..2024-03-31").unwrap();
        let signature = builder.build();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_keys_compare_by_both_parts() {
        assert_ne!(CacheKey::new("u1", "30_days"), CacheKey::new("u2", "30_days"));
        assert_ne!(CacheKey::new("u1", "30_days"), CacheKey::new("u1", "7_days"));
        assert_eq!(CacheKey::new("u1", "30_days"), CacheKey::new("u1", "30_days"));
    }
}
