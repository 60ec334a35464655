use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;

use super::{CacheContents, CacheError};

/// An encoded payload, ready for storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: Vec<u8>,
    pub compressed: bool,
}

/// De/serializes payloads for storage, transparently compressing large ones.
///
/// The codec is pure and performs no I/O. Whether a payload was compressed is
/// recorded in the entry's `compressed` flag; [`decode`](Codec::decode)
/// inverts exactly the path [`encode`](Codec::encode) took based on that flag
/// and never sniffs the stored bytes.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    compression_threshold: usize,
    enable_compression: bool,
}

impl Codec {
    pub fn new(compression_threshold: usize, enable_compression: bool) -> Self {
        Self {
            compression_threshold,
            enable_compression,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.compression_threshold, config.enable_compression)
    }

    /// Serializes a value, compressing it when it exceeds the configured
    /// threshold.
    ///
    /// A value that cannot be serialized yields
    /// [`CacheError::Serialization`]; the caller skips the write and the
    /// cache is left unchanged. A failing compressor is not fatal, the
    /// payload is stored uncompressed instead.
    pub fn encode<T: Serialize>(&self, value: &T) -> CacheContents<EncodedPayload> {
        let text = serde_json::to_vec(value)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        if self.enable_compression && text.len() > self.compression_threshold {
            match zstd::encode_all(text.as_slice(), 0) {
                Ok(data) => {
                    return Ok(EncodedPayload {
                        data,
                        compressed: true,
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        error = &error as &dyn std::error::Error,
                        "compression failed, storing payload uncompressed"
                    );
                }
            }
        }

        Ok(EncodedPayload {
            data: text,
            compressed: false,
        })
    }

    /// Decodes a stored payload back into a value.
    ///
    /// Malformed or truncated input fails closed with
    /// [`CacheError::Malformed`], which upstream treats as a cache miss.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8], compressed: bool) -> CacheContents<T> {
        let text;
        let bytes = if compressed {
            text = zstd::decode_all(data).map_err(|e| CacheError::Malformed(e.to_string()))?;
            text.as_slice()
        } else {
            data
        };

        serde_json::from_slice(bytes).map_err(|e| CacheError::Malformed(e.to_string()))
    }
}
