use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the cache service.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Fine-tuning of the result cache.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached payload is considered fresh, counted from the moment
    /// it was written. Expiry is computed at read time; there is no sweeper.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Payloads whose serialized form exceeds this many bytes are compressed
    /// before being stored.
    pub compression_threshold: usize,

    /// Disables payload compression entirely when set to `false`.
    pub enable_compression: bool,

    /// The storage quota (in bytes) the persistent backend is held to.
    ///
    /// When set, the filesystem backend reports meaningful usage against this
    /// ceiling and failed writes trigger quota-aware eviction. When unset,
    /// the backend cannot report a quota and eviction falls back to
    /// [`eviction_ceiling_bytes`](Self::eviction_ceiling_bytes).
    pub quota_bytes: Option<u64>,

    /// Eviction prunes oldest entries until usage falls below this percentage
    /// of the reported quota.
    pub eviction_target_percent: u8,

    /// Absolute byte ceiling used by eviction when the active backend cannot
    /// report a quota.
    pub eviction_ceiling_bytes: u64,

    /// Maximum number of entries held by the in-memory fallback backend.
    pub in_memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            compression_threshold: 10 * 1024,
            enable_compression: true,
            quota_bytes: None,
            eviction_target_percent: 80,
            eviction_ceiling_bytes: 5 * 1024 * 1024,
            in_memory_capacity: 256,
        }
    }
}

/// Service configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to use for persisting cached payloads.
    ///
    /// Leaving this unset disables persistent storage; the cache then runs on
    /// the in-memory backend for the lifetime of the process.
    pub cache_dir: Option<PathBuf>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Fine-tune cache freshness, compression and eviction.
    pub cache: CacheConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            "one of the following strings: off, error, warn, info, debug, trace"
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::invalid_value(de::Unexpected::Str(v), &self)),
        }
    }
}

fn deserialize_level_filter<'de, D>(deserializer: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let result = Config::from_reader("".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache.compression_threshold, 10 * 1024);
        assert_eq!(cfg.cache.eviction_target_percent, 80);
        assert!(cfg.cache_dir.is_none());
    }

    #[test]
    fn test_parse_cache_section() {
        let yaml = r#"
            cache_dir: /tmp/dashcache
            cache:
              ttl: 2m
              quota_bytes: 1048576
              enable_compression: false
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache_dir, Some(PathBuf::from("/tmp/dashcache")));
        assert_eq!(cfg.cache.ttl, Duration::from_secs(120));
        assert_eq!(cfg.cache.quota_bytes, Some(1_048_576));
        assert!(!cfg.cache.enable_compression);
        // untouched fields keep their defaults
        assert_eq!(cfg.cache.eviction_ceiling_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_parse_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }
}
