//! Consumer configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! bucket_count = 10
//! span_ttl_seconds = 604800
//! index_ttl_seconds = 259200
//! dedup_window_ms = 3600000
//! max_indexable_value_bytes = 65535
//! duration_bucket_micros = 86400000000
//! ```
//!
//! The two TTLs only apply to tables without a server-side default.

use serde::{Deserialize, Serialize};
use spanstore_core::{Error, Result};
use spanstore_storage::{DAY_MICROS, MIN_DURATION_WINDOW_MICROS};
use std::path::Path;

/// Default number of random buckets per indexed partition.
pub const DEFAULT_BUCKET_COUNT: u32 = 10;
/// Default fact row expiration: 7 days.
pub const DEFAULT_SPAN_TTL_SECONDS: u32 = 7 * 24 * 60 * 60;
/// Default index and dimension row expiration: 3 days.
pub const DEFAULT_INDEX_TTL_SECONDS: u32 = 3 * 24 * 60 * 60;
/// Default dedup window: 1 hour.
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 60 * 60 * 1000;
/// Longest annotation key written to the annotation index: the store's
/// 16-bit length limit on a partition key component.
pub const DEFAULT_MAX_INDEXABLE_VALUE_BYTES: usize = u16::MAX as usize;

/// Settings of a span consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Random buckets per service-name and annotation partition
    pub bucket_count: u32,
    /// Fact row TTL when `traces` has no default
    pub span_ttl_seconds: u32,
    /// Index and dimension row TTL when the table has no default
    pub index_ttl_seconds: u32,
    /// Dedup cache window
    pub dedup_window_ms: u64,
    /// Annotation keys longer than this are rejected, not indexed. Counts the
    /// UTF-8 bytes of the whole key as written, `service:key` or
    /// `service:key:value`
    pub max_indexable_value_bytes: usize,
    /// Duration index bucket width, at least [`MIN_DURATION_WINDOW_MICROS`]
    pub duration_bucket_micros: i64,
}

impl ConsumerConfig {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML. Missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(Error::Config("bucket_count must be positive".into()));
        }
        if self.dedup_window_ms == 0 {
            return Err(Error::Config("dedup_window_ms must be positive".into()));
        }
        if self.duration_bucket_micros < MIN_DURATION_WINDOW_MICROS {
            return Err(Error::Config(format!(
                "duration_bucket_micros must be at least {}",
                MIN_DURATION_WINDOW_MICROS
            )));
        }
        if self.max_indexable_value_bytes == 0 {
            return Err(Error::Config("max_indexable_value_bytes must be positive".into()));
        }
        Ok(())
    }

    /// Set the bucket count.
    pub fn bucket_count(mut self, count: u32) -> Self {
        self.bucket_count = count;
        self
    }

    /// Set the fact row TTL.
    pub fn span_ttl_seconds(mut self, seconds: u32) -> Self {
        self.span_ttl_seconds = seconds;
        self
    }

    /// Set the index row TTL.
    pub fn index_ttl_seconds(mut self, seconds: u32) -> Self {
        self.index_ttl_seconds = seconds;
        self
    }

    /// Set the dedup window.
    pub fn dedup_window_ms(mut self, millis: u64) -> Self {
        self.dedup_window_ms = millis;
        self
    }

    /// Set the longest indexable annotation key.
    pub fn max_indexable_value_bytes(mut self, bytes: usize) -> Self {
        self.max_indexable_value_bytes = bytes;
        self
    }

    /// Set the duration index bucket width.
    pub fn duration_bucket_micros(mut self, micros: i64) -> Self {
        self.duration_bucket_micros = micros;
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BUCKET_COUNT,
            span_ttl_seconds: DEFAULT_SPAN_TTL_SECONDS,
            index_ttl_seconds: DEFAULT_INDEX_TTL_SECONDS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            max_indexable_value_bytes: DEFAULT_MAX_INDEXABLE_VALUE_BYTES,
            duration_bucket_micros: DAY_MICROS,
        }
    }
}
