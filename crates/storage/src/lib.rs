//! Storage layer for spanstore
//!
//! This crate models the wide-column store the span consumer writes to:
//! - Table layout and schema metadata
//! - Sortable timestamp encoding for clustering columns
//! - Random and time-window partition bucketing
//! - Prepared and bound insert statements
//! - The [`Session`] contract and an in-memory implementation
//! - Per-table TTL resolution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucketing;
pub mod error;
pub mod memory;
pub mod schema;
pub mod session;
pub mod statement;
pub mod timestamp;
pub mod ttl;

pub use bucketing::{
    BucketingStrategy, DurationBuckets, RandomBuckets, DAY_MICROS, MIN_DURATION_WINDOW_MICROS,
};
pub use error::{StoreError, StoreResult};
pub use memory::{MemorySession, StoredRow};
pub use schema::{SchemaMetadata, Table, TableOptions, COMPACTION_CLASS, DEFAULT_TIME_TO_LIVE};
pub use session::{ExecuteFuture, Session};
pub use statement::{BoundStatement, CqlValue, PreparedStatement, TTL_MARKER};
pub use timestamp::{EncodedTimestamp, TimestampCodec, ENCODED_TIMESTAMP_LEN};
pub use ttl::{TableTtl, TtlPolicy};
