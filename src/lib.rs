//! # spanstore
//!
//! Span ingestion for wide-column stores that only support primary-key range
//! scans.
//!
//! Every span is written as a fact row keyed by trace id, plus denormalized
//! rows that let traces be found by service name, span name, annotation and
//! duration:
//!
//! | Table | Finds traces by |
//! |-------|-----------------|
//! | `traces` | trace id |
//! | `service_names`, `span_names` | (lists services and their span names) |
//! | `service_name_index` | service |
//! | `service_span_name_index` | service and span name |
//! | `annotations_index` | annotation value or binary annotation key |
//! | `span_duration_index` | service, span name and duration range |
//!
//! ## Quick Start
//!
//! ```ignore
//! use spanstore::prelude::*;
//!
//! let store = SpanStore::builder()
//!     .session(session)
//!     .config(ConsumerConfig::new().bucket_count(10))
//!     .open()?;
//!
//! // One ingester per worker
//! let mut ingester = store.ingester();
//! ingester.accept(spans).await?;
//! ```
//!
//! ## Consistency
//!
//! Rows are written independently. A failed batch may leave some of its
//! rows written; retrying the batch rewrites them idempotently. There is no
//! atomicity across rows.
//!
//! ## Crates
//!
//! - [`spanstore_core`]: span model, normalization, derived keys, codecs
//! - [`storage`]: tables, statements, sessions, bucketing, TTL policy
//! - [`engine`]: index writers, dedup cache, ingest pipeline

#![warn(missing_docs)]
#![warn(clippy::all)]

mod store;

pub mod prelude;

pub use spanstore_engine as engine;
pub use spanstore_storage as storage;

pub use spanstore_core::{
    Annotation, AnnotationType, BinaryAnnotation, Endpoint, Error, JsonCodec, MsgPackCodec,
    Result, Span, SpanCodec,
};
pub use store::{SpanStore, SpanStoreBuilder, DEFAULT_KEYSPACE};
