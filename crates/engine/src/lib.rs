//! Write path for spanstore
//!
//! This crate turns batches of spans into fact, dimension and index rows:
//! - [`SpanConsumer`] / [`SpanIngester`]: the ingest pipeline
//! - [`IndexWriters`]: one insert per row kind
//! - [`WriteDedupCache`]: per-worker suppression of repeated dimension rows
//! - [`ConsumerConfig`] and [`ConsumerMetrics`]
//!
//! Writes across rows are best-effort and eventually consistent. There is no
//! atomicity across rows; a failed batch may leave some of its rows written,
//! and retrying it rewrites them idempotently.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod consumer;
pub mod dedup;
pub mod metrics;
pub mod writers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConsumerConfig;
pub use consumer::{BatchFuture, SpanConsumer, SpanConsumerBuilder, SpanIngester};
pub use dedup::{service_key, span_name_key, DedupRevert, MarkGuard, WriteDedupCache};
pub use metrics::{ConsumerMetrics, MetricsSnapshot};
pub use writers::{IndexWriters, WriteFuture, SPAN_NAME_BUCKET};
