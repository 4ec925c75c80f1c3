//! Span ingest pipeline
//!
//! [`SpanConsumer`] holds everything that is fixed once the consumer is
//! built: session, prepared statements, TTL policy, bucketing, codec and
//! counters. It is shared behind an `Arc`.
//!
//! [`SpanIngester`] is one worker's handle on a consumer. It owns that
//! worker's [`WriteDedupCache`], so dimension rows are deduplicated per
//! worker without locking.
//!
//! # Fan-out
//!
//! For each span in a batch, after normalizing its timestamp and duration:
//!
//! | Row | Written when |
//! |-----|--------------|
//! | fact | always |
//! | service dimension | per service, first time in the dedup window |
//! | span-name dimension | per service, span named, first time in the window |
//! | service-name index | per service, timestamp known |
//! | span-name index | per service, timestamp known, span named |
//! | duration index | per service, timestamp and duration known; again with an empty name if named |
//! | annotation index | per annotation key, timestamp known |
//!
//! Writes are dispatched as the batch is walked. The batch future resolves
//! to the first failure observed, or success once every write succeeded.
//! Writes are best-effort and independent: nothing already written is
//! rolled back, and writes still in flight after a failure are left to
//! finish.

use crate::clock::{Clock, SystemClock};
use crate::config::ConsumerConfig;
use crate::dedup::{service_key, span_name_key, MarkGuard, WriteDedupCache};
use crate::metrics::{ConsumerMetrics, MetricsSnapshot};
use crate::writers::{IndexWriters, WriteFuture};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use spanstore_core::{
    annotation_keys, apply_timestamp_and_duration, service_names, uniqueness_key, Error,
    MsgPackCodec, Result, Span, SpanCodec,
};
use spanstore_storage::{
    BucketingStrategy, DurationBuckets, RandomBuckets, SchemaMetadata, Session, TtlPolicy,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one batch.
pub type BatchFuture = BoxFuture<'static, Result<()>>;

// ============================================================================
// SpanConsumer
// ============================================================================

/// Shared half of the ingest pipeline.
pub struct SpanConsumer {
    writers: IndexWriters,
    schema: SchemaMetadata,
    config: ConsumerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<ConsumerMetrics>,
    zero_timestamp_warned: AtomicBool,
}

impl SpanConsumer {
    /// Start building a consumer over `session`.
    pub fn builder(session: Arc<dyn Session>) -> SpanConsumerBuilder {
        SpanConsumerBuilder::new(session)
    }

    /// A new worker with its own dedup cache.
    pub fn ingester(self: &Arc<Self>) -> SpanIngester {
        SpanIngester {
            consumer: Arc::clone(self),
            dedup: WriteDedupCache::new(Arc::clone(&self.clock), self.config.dedup_window_ms),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Resolved expiration policy.
    pub fn ttl_policy(&self) -> &TtlPolicy {
        self.writers.ttl_policy()
    }

    /// Schema facts read at build time.
    pub fn schema(&self) -> &SchemaMetadata {
        &self.schema
    }

    /// Row writers.
    pub fn writers(&self) -> &IndexWriters {
        &self.writers
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn warn_zero_timestamp(&self, span: &Span) {
        if !self.schema.time_windowed_compaction() {
            return;
        }
        if self.zero_timestamp_warned.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            trace_id = span.trace_id,
            span_id = span.id,
            compaction = %self.schema.compaction_class,
            "span has no timestamp; if this happens a lot consider switching back to \
             SizeTieredCompactionStrategy for traces"
        );
    }
}

impl std::fmt::Debug for SpanConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanConsumer")
            .field("writers", &self.writers)
            .field("schema", &self.schema)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SpanConsumer`].
///
/// ```ignore
/// let consumer = SpanConsumer::builder(session)
///     .config(ConsumerConfig::new().bucket_count(4))
///     .build()?;
/// let mut ingester = consumer.ingester();
/// ingester.accept(spans).await?;
/// ```
pub struct SpanConsumerBuilder {
    session: Arc<dyn Session>,
    config: ConsumerConfig,
    codec: Arc<dyn SpanCodec>,
    clock: Arc<dyn Clock>,
    bucket_seed: Option<u64>,
}

impl SpanConsumerBuilder {
    /// Defaults: default config, MessagePack codec, system clock.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            config: ConsumerConfig::default(),
            codec: Arc::new(MsgPackCodec),
            clock: Arc::new(SystemClock),
            bucket_seed: None,
        }
    }

    /// Use `config`.
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Encode fact rows with `codec`.
    pub fn codec(mut self, codec: Arc<dyn SpanCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Read dedup windows from `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed the random bucket generator, for reproducible placement.
    pub fn bucket_seed(mut self, seed: u64) -> Self {
        self.bucket_seed = Some(seed);
        self
    }

    /// Read schema metadata, resolve TTLs and prepare statements.
    ///
    /// Fails on invalid configuration or unreadable metadata.
    pub fn build(self) -> Result<Arc<SpanConsumer>> {
        self.config.validate()?;
        let config = self.config;

        let bucket_count = NonZeroU32::new(config.bucket_count)
            .ok_or_else(|| Error::Config("bucket_count must be positive".into()))?;
        let random = match self.bucket_seed {
            Some(seed) => RandomBuckets::seeded(bucket_count, seed),
            None => RandomBuckets::new(bucket_count),
        };
        let duration = DurationBuckets::new(config.duration_bucket_micros)
            .ok_or_else(|| Error::Config("duration_bucket_micros below minimum window".into()))?;

        let schema = SchemaMetadata::read(self.session.as_ref())?;
        let ttl = TtlPolicy::resolve(
            self.session.as_ref(),
            config.span_ttl_seconds,
            config.index_ttl_seconds,
        )?;

        let metrics = Arc::new(ConsumerMetrics::new());
        let writers = IndexWriters::new(
            Arc::clone(&self.session),
            ttl,
            BucketingStrategy::new(random, duration),
            self.codec,
            Arc::clone(&metrics),
            config.max_indexable_value_bytes,
        );

        info!(
            keyspace = self.session.keyspace(),
            bucket_count = config.bucket_count,
            compaction = %schema.compaction_class,
            "span consumer ready"
        );

        Ok(Arc::new(SpanConsumer {
            writers,
            schema,
            config,
            clock: self.clock,
            metrics,
            zero_timestamp_warned: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// SpanIngester
// ============================================================================

/// One worker's entry point into a [`SpanConsumer`].
#[derive(Debug)]
pub struct SpanIngester {
    consumer: Arc<SpanConsumer>,
    dedup: WriteDedupCache,
}

impl SpanIngester {
    /// Dispatch every row for `spans` and return the batch outcome.
    ///
    /// All writes are dispatched before this returns; the future only
    /// collects their outcomes. It fails with [`Error::Batch`] carrying the
    /// first failure observed.
    pub fn accept(&mut self, spans: Vec<Span>) -> BatchFuture {
        let consumer = Arc::clone(&self.consumer);
        consumer.metrics.record_spans(spans.len());

        let mut pending: FuturesUnordered<WriteFuture> = FuturesUnordered::new();
        for span in spans {
            self.dispatch_span(&consumer, span, &mut pending);
        }
        let dispatched = pending.len();
        debug!(writes = dispatched, "batch dispatched");

        let metrics = Arc::clone(&consumer.metrics);
        Box::pin(async move {
            let outcome = settle(pending, dispatched).await;
            if outcome.is_err() {
                metrics.record_batch_failed();
            }
            outcome
        })
    }

    /// The consumer this worker feeds.
    pub fn consumer(&self) -> &Arc<SpanConsumer> {
        &self.consumer
    }

    /// This worker's dedup cache.
    pub fn dedup_cache(&mut self) -> &mut WriteDedupCache {
        &mut self.dedup
    }

    fn dispatch_span(
        &mut self,
        consumer: &SpanConsumer,
        span: Span,
        pending: &mut FuturesUnordered<WriteFuture>,
    ) {
        let writers = &consumer.writers;
        let span = apply_timestamp_and_duration(span);
        let key = uniqueness_key(&span);

        let timestamp = span.timestamp.unwrap_or(0);
        if timestamp == 0 {
            consumer.warn_zero_timestamp(&span);
        }
        pending.push(writers.store_span(&span, timestamp, &key));

        for service in service_names(&span) {
            match self.dedup.try_guard(service_key(&service)) {
                Some(guard) => {
                    pending.push(keep_on_success(writers.store_service_name(&service), guard));
                }
                None => consumer.metrics.record_skip(),
            }

            if !span.name.is_empty() {
                match self.dedup.try_guard(span_name_key(&service, &span.name)) {
                    Some(guard) => {
                        let write = writers.store_span_name(&service, &span.name);
                        pending.push(keep_on_success(write, guard));
                    }
                    None => consumer.metrics.record_skip(),
                }
            }

            let Some(ts) = span.timestamp else {
                continue;
            };
            pending.push(writers.store_trace_id_by_service_name(&service, ts, span.trace_id));

            if !span.name.is_empty() {
                pending.push(writers.store_trace_id_by_span_name(
                    &service,
                    &span.name,
                    ts,
                    span.trace_id,
                ));
            }

            if let Some(duration) = span.duration {
                pending.push(writers.store_trace_id_by_duration(
                    &service,
                    &span.name,
                    ts,
                    duration,
                    span.trace_id,
                ));
                if !span.name.is_empty() {
                    pending.push(writers.store_trace_id_by_duration(
                        &service,
                        "",
                        ts,
                        duration,
                        span.trace_id,
                    ));
                }
            }
        }

        if let Some(ts) = span.timestamp {
            for annotation in annotation_keys(&span) {
                pending.push(writers.store_trace_id_by_annotation(&annotation, ts, span.trace_id));
            }
        }
    }
}

/// Keep the dedup mark only if `write` is seen to succeed. A failure, or
/// dropping this future before it resolves, reverts the mark.
fn keep_on_success(write: WriteFuture, guard: MarkGuard) -> WriteFuture {
    Box::pin(async move {
        let outcome = write.await;
        if outcome.is_ok() {
            guard.keep();
        }
        outcome
    })
}

/// Resolve to the first failure, or success once everything succeeded.
async fn settle(mut pending: FuturesUnordered<WriteFuture>, dispatched: usize) -> Result<()> {
    while let Some(outcome) = pending.next().await {
        if let Err(first) = outcome {
            drain(pending);
            return Err(Error::Batch {
                dispatched,
                first: Box::new(first),
            });
        }
    }
    Ok(())
}

/// Let writes still in flight finish, so their failures revert dedup marks.
fn drain(pending: FuturesUnordered<WriteFuture>) {
    if pending.is_empty() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(pending.for_each(|_| async {}));
        }
        Err(_) => {
            warn!(
                outstanding = pending.len(),
                "no runtime to drain outstanding writes; their dedup marks are reverted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use spanstore_core::{Annotation, BinaryAnnotation, Endpoint};
    use spanstore_storage::{
        MemorySession, StoreError, Table, TableOptions, COMPACTION_CLASS, DEFAULT_TIME_TO_LIVE,
    };

    const TS: i64 = 1_500_000_000_000_000;

    fn consumer(session: &Arc<MemorySession>) -> Arc<SpanConsumer> {
        SpanConsumer::builder(session.clone())
            .clock(Arc::new(ManualClock::new(0)))
            .bucket_seed(3)
            .build()
            .unwrap()
    }

    fn web_span(name: &str) -> Span {
        let web = Endpoint::service("web");
        Span::new(1, 2, name)
            .annotate(Annotation::new(TS, "cs", Some(web.clone())))
            .annotate(Annotation::new(TS + 100, "cr", Some(web)))
    }

    #[tokio::test]
    async fn test_normalizes_before_writing() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        ingester.accept(vec![web_span("get")]).await.unwrap();

        // Timestamp derived from annotations, so index rows exist
        assert_eq!(session.row_count(Table::ServiceNameIndex), 1);
        // Duration derived from cs/cr: named row plus wildcard row
        assert_eq!(session.write_count(Table::SpanDurationIndex), 2);
    }

    #[tokio::test]
    async fn test_annotation_index_written_per_key() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        let web = Endpoint::service("web");
        let span = Span::new(1, 2, "get")
            .with_timestamp(TS)
            .annotate(Annotation::new(TS, "cache-miss", Some(web.clone())))
            .tag(BinaryAnnotation::string("http.path", "/users", Some(web)));

        ingester.accept(vec![span]).await.unwrap();
        // web:cache-miss, web:http.path, web:http.path:/users
        assert_eq!(session.write_count(Table::AnnotationsIndex), 3);
    }

    #[tokio::test]
    async fn test_oversized_annotation_fails_batch_as_input_error() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        let span = Span::new(1, 2, "get")
            .with_timestamp(TS)
            .annotate(Annotation::new(TS, "x".repeat(70_000), Some(Endpoint::service("web"))));

        let err = ingester.accept(vec![span]).await.unwrap_err();
        assert!(err.is_input_error());
        assert!(matches!(err.root(), Error::ValueTooLarge { .. }));
        assert_eq!(session.row_count(Table::Traces), 1);
        assert_eq!(session.write_count(Table::AnnotationsIndex), 0);
    }

    #[tokio::test]
    async fn test_long_string_tag_indexed_by_default() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let consumer = consumer(&session);
        let mut ingester = consumer.ingester();
        let url = format!("https://example.com/search?q={}", "a".repeat(300));
        let span = Span::new(1, 2, "get")
            .with_timestamp(TS)
            .tag(BinaryAnnotation::string("http.url", url.as_str(), Some(Endpoint::service("web"))));

        ingester.accept(vec![span]).await.unwrap();
        // web:http.url and web:http.url:<url>
        assert_eq!(session.row_count(Table::AnnotationsIndex), 2);
        assert_eq!(consumer.metrics().writes_rejected, 0);
    }

    #[tokio::test]
    async fn test_configured_limit_counts_composed_key() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let consumer = SpanConsumer::builder(session.clone())
            .config(ConsumerConfig::new().max_indexable_value_bytes(16))
            .build()
            .unwrap();
        let web = Endpoint::service("web");
        // "web:k:" plus a 10 byte value is 16 bytes; one more byte is too many
        let fits = Span::new(1, 2, "get")
            .with_timestamp(TS)
            .tag(BinaryAnnotation::string("k", "v".repeat(10).as_str(), Some(web.clone())));
        let over = Span::new(1, 3, "get")
            .with_timestamp(TS)
            .tag(BinaryAnnotation::string("k", "v".repeat(11).as_str(), Some(web)));

        consumer.ingester().accept(vec![fits]).await.unwrap();
        let err = consumer.ingester().accept(vec![over]).await.unwrap_err();
        assert!(matches!(err.root(), Error::ValueTooLarge { size: 17, limit: 16 }));
    }

    #[tokio::test]
    async fn test_failed_dimension_write_is_retried() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let consumer = consumer(&session);
        let mut ingester = consumer.ingester();
        session.fail_table(Table::ServiceNames, StoreError::Unavailable("injected".into()));

        assert!(ingester.accept(vec![web_span("get")]).await.is_err());
        assert!(!ingester.dedup_cache().contains("web"));

        session.clear_faults();
        ingester.accept(vec![web_span("get")]).await.unwrap();
        assert_eq!(session.write_count(Table::ServiceNames), 2);
        assert_eq!(session.row_count(Table::ServiceNames), 1);
        assert_eq!(consumer.metrics().batches_failed, 1);
    }

    #[tokio::test]
    async fn test_dropped_outcome_reverts_failed_dimension() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        session.fail_table(Table::ServiceNames, StoreError::Unavailable("injected".into()));

        drop(ingester.accept(vec![web_span("get")]));
        assert!(!ingester.dedup_cache().contains("web"));

        session.clear_faults();
        ingester.accept(vec![web_span("get")]).await.unwrap();
        assert_eq!(session.row_count(Table::ServiceNames), 1);
        assert!(ingester.dedup_cache().contains("web"));
    }

    #[tokio::test]
    async fn test_ingesters_dedup_independently() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let consumer = consumer(&session);
        let mut a = consumer.ingester();
        let mut b = consumer.ingester();

        a.accept(vec![web_span("get")]).await.unwrap();
        b.accept(vec![web_span("get")]).await.unwrap();
        a.accept(vec![web_span("get")]).await.unwrap();

        assert_eq!(session.write_count(Table::ServiceNames), 2);
        assert_eq!(consumer.metrics().dimension_writes_skipped, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        ingester.accept(Vec::new()).await.unwrap();
        assert!(session.statements().is_empty());
    }

    #[tokio::test]
    async fn test_zero_timestamp_still_written_under_time_windowed_compaction() {
        let session = Arc::new(MemorySession::new("zipkin").with_table_options(
            Table::Traces,
            TableOptions::new()
                .with(DEFAULT_TIME_TO_LIVE, "0")
                .with(COMPACTION_CLASS, "org.apache.cassandra.db.compaction.DateTieredCompactionStrategy"),
        ));
        let consumer = consumer(&session);
        assert!(consumer.schema().time_windowed_compaction());

        let mut ingester = consumer.ingester();
        let span = Span::new(1, 2, "get").tag(BinaryAnnotation::string(
            "k",
            "v",
            Some(Endpoint::service("web")),
        ));
        ingester.accept(vec![span.clone(), span]).await.unwrap();
        assert_eq!(session.write_count(Table::Traces), 2);
        assert!(consumer.zero_timestamp_warned.load(Ordering::Acquire));
    }

    #[test]
    fn test_build_fails_on_bad_metadata() {
        let session = Arc::new(
            MemorySession::new("zipkin")
                .with_table_options(Table::Traces, TableOptions::new().with(DEFAULT_TIME_TO_LIVE, "x")),
        );
        let err = SpanConsumer::builder(session).build().unwrap_err();
        assert!(matches!(err, Error::Metadata(_)));
    }

    #[test]
    fn test_build_fails_on_bad_config() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let err = SpanConsumer::builder(session)
            .config(ConsumerConfig::new().bucket_count(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_accept_dispatches_before_polling() {
        let session = Arc::new(MemorySession::new("zipkin"));
        let mut ingester = consumer(&session).ingester();
        let outcome = ingester.accept(vec![web_span("get")]);
        assert_eq!(session.row_count(Table::Traces), 1);
        drop(outcome);
        assert_eq!(session.row_count(Table::ServiceNames), 1);
    }
}
