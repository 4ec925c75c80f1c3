//! Index writers
//!
//! One method per row kind the write path produces. Each binds a prepared
//! statement, dispatches it through the session, and returns a future for
//! that one write's outcome.
//!
//! | Method | Table | Partition |
//! |--------|-------|-----------|
//! | [`store_span`](IndexWriters::store_span) | `traces` | trace id |
//! | [`store_service_name`](IndexWriters::store_service_name) | `service_names` | service |
//! | [`store_span_name`](IndexWriters::store_span_name) | `span_names` | service, bucket 0 |
//! | [`store_trace_id_by_service_name`](IndexWriters::store_trace_id_by_service_name) | `service_name_index` | service, random bucket |
//! | [`store_trace_id_by_span_name`](IndexWriters::store_trace_id_by_span_name) | `service_span_name_index` | `service.span` |
//! | [`store_trace_id_by_annotation`](IndexWriters::store_trace_id_by_annotation) | `annotations_index` | key, random bucket |
//! | [`store_trace_id_by_duration`](IndexWriters::store_trace_id_by_duration) | `span_duration_index` | service, span, day bucket |
//!
//! Inputs that cannot be written (empty names, oversized annotation keys,
//! unencodable spans) produce an already-failed future and never reach the
//! store. Store failures are logged at ERROR with the statement fully
//! substituted, then reported as [`Error::Dispatch`].

use crate::metrics::ConsumerMetrics;
use futures::future::{self, BoxFuture};
use spanstore_core::{Error, Result, Span, SpanCodec};
use spanstore_storage::{
    BoundStatement, BucketingStrategy, PreparedStatement, Session, Table, TimestampCodec, TtlPolicy,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Outcome of one write.
pub type WriteFuture = BoxFuture<'static, Result<()>>;

/// Bucket of every `span_names` row.
pub const SPAN_NAME_BUCKET: i32 = 0;

// ============================================================================
// Prepared statements
// ============================================================================

#[derive(Debug)]
struct Statements {
    span: Arc<PreparedStatement>,
    service_name: Arc<PreparedStatement>,
    span_name: Arc<PreparedStatement>,
    by_service_name: Arc<PreparedStatement>,
    by_span_name: Arc<PreparedStatement>,
    by_annotation: Arc<PreparedStatement>,
    by_duration: Arc<PreparedStatement>,
}

impl Statements {
    fn prepare(ttl: &TtlPolicy) -> Self {
        let insert = |name, table| PreparedStatement::insert(name, table, ttl.binds_ttl(table));
        Self {
            span: insert("insert-span", Table::Traces),
            service_name: insert("insert-service-name", Table::ServiceNames),
            span_name: insert("insert-span-name", Table::SpanNames),
            by_service_name: insert("insert-trace-id-by-service-name", Table::ServiceNameIndex),
            by_span_name: insert("insert-trace-id-by-span-name", Table::ServiceSpanNameIndex),
            by_annotation: insert("insert-trace-id-by-annotation", Table::AnnotationsIndex),
            by_duration: insert("insert-trace-id-by-duration", Table::SpanDurationIndex),
        }
    }
}

// ============================================================================
// IndexWriters
// ============================================================================

/// Writes fact, dimension and index rows.
pub struct IndexWriters {
    session: Arc<dyn Session>,
    statements: Statements,
    ttl: TtlPolicy,
    buckets: BucketingStrategy,
    timestamps: TimestampCodec,
    codec: Arc<dyn SpanCodec>,
    metrics: Arc<ConsumerMetrics>,
    max_indexable_value_bytes: usize,
}

impl IndexWriters {
    /// Prepare every statement under `ttl`.
    pub fn new(
        session: Arc<dyn Session>,
        ttl: TtlPolicy,
        buckets: BucketingStrategy,
        codec: Arc<dyn SpanCodec>,
        metrics: Arc<ConsumerMetrics>,
        max_indexable_value_bytes: usize,
    ) -> Self {
        Self {
            session,
            statements: Statements::prepare(&ttl),
            ttl,
            buckets,
            timestamps: TimestampCodec::new(),
            codec,
            metrics,
            max_indexable_value_bytes,
        }
    }

    /// Resolved expiration policy.
    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.ttl
    }

    /// Bucketing in use.
    pub fn buckets(&self) -> &BucketingStrategy {
        &self.buckets
    }

    /// Prepared statement text for `table`.
    pub fn query_string(&self, table: Table) -> &str {
        self.prepared(table).query_string()
    }

    /// Fact row. `timestamp` is the normalized span timestamp, zero if unknown.
    pub fn store_span(&self, span: &Span, timestamp: i64, uniqueness_key: &str) -> WriteFuture {
        let encoded = match self.codec.encode(span) {
            Ok(bytes) => bytes,
            Err(e) => return self.reject(e),
        };
        let stmt = self
            .bind(&self.statements.span)
            .set_bigint("trace_id", span.trace_id as i64)
            .set_timestamp("ts", self.timestamps.encode(timestamp))
            .set_text("span_name", uniqueness_key)
            .set_blob("span", encoded);
        self.dispatch(stmt)
    }

    /// Service dimension row.
    pub fn store_service_name(&self, service_name: &str) -> WriteFuture {
        if let Err(e) = require("service_name", service_name) {
            return self.reject(e);
        }
        let stmt = self
            .bind(&self.statements.service_name)
            .set_text("service_name", service_name);
        self.dispatch(stmt)
    }

    /// Span-name dimension row.
    pub fn store_span_name(&self, service_name: &str, span_name: &str) -> WriteFuture {
        if let Err(e) = require("service_name", service_name).and(require("span_name", span_name)) {
            return self.reject(e);
        }
        let stmt = self
            .bind(&self.statements.span_name)
            .set_text("service_name", service_name)
            .set_int("bucket", SPAN_NAME_BUCKET)
            .set_text("span_name", span_name);
        self.dispatch(stmt)
    }

    /// Trace id by service, in a random bucket.
    pub fn store_trace_id_by_service_name(
        &self,
        service_name: &str,
        timestamp: i64,
        trace_id: u64,
    ) -> WriteFuture {
        if let Err(e) = require("service_name", service_name) {
            return self.reject(e);
        }
        let stmt = self
            .bind(&self.statements.by_service_name)
            .set_text("service_name", service_name)
            .set_int("bucket", self.buckets.random.next_bucket())
            .set_timestamp("ts", self.timestamps.encode(timestamp))
            .set_bigint("trace_id", trace_id as i64);
        self.dispatch(stmt)
    }

    /// Trace id by `service.span`.
    pub fn store_trace_id_by_span_name(
        &self,
        service_name: &str,
        span_name: &str,
        timestamp: i64,
        trace_id: u64,
    ) -> WriteFuture {
        if let Err(e) = require("service_name", service_name).and(require("span_name", span_name)) {
            return self.reject(e);
        }
        let stmt = self
            .bind(&self.statements.by_span_name)
            .set_text("service_span_name", format!("{}.{}", service_name, span_name))
            .set_timestamp("ts", self.timestamps.encode(timestamp))
            .set_bigint("trace_id", trace_id as i64);
        self.dispatch(stmt)
    }

    /// Trace id by annotation key, in a random bucket.
    ///
    /// `annotation_key` is the composed `service:key` or `service:key:value`
    /// string; its UTF-8 length is checked against the indexable limit. Longer
    /// keys fail with [`Error::ValueTooLarge`] without being sent.
    pub fn store_trace_id_by_annotation(
        &self,
        annotation_key: &str,
        timestamp: i64,
        trace_id: u64,
    ) -> WriteFuture {
        if annotation_key.len() > self.max_indexable_value_bytes {
            return self.reject(Error::ValueTooLarge {
                size: annotation_key.len(),
                limit: self.max_indexable_value_bytes,
            });
        }
        let stmt = self
            .bind(&self.statements.by_annotation)
            .set_blob("annotation", annotation_key.as_bytes().to_vec())
            .set_int("bucket", self.buckets.random.next_bucket())
            .set_timestamp("ts", self.timestamps.encode(timestamp))
            .set_bigint("trace_id", trace_id as i64);
        self.dispatch(stmt)
    }

    /// Trace id by service, span name and duration. `span_name` may be empty,
    /// which is the row matching any span name.
    pub fn store_trace_id_by_duration(
        &self,
        service_name: &str,
        span_name: &str,
        timestamp: i64,
        duration: i64,
        trace_id: u64,
    ) -> WriteFuture {
        if let Err(e) = require("service_name", service_name) {
            return self.reject(e);
        }
        let stmt = self
            .bind(&self.statements.by_duration)
            .set_text("service_name", service_name)
            .set_text("span_name", span_name)
            .set_int("bucket", self.buckets.duration.bucket(timestamp))
            .set_bigint("duration", duration)
            .set_timestamp("ts", self.timestamps.encode(timestamp))
            .set_bigint("trace_id", trace_id as i64);
        self.dispatch(stmt)
    }

    fn prepared(&self, table: Table) -> &Arc<PreparedStatement> {
        match table {
            Table::Traces => &self.statements.span,
            Table::ServiceNames => &self.statements.service_name,
            Table::SpanNames => &self.statements.span_name,
            Table::ServiceNameIndex => &self.statements.by_service_name,
            Table::ServiceSpanNameIndex => &self.statements.by_span_name,
            Table::AnnotationsIndex => &self.statements.by_annotation,
            Table::SpanDurationIndex => &self.statements.by_duration,
        }
    }

    fn bind(&self, prepared: &Arc<PreparedStatement>) -> BoundStatement {
        let stmt = prepared.bind();
        match self.ttl.ttl_for(prepared.table()) {
            Some(seconds) => stmt.set_ttl(seconds),
            None => stmt,
        }
    }

    fn dispatch(&self, statement: BoundStatement) -> WriteFuture {
        debug!(statement = %statement, "dispatching");
        self.metrics.record_dispatch();

        let pending = self.session.execute(statement.clone());
        let metrics = Arc::clone(&self.metrics);
        Box::pin(async move {
            pending.await.map_err(|e| {
                metrics.record_failure();
                let rendered = statement.render();
                error!(statement = %rendered, error = %e, "failed {}", statement.name());
                Error::Dispatch {
                    statement: rendered,
                    transient: e.is_transient(),
                    source: Box::new(e),
                }
            })
        })
    }

    fn reject(&self, error: Error) -> WriteFuture {
        debug!(error = %error, "write rejected before dispatch");
        self.metrics.record_rejected();
        Box::pin(future::ready(Err(error)))
    }
}

impl std::fmt::Debug for IndexWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexWriters")
            .field("keyspace", &self.session.keyspace())
            .field("ttl", &self.ttl)
            .field("buckets", &self.buckets)
            .field("codec", &self.codec.name())
            .finish_non_exhaustive()
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spanstore_core::MsgPackCodec;
    use spanstore_storage::{
        CqlValue, DurationBuckets, MemorySession, RandomBuckets, StoreError, TableOptions,
        DAY_MICROS, DEFAULT_TIME_TO_LIVE,
    };
    use std::num::NonZeroU32;

    const TS: i64 = 1_500_000_000_000_000;

    fn writers_for(session: Arc<MemorySession>) -> IndexWriters {
        let ttl = TtlPolicy::resolve(session.as_ref(), 604800, 259200).unwrap();
        let buckets = BucketingStrategy::new(
            RandomBuckets::seeded(NonZeroU32::new(10).unwrap(), 1),
            DurationBuckets::daily(),
        );
        IndexWriters::new(
            session,
            ttl,
            buckets,
            Arc::new(MsgPackCodec),
            Arc::new(ConsumerMetrics::new()),
            256,
        )
    }

    fn setup() -> (Arc<MemorySession>, IndexWriters) {
        let session = Arc::new(MemorySession::new("zipkin"));
        let writers = writers_for(Arc::clone(&session));
        (session, writers)
    }

    #[tokio::test]
    async fn test_store_span_row() {
        let (session, writers) = setup();
        let span = Span::new(7, 8, "get");
        writers.store_span(&span, TS, "8_1_2").await.unwrap();

        let row = &session.rows(Table::Traces)[0];
        assert_eq!(row.column(Table::Traces, "trace_id"), Some(&CqlValue::BigInt(7)));
        assert_eq!(row.column(Table::Traces, "span_name"), Some(&CqlValue::Text("8_1_2".into())));
        assert_eq!(row.ttl, Some(604800));

        let Some(CqlValue::Blob(bytes)) = row.column(Table::Traces, "span") else {
            panic!("span payload missing");
        };
        assert_eq!(MsgPackCodec.decode(bytes).unwrap(), span);
    }

    #[tokio::test]
    async fn test_span_name_bucket_is_zero() {
        let (session, writers) = setup();
        writers.store_span_name("web", "get").await.unwrap();
        let row = &session.rows(Table::SpanNames)[0];
        assert_eq!(row.column(Table::SpanNames, "bucket"), Some(&CqlValue::Int(0)));
        assert_eq!(row.ttl, Some(259200));
    }

    #[tokio::test]
    async fn test_span_name_index_key() {
        let (session, writers) = setup();
        writers.store_trace_id_by_span_name("web", "get", TS, 9).await.unwrap();
        let row = &session.rows(Table::ServiceSpanNameIndex)[0];
        assert_eq!(
            row.column(Table::ServiceSpanNameIndex, "service_span_name"),
            Some(&CqlValue::Text("web.get".into()))
        );
    }

    #[tokio::test]
    async fn test_service_name_index_bucket_in_range() {
        let (session, writers) = setup();
        for i in 0..50 {
            writers.store_trace_id_by_service_name("web", TS + i, 1).await.unwrap();
        }
        for row in session.rows(Table::ServiceNameIndex) {
            let Some(CqlValue::Int(bucket)) = row.column(Table::ServiceNameIndex, "bucket") else {
                panic!("bucket missing");
            };
            assert!((0..10).contains(bucket));
        }
    }

    #[tokio::test]
    async fn test_duration_bucket_from_timestamp() {
        let (session, writers) = setup();
        writers.store_trace_id_by_duration("web", "", TS, 42, 1).await.unwrap();
        let row = &session.rows(Table::SpanDurationIndex)[0];
        assert_eq!(
            row.column(Table::SpanDurationIndex, "bucket"),
            Some(&CqlValue::Int((TS / DAY_MICROS) as i32))
        );
        assert_eq!(row.column(Table::SpanDurationIndex, "duration"), Some(&CqlValue::BigInt(42)));
        assert_eq!(row.column(Table::SpanDurationIndex, "span_name"), Some(&CqlValue::Text(String::new())));
    }

    #[tokio::test]
    async fn test_oversized_annotation_never_dispatched() {
        let (session, writers) = setup();
        let key = format!("web:{}", "x".repeat(300));
        let err = writers.store_trace_id_by_annotation(&key, TS, 1).await.unwrap_err();
        assert!(matches!(err, Error::ValueTooLarge { limit: 256, .. }));
        assert_eq!(session.write_count(Table::AnnotationsIndex), 0);
    }

    #[tokio::test]
    async fn test_empty_service_rejected() {
        let (session, writers) = setup();
        assert!(matches!(writers.store_service_name("").await, Err(Error::Validation(_))));
        assert!(matches!(writers.store_span_name("web", "").await, Err(Error::Validation(_))));
        assert!(session.statements().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_error_carries_substituted_statement() {
        let (session, writers) = setup();
        session.fail_table(Table::ServiceNames, StoreError::Timeout("injected".into()));

        let err = writers.store_service_name("web").await.unwrap_err();
        match err {
            Error::Dispatch { statement, transient, source } => {
                assert!(statement.contains("'web'"), "{}", statement);
                assert!(statement.contains("USING TTL 259200"), "{}", statement);
                assert!(transient);
                assert_eq!(
                    source.downcast_ref::<StoreError>(),
                    Some(&StoreError::Timeout("injected".into()))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_default_ttl_omits_marker() {
        let session = Arc::new(MemorySession::new("zipkin").with_table_options(
            Table::ServiceNames,
            TableOptions::new().with(DEFAULT_TIME_TO_LIVE, "3600"),
        ));
        let writers = writers_for(Arc::clone(&session));

        assert!(!writers.query_string(Table::ServiceNames).contains("USING TTL"));
        assert!(writers.query_string(Table::Traces).ends_with("USING TTL :ttl_"));

        writers.store_service_name("web").await.unwrap();
        let stmt = &session.statements_for(Table::ServiceNames)[0];
        assert_eq!(stmt.ttl(), None);
        assert_eq!(session.rows(Table::ServiceNames)[0].ttl, Some(3600));
    }
}
