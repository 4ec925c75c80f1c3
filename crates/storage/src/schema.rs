//! Table layout and schema metadata
//!
//! Every row the write path produces lands in one of seven tables. Schema
//! creation happens elsewhere; this module only knows each table's name and
//! primary key, and how to read back the options that influence writing.
//!
//! | Table | Primary key | Payload |
//! |-------|-------------|---------|
//! | `traces` | trace_id, ts, span_name | span |
//! | `service_names` | service_name | |
//! | `span_names` | service_name, bucket, span_name | |
//! | `service_name_index` | service_name, bucket, ts | trace_id |
//! | `service_span_name_index` | service_span_name, ts | trace_id |
//! | `annotations_index` | annotation, bucket, ts | trace_id |
//! | `span_duration_index` | service_name, span_name, bucket, duration, ts | trace_id |
//!
//! In `traces`, `span_name` holds the uniqueness key, not the operation name.

use crate::error::{StoreError, StoreResult};
use crate::session::Session;
use std::collections::BTreeMap;
use tracing::warn;

/// Table option holding the server-side default expiration in seconds.
pub const DEFAULT_TIME_TO_LIVE: &str = "default_time_to_live";

/// Table option holding the compaction strategy class.
pub const COMPACTION_CLASS: &str = "compaction.class";

/// Compaction classes that group sstables by write time.
const TIME_WINDOWED_COMPACTION: [&str; 2] =
    ["DateTieredCompactionStrategy", "TimeWindowCompactionStrategy"];

/// Tables written by the span consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Fact rows: one per span write
    Traces,
    /// Dimension: distinct service names
    ServiceNames,
    /// Dimension: distinct span names per service
    SpanNames,
    /// Index: trace ids by service
    ServiceNameIndex,
    /// Index: trace ids by service and span name
    ServiceSpanNameIndex,
    /// Index: trace ids by annotation key
    AnnotationsIndex,
    /// Index: trace ids by service, span name and duration
    SpanDurationIndex,
}

impl Table {
    /// All tables, fact table first.
    pub const ALL: [Table; 7] = [
        Table::Traces,
        Table::ServiceNames,
        Table::SpanNames,
        Table::ServiceNameIndex,
        Table::ServiceSpanNameIndex,
        Table::AnnotationsIndex,
        Table::SpanDurationIndex,
    ];

    /// Table name in the keyspace.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Traces => "traces",
            Table::ServiceNames => "service_names",
            Table::SpanNames => "span_names",
            Table::ServiceNameIndex => "service_name_index",
            Table::ServiceSpanNameIndex => "service_span_name_index",
            Table::AnnotationsIndex => "annotations_index",
            Table::SpanDurationIndex => "span_duration_index",
        }
    }

    /// Primary key columns, partition key first.
    pub fn primary_key(&self) -> &'static [&'static str] {
        match self {
            Table::Traces => &["trace_id", "ts", "span_name"],
            Table::ServiceNames => &["service_name"],
            Table::SpanNames => &["service_name", "bucket", "span_name"],
            Table::ServiceNameIndex => &["service_name", "bucket", "ts"],
            Table::ServiceSpanNameIndex => &["service_span_name", "ts"],
            Table::AnnotationsIndex => &["annotation", "bucket", "ts"],
            Table::SpanDurationIndex => &["service_name", "span_name", "bucket", "duration", "ts"],
        }
    }

    /// Non-key columns.
    pub fn payload(&self) -> &'static [&'static str] {
        match self {
            Table::Traces => &["span"],
            Table::ServiceNames | Table::SpanNames => &[],
            _ => &["trace_id"],
        }
    }

    /// Whether this is the fact table. Every other table uses the index TTL.
    pub fn is_fact(&self) -> bool {
        matches!(self, Table::Traces)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw options of one table, as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOptions {
    options: BTreeMap<String, String>,
}

impl TableOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Remove an option.
    pub fn without(mut self, key: &str) -> Self {
        self.options.remove(key);
        self
    }

    /// Look up an option.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Server-side default expiration in seconds. `0` means none.
    ///
    /// Missing or non-numeric values are errors: writing without knowing the
    /// expiration policy would either leak rows or double-expire them.
    pub fn default_ttl_seconds(&self, table: Table) -> StoreResult<u32> {
        let raw = self.get(DEFAULT_TIME_TO_LIVE).ok_or_else(|| {
            StoreError::Metadata(format!("{} has no {}", table, DEFAULT_TIME_TO_LIVE))
        })?;
        raw.trim().parse::<u32>().map_err(|_| {
            StoreError::Metadata(format!(
                "{}.{} is not a number of seconds: {:?}",
                table, DEFAULT_TIME_TO_LIVE, raw
            ))
        })
    }

    /// Compaction class, if reported.
    pub fn compaction_class(&self) -> Option<&str> {
        self.get(COMPACTION_CLASS)
    }
}

/// Schema facts read once when a consumer is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMetadata {
    /// Compaction class of the fact table
    pub compaction_class: String,
}

impl SchemaMetadata {
    /// Read metadata through the session.
    ///
    /// Warns when the keyspace is not replicated.
    pub fn read(session: &dyn Session) -> StoreResult<Self> {
        let replication = session.replication()?;
        if is_unreplicated(&replication) {
            warn!(
                keyspace = session.keyspace(),
                "running with RF=1, this is not suitable for production. Optimal is 3+"
            );
        }

        let traces = session.table_options(Table::Traces)?;
        let compaction_class = traces.compaction_class().unwrap_or_default().to_string();
        Ok(Self { compaction_class })
    }

    /// Whether the fact table compacts by time window.
    ///
    /// Rows written with timestamp zero land in the oldest window forever,
    /// which these strategies handle badly.
    pub fn time_windowed_compaction(&self) -> bool {
        TIME_WINDOWED_COMPACTION
            .iter()
            .any(|class| self.compaction_class.contains(class))
    }
}

fn is_unreplicated(replication: &BTreeMap<String, String>) -> bool {
    let simple = replication
        .get("class")
        .map(|c| c.ends_with("SimpleStrategy"))
        .unwrap_or(false);
    simple && replication.get("replication_factor").map(String::as_str) == Some("1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_unique() {
        let mut names: Vec<_> = Table::ALL.iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Table::ALL.len());
    }

    #[test]
    fn test_only_traces_is_fact() {
        assert_eq!(Table::ALL.iter().filter(|t| t.is_fact()).count(), 1);
        assert!(Table::Traces.is_fact());
    }

    #[test]
    fn test_default_ttl_parsing() {
        let opts = TableOptions::new().with(DEFAULT_TIME_TO_LIVE, "259200");
        assert_eq!(opts.default_ttl_seconds(Table::ServiceNames).unwrap(), 259200);

        let opts = TableOptions::new().with(DEFAULT_TIME_TO_LIVE, "3 days");
        assert!(matches!(
            opts.default_ttl_seconds(Table::ServiceNames),
            Err(StoreError::Metadata(_))
        ));

        let opts = TableOptions::new();
        assert!(matches!(
            opts.default_ttl_seconds(Table::Traces),
            Err(StoreError::Metadata(_))
        ));
    }

    #[test]
    fn test_time_windowed_compaction() {
        let meta = SchemaMetadata {
            compaction_class: "org.apache.cassandra.db.compaction.DateTieredCompactionStrategy"
                .into(),
        };
        assert!(meta.time_windowed_compaction());

        let meta = SchemaMetadata {
            compaction_class: "SizeTieredCompactionStrategy".into(),
        };
        assert!(!meta.time_windowed_compaction());
    }

    #[test]
    fn test_unreplicated_detection() {
        let mut replication = BTreeMap::new();
        replication.insert("class".to_string(), "org.apache.cassandra.locator.SimpleStrategy".to_string());
        replication.insert("replication_factor".to_string(), "1".to_string());
        assert!(is_unreplicated(&replication));

        replication.insert("replication_factor".to_string(), "3".to_string());
        assert!(!is_unreplicated(&replication));
    }
}
