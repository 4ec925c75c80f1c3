//! In-memory session
//!
//! A [`Session`] backed by process memory, used by tests and by embedders
//! that want the write path without a cluster.
//!
//! # Design
//!
//! - DashMap keyed by [`Table`]: writes to different tables never contend
//! - BTreeMap within a table: rows ordered by primary key, the way the
//!   store clusters them
//! - Inserts are upserts: writing the same primary key twice keeps one row
//! - Every attempted statement is logged, applied or not
//!
//! Faults are injected with [`MemorySession::fail_when`]. A statement that
//! matches a fault is logged but not applied, and its future resolves to the
//! injected error.

use crate::error::{StoreError, StoreResult};
use crate::schema::{Table, TableOptions, COMPACTION_CLASS, DEFAULT_TIME_TO_LIVE};
use crate::session::{ExecuteFuture, Session};
use crate::statement::{BoundStatement, CqlValue};
use dashmap::DashMap;
use futures::future;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

type Fault = Box<dyn Fn(&BoundStatement) -> Option<StoreError> + Send + Sync>;

/// A stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    /// Primary key values, in key order
    pub key: Vec<CqlValue>,
    /// Non-key columns
    pub payload: BTreeMap<&'static str, CqlValue>,
    /// Expiration in seconds: bound by the statement, or the table default
    pub ttl: Option<u32>,
}

impl StoredRow {
    /// Value of a key or payload column.
    pub fn column(&self, table: Table, column: &str) -> Option<&CqlValue> {
        table
            .primary_key()
            .iter()
            .position(|c| *c == column)
            .and_then(|i| self.key.get(i))
            .or_else(|| self.payload.get(column))
    }
}

/// Per-table rows, ordered by primary key.
#[derive(Debug, Default)]
struct TableShard {
    rows: BTreeMap<Vec<CqlValue>, StoredRow>,
}

/// Session that keeps every table in memory.
pub struct MemorySession {
    keyspace: String,
    shards: DashMap<Table, TableShard>,
    options: DashMap<Table, TableOptions>,
    replication: RwLock<BTreeMap<String, String>>,
    log: Mutex<Vec<BoundStatement>>,
    faults: RwLock<Vec<Fault>>,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl MemorySession {
    /// Empty keyspace. Tables have no default TTL and size-tiered compaction;
    /// replication is `SimpleStrategy` with factor 3.
    pub fn new(keyspace: impl Into<String>) -> Self {
        let options = DashMap::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            options.insert(
                table,
                TableOptions::new()
                    .with(DEFAULT_TIME_TO_LIVE, "0")
                    .with(COMPACTION_CLASS, "org.apache.cassandra.db.compaction.SizeTieredCompactionStrategy"),
            );
        }

        let mut replication = BTreeMap::new();
        replication.insert("class".to_string(), "org.apache.cassandra.locator.SimpleStrategy".to_string());
        replication.insert("replication_factor".to_string(), "3".to_string());

        Self {
            keyspace: keyspace.into(),
            shards: DashMap::with_capacity(Table::ALL.len()),
            options,
            replication: RwLock::new(replication),
            log: Mutex::new(Vec::new()),
            faults: RwLock::new(Vec::new()),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Replace the options of one table.
    pub fn with_table_options(self, table: Table, options: TableOptions) -> Self {
        self.set_table_options(table, options);
        self
    }

    /// Replace the options of one table in place.
    pub fn set_table_options(&self, table: Table, options: TableOptions) {
        self.options.insert(table, options);
    }

    /// Set one option on every table.
    pub fn with_option_on_all(self, key: &str, value: &str) -> Self {
        for mut entry in self.options.iter_mut() {
            let updated = entry.value().clone().with(key, value);
            *entry.value_mut() = updated;
        }
        self
    }

    /// Replace the keyspace replication settings.
    pub fn with_replication<K, V>(self, settings: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        *self.replication.write() = settings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Fail every statement for which `fault` returns an error.
    ///
    /// Faults are checked in registration order; the first match wins.
    pub fn fail_when<F>(&self, fault: F)
    where
        F: Fn(&BoundStatement) -> Option<StoreError> + Send + Sync + 'static,
    {
        self.faults.write().push(Box::new(fault));
    }

    /// Fail every statement against `table`.
    pub fn fail_table(&self, table: Table, error: StoreError) {
        self.fail_when(move |stmt| (stmt.table() == table).then(|| error.clone()));
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.write().clear();
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Rows of a table, ordered by primary key.
    pub fn rows(&self, table: Table) -> Vec<StoredRow> {
        self.shards
            .get(&table)
            .map(|shard| shard.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: Table) -> usize {
        self.shards
            .get(&table)
            .map(|shard| shard.rows.len())
            .unwrap_or(0)
    }

    /// Row stored under `key`, if any.
    pub fn get(&self, table: Table, key: &[CqlValue]) -> Option<StoredRow> {
        self.shards
            .get(&table)
            .and_then(|shard| shard.rows.get(key).cloned())
    }

    /// Every statement executed so far, in dispatch order.
    pub fn statements(&self) -> Vec<BoundStatement> {
        self.log.lock().clone()
    }

    /// Statements executed against one table.
    pub fn statements_for(&self, table: Table) -> Vec<BoundStatement> {
        self.log
            .lock()
            .iter()
            .filter(|s| s.table() == table)
            .cloned()
            .collect()
    }

    /// Number of statements executed against one table.
    pub fn write_count(&self, table: Table) -> usize {
        self.log.lock().iter().filter(|s| s.table() == table).count()
    }

    /// Statements applied.
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Statements that failed, validation or injected fault.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    /// Drop all rows and the statement log. Options and faults are kept.
    pub fn clear(&self) {
        self.shards.clear();
        self.log.lock().clear();
        self.applied.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
    }

    fn apply(&self, statement: &BoundStatement) -> StoreResult<()> {
        statement.validate()?;

        if let Some(error) = self.faults.read().iter().find_map(|f| f(statement)) {
            return Err(error);
        }

        let table = statement.table();
        let key = statement.primary_key().ok_or_else(|| StoreError::InvalidValue {
            column: table.primary_key().join(","),
            reason: "primary key not bound".into(),
        })?;
        let ttl = match statement.ttl() {
            Some(ttl) => Some(ttl),
            None => self.table_options(table)?.default_ttl_seconds(table).ok().filter(|t| *t > 0),
        };

        let row = StoredRow {
            key: key.clone(),
            payload: statement.payload(),
            ttl,
        };
        self.shards.entry(table).or_default().rows.insert(key, row);
        Ok(())
    }
}

impl Session for MemorySession {
    fn keyspace(&self) -> &str {
        &self.keyspace
    }

    fn execute(&self, statement: BoundStatement) -> ExecuteFuture {
        let outcome = self.apply(&statement);
        match &outcome {
            Ok(()) => self.applied.fetch_add(1, Ordering::AcqRel),
            Err(_) => self.failed.fetch_add(1, Ordering::AcqRel),
        };
        self.log.lock().push(statement);
        Box::pin(future::ready(outcome))
    }

    fn table_options(&self, table: Table) -> StoreResult<TableOptions> {
        self.options
            .get(&table)
            .map(|o| o.value().clone())
            .ok_or_else(|| {
                StoreError::Metadata(format!("table {}.{} does not exist", self.keyspace, table))
            })
    }

    fn replication(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.replication.read().clone())
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("keyspace", &self.keyspace)
            .field("applied", &self.applied_count())
            .field("failed", &self.failed_count())
            .finish_non_exhaustive()
    }
}
