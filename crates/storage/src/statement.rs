//! Prepared and bound insert statements
//!
//! Every write is an `INSERT` into one [`Table`], prepared once per consumer
//! and bound per row. Preparing fixes the column list and whether the
//! statement carries a `USING TTL` marker; binding supplies the values.
//!
//! A [`BoundStatement`] renders itself with every parameter substituted, so a
//! failed write can be logged as the exact statement that was sent.

use crate::error::{StoreError, StoreResult};
use crate::schema::Table;
use crate::timestamp::EncodedTimestamp;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Bind marker name of the per-row expiration.
pub const TTL_MARKER: &str = "ttl_";

/// A column value.
///
/// Variants order the way the store compares them within one column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CqlValue {
    /// 64-bit signed integer
    BigInt(i64),
    /// 32-bit signed integer
    Int(i32),
    /// UTF-8 text
    Text(String),
    /// Opaque bytes
    Blob(Vec<u8>),
    /// Sortable timestamp
    Timestamp(EncodedTimestamp),
}

impl CqlValue {
    /// Serialized size, as the store would count it against key limits.
    pub fn encoded_len(&self) -> usize {
        match self {
            CqlValue::BigInt(_) => 8,
            CqlValue::Int(_) => 4,
            CqlValue::Text(s) => s.len(),
            CqlValue::Blob(b) => b.len(),
            CqlValue::Timestamp(ts) => ts.as_bytes().len(),
        }
    }
}

impl fmt::Display for CqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CqlValue::BigInt(v) => write!(f, "{}", v),
            CqlValue::Int(v) => write!(f, "{}", v),
            CqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            CqlValue::Blob(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            CqlValue::Timestamp(ts) => write!(f, "'{}'", ts.to_iso8601()),
        }
    }
}

/// An insert prepared against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    name: &'static str,
    table: Table,
    columns: Vec<&'static str>,
    uses_ttl: bool,
    query: String,
}

impl PreparedStatement {
    /// Prepare an insert of every key and payload column of `table`.
    ///
    /// `name` identifies the statement in logs and metrics.
    pub fn insert(name: &'static str, table: Table, uses_ttl: bool) -> Arc<Self> {
        let columns: Vec<&'static str> = table
            .primary_key()
            .iter()
            .chain(table.payload().iter())
            .copied()
            .collect();

        let markers: Vec<String> = columns.iter().map(|c| format!(":{}", c)).collect();
        let mut query = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            columns.join(","),
            markers.join(",")
        );
        if uses_ttl {
            query.push_str(" USING TTL :");
            query.push_str(TTL_MARKER);
        }

        Arc::new(Self {
            name,
            table,
            columns,
            uses_ttl,
            query,
        })
    }

    /// Statement name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Target table.
    pub fn table(&self) -> Table {
        self.table
    }

    /// Bound columns, in query order.
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    /// Whether a per-row TTL must be bound.
    pub fn uses_ttl(&self) -> bool {
        self.uses_ttl
    }

    /// Query text with bind markers.
    pub fn query_string(&self) -> &str {
        &self.query
    }

    /// Start binding values.
    pub fn bind(self: &Arc<Self>) -> BoundStatement {
        BoundStatement {
            prepared: Arc::clone(self),
            values: BTreeMap::new(),
            ttl: None,
        }
    }
}

/// A prepared statement with values bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundStatement {
    prepared: Arc<PreparedStatement>,
    values: BTreeMap<&'static str, CqlValue>,
    ttl: Option<u32>,
}

impl BoundStatement {
    /// Bind a column.
    pub fn set(mut self, column: &'static str, value: CqlValue) -> Self {
        self.values.insert(column, value);
        self
    }

    /// Bind a 64-bit integer column.
    pub fn set_bigint(self, column: &'static str, value: i64) -> Self {
        self.set(column, CqlValue::BigInt(value))
    }

    /// Bind a 32-bit integer column.
    pub fn set_int(self, column: &'static str, value: i32) -> Self {
        self.set(column, CqlValue::Int(value))
    }

    /// Bind a text column.
    pub fn set_text(self, column: &'static str, value: impl Into<String>) -> Self {
        self.set(column, CqlValue::Text(value.into()))
    }

    /// Bind a blob column.
    pub fn set_blob(self, column: &'static str, value: Vec<u8>) -> Self {
        self.set(column, CqlValue::Blob(value))
    }

    /// Bind a timestamp column.
    pub fn set_timestamp(self, column: &'static str, value: EncodedTimestamp) -> Self {
        self.set(column, CqlValue::Timestamp(value))
    }

    /// Bind the per-row expiration.
    pub fn set_ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Statement this was bound from.
    pub fn prepared(&self) -> &PreparedStatement {
        &self.prepared
    }

    /// Statement name.
    pub fn name(&self) -> &'static str {
        self.prepared.name
    }

    /// Target table.
    pub fn table(&self) -> Table {
        self.prepared.table
    }

    /// Value bound to `column`.
    pub fn get(&self, column: &str) -> Option<&CqlValue> {
        self.values.get(column)
    }

    /// Bound expiration, if any.
    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// Check that every marker is bound, and the TTL matches the prepared form.
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(missing) = self
            .prepared
            .columns
            .iter()
            .find(|c| !self.values.contains_key(*c))
        {
            return Err(StoreError::InvalidValue {
                column: missing.to_string(),
                reason: format!("not bound in {}", self.prepared.name),
            });
        }
        match (self.prepared.uses_ttl, self.ttl) {
            (true, None) => Err(StoreError::InvalidValue {
                column: TTL_MARKER.into(),
                reason: format!("{} requires a ttl", self.prepared.name),
            }),
            (false, Some(_)) => Err(StoreError::InvalidValue {
                column: TTL_MARKER.into(),
                reason: format!("{} uses the table default ttl", self.prepared.name),
            }),
            _ => Ok(()),
        }
    }

    /// Primary key values, in key order. `None` if a key column is unbound.
    pub fn primary_key(&self) -> Option<Vec<CqlValue>> {
        self.prepared
            .table
            .primary_key()
            .iter()
            .map(|c| self.values.get(c).cloned())
            .collect()
    }

    /// Payload values by column.
    pub fn payload(&self) -> BTreeMap<&'static str, CqlValue> {
        self.prepared
            .table
            .payload()
            .iter()
            .filter_map(|c| self.values.get(c).map(|v| (*c, v.clone())))
            .collect()
    }

    /// Query with every parameter substituted, for diagnostics.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BoundStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INSERT INTO {} ({}) VALUES (",
            self.prepared.table.name(),
            self.prepared.columns.join(",")
        )?;
        for (i, column) in self.prepared.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match self.values.get(column) {
                Some(value) => write!(f, "{}", value)?,
                None => write!(f, ":{}", column)?,
            }
        }
        f.write_str(")")?;
        if self.prepared.uses_ttl {
            match self.ttl {
                Some(ttl) => write!(f, " USING TTL {}", ttl)?,
                None => write!(f, " USING TTL :{}", TTL_MARKER)?,
            }
        }
        Ok(())
    }
}
