//! Per-table expiration policy
//!
//! Each table either carries a server-side `default_time_to_live`, in which
//! case inserts omit `USING TTL`, or it does not, in which case every insert
//! binds an explicit TTL:
//!
//! | Table | No server default |
//! |-------|-------------------|
//! | `traces` | span TTL |
//! | everything else | index TTL |
//!
//! The policy is resolved once, when statements are prepared. A table whose
//! options cannot be read, or whose default TTL is not a number, fails
//! resolution; the consumer does not start with an unknown expiration.

use crate::error::StoreResult;
use crate::schema::Table;
use crate::session::Session;
use std::collections::BTreeMap;
use tracing::debug;

/// How one table's rows expire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableTtl {
    /// The table's own default applies; statements bind no TTL
    ServerDefault(u32),
    /// Statements bind this many seconds
    Explicit(u32),
}

/// Resolved expiration of every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    tables: BTreeMap<Table, TableTtl>,
}

impl TtlPolicy {
    /// Read each table's default TTL and decide how its inserts expire.
    pub fn resolve(session: &dyn Session, span_ttl: u32, index_ttl: u32) -> StoreResult<Self> {
        let mut tables = BTreeMap::new();
        for table in Table::ALL {
            let default_ttl = session.table_options(table)?.default_ttl_seconds(table)?;
            let ttl = if default_ttl > 0 {
                TableTtl::ServerDefault(default_ttl)
            } else if table.is_fact() {
                TableTtl::Explicit(span_ttl)
            } else {
                TableTtl::Explicit(index_ttl)
            };
            debug!(table = table.name(), ?ttl, "resolved table ttl");
            tables.insert(table, ttl);
        }
        Ok(Self { tables })
    }

    /// Policy that binds explicit TTLs on every table, without reading metadata.
    pub fn explicit(span_ttl: u32, index_ttl: u32) -> Self {
        let tables = Table::ALL
            .iter()
            .map(|&t| {
                let ttl = if t.is_fact() { span_ttl } else { index_ttl };
                (t, TableTtl::Explicit(ttl))
            })
            .collect();
        Self { tables }
    }

    /// Resolution for one table.
    pub fn table(&self, table: Table) -> TableTtl {
        self.tables
            .get(&table)
            .copied()
            .unwrap_or(TableTtl::ServerDefault(0))
    }

    /// Seconds to bind on inserts into `table`, or `None` to omit `USING TTL`.
    pub fn ttl_for(&self, table: Table) -> Option<u32> {
        match self.table(table) {
            TableTtl::Explicit(seconds) => Some(seconds),
            TableTtl::ServerDefault(_) => None,
        }
    }

    /// Whether inserts into `table` must carry a TTL marker.
    pub fn binds_ttl(&self, table: Table) -> bool {
        self.ttl_for(table).is_some()
    }
}
