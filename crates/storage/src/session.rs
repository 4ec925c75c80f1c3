//! Store session contract
//!
//! A [`Session`] is the consumer's only view of the wide-column store. It
//! executes bound statements and answers the two metadata questions the write
//! path asks at startup: table options and keyspace replication.
//!
//! ## Execution contract
//!
//! `execute` dispatches the statement before returning. The returned future
//! only reports the outcome; dropping it does not cancel the write. The
//! consumer relies on this to fail fast on the first error while the
//! remaining writes of the batch run to completion.

use crate::error::StoreResult;
use crate::schema::{Table, TableOptions};
use crate::statement::BoundStatement;
use futures::future::BoxFuture;
use std::collections::BTreeMap;

/// Outcome of one dispatched statement.
pub type ExecuteFuture = BoxFuture<'static, StoreResult<()>>;

/// Connection to a keyspace.
pub trait Session: Send + Sync {
    /// Keyspace this session writes to.
    fn keyspace(&self) -> &str;

    /// Dispatch a statement and return a handle on its outcome.
    fn execute(&self, statement: BoundStatement) -> ExecuteFuture;

    /// Options of a table in the keyspace.
    fn table_options(&self, table: Table) -> StoreResult<TableOptions>;

    /// Replication settings of the keyspace (`class`, `replication_factor`, ...).
    fn replication(&self) -> StoreResult<BTreeMap<String, String>>;
}
