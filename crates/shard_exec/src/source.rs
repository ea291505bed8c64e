//! Contracts implemented by the physical driver layer.
//!
//! The executor never opens or closes connections. Each execution unit is
//! bound to a [`PhysicalStatement`] that already owns whatever connection it
//! needs; the executor only invokes it and interprets the outcome.

use async_trait::async_trait;

use crate::metadata::ColumnMetaData;
use crate::value::Value;

/// Generated-key reporting requested for an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GeneratedKeys {
    #[default]
    None,
    /// Return every auto-generated key, or none when `false`.
    AutoGenerated(bool),
    /// 1-based column indexes of the key columns.
    ColumnIndexes(Vec<usize>),
    ColumnNames(Vec<String>),
}

/// Forward-only raw rows from one shard.
pub trait RawResultSet: Send {
    fn metadata(&self) -> anyhow::Result<Vec<ColumnMetaData>>;

    /// Advances to the next row; `false` once exhausted.
    fn next(&mut self) -> anyhow::Result<bool>;

    /// Value of a 1-based column on the current row.
    fn value(&self, index: usize) -> anyhow::Result<Value>;
}

/// A statement bound to one physical datasource.
#[async_trait]
pub trait PhysicalStatement: Send + Sync {
    async fn execute_query(
        &self,
        sql: &str,
        parameters: &[Value],
    ) -> anyhow::Result<Box<dyn RawResultSet>>;

    /// Affected row count.
    async fn execute_update(
        &self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeys,
    ) -> anyhow::Result<u64>;

    /// `true` when the statement produced a result set.
    async fn execute(
        &self,
        sql: &str,
        parameters: &[Value],
        keys: &GeneratedKeys,
    ) -> anyhow::Result<bool>;
}
