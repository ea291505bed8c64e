//! Executor and result-access failures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// Reading a raw result source failed, or a cursor/column access was invalid.
    #[error("row access failed: {0:#}")]
    RowAccess(#[source] anyhow::Error),
    /// One execution unit failed; only surfaced under the fail-fast policy.
    #[error("execution unit {index} on `{data_source}` failed: {source:#}")]
    UnitFailure {
        index: usize,
        data_source: String,
        sql: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ExecError {
    pub(crate) fn row_access(message: impl std::fmt::Display) -> Self {
        Self::RowAccess(anyhow::anyhow!("{message}"))
    }
}
