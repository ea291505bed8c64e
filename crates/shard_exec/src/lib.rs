//! Concurrent execution of per-shard SQL units and in-memory, type-normalized
//! access to their results.
//!
//! A router produces [`StatementExecuteUnit`]s (SQL text, parameters and the
//! [`PhysicalStatement`] bound to one datasource), grouped into
//! [`InputGroup`]s. [`StatementExecutor`] runs them concurrently and merges the
//! per-unit outcomes according to its [`FailurePolicy`]. Query outcomes come
//! back as [`MemoryQueryResult`]s.

pub mod config;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod query_result;
pub mod source;
pub mod unit;
pub mod value;

pub use config::{ExecutorConfig, FailurePolicy};
pub use error::{ExecError, Result};
pub use executor::StatementExecutor;
pub use metadata::{ColumnMetaData, SqlType};
pub use query_result::MemoryQueryResult;
pub use source::{GeneratedKeys, PhysicalStatement, RawResultSet};
pub use unit::{ExecutionUnit, InputGroup, StatementContext, StatementExecuteUnit};
pub use value::{Value, ValueType};
