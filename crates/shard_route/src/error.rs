//! Error taxonomy for rule construction and routing lookups.

use thiserror::Error;

/// Result alias used across the routing crate.
pub type Result<T> = std::result::Result<T, ShardingError>;

/// Failures raised while building or consulting a [`crate::ShardingRule`].
///
/// Configuration errors are never retried: they surface synchronously either
/// at construction or at the first lookup that needs the missing target.
#[derive(Debug, Error)]
pub enum ShardingError {
    /// Invalid or missing routing target (unknown table, unknown datasource,
    /// empty required collection, duplicate rule).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A pluggable algorithm rejected its properties or its input.
    #[error("algorithm `{name}` failed: {source:#}")]
    Algorithm {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    /// A sharding value could not be mapped onto any target.
    #[error("routing error: {0}")]
    Routing(String),
}

impl ShardingError {
    /// Shorthand for building a [`ShardingError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns `true` for configuration failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
