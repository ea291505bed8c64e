//! Column values handed to sharding strategies by the external router.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One sharding key value extracted from a statement.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShardingKey {
    Int(i64),
    Text(String),
}

impl ShardingKey {
    /// Integer view of the key; textual keys are accepted when they parse.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

impl fmt::Display for ShardingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for ShardingKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ShardingKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Condition on one column: either exact values (`=`, `IN`) or an inclusive range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardingCondition {
    Precise(Vec<ShardingKey>),
    /// `None` bounds are open.
    Range {
        lower: Option<ShardingKey>,
        upper: Option<ShardingKey>,
    },
}

/// Condition bound to a (case-insensitive) column name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardingValue {
    pub column: String,
    pub condition: ShardingCondition,
}

impl ShardingValue {
    pub fn precise(column: impl Into<String>, keys: Vec<ShardingKey>) -> Self {
        Self {
            column: column.into(),
            condition: ShardingCondition::Precise(keys),
        }
    }

    pub fn range(
        column: impl Into<String>,
        lower: Option<ShardingKey>,
        upper: Option<ShardingKey>,
    ) -> Self {
        Self {
            column: column.into(),
            condition: ShardingCondition::Range { lower, upper },
        }
    }

    pub fn matches_column(&self, column: &str) -> bool {
        self.column.eq_ignore_ascii_case(column)
    }
}
