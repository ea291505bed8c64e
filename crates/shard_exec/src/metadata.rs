//! Column metadata reported by a raw result source.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SQL column types the result layer distinguishes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlType {
    Boolean,
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Numeric,
    Decimal,
    Float,
    Real,
    Double,
    Char,
    VarChar,
    LongVarChar,
    NChar,
    NVarChar,
    Date,
    Time,
    Timestamp,
    Clob,
    Blob,
    Binary,
    VarBinary,
    LongVarBinary,
    Array,
    /// Anything else, by driver type name; values pass through untouched.
    Other(String),
}

impl SqlType {
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::VarChar | Self::LongVarChar | Self::NChar | Self::NVarChar
        )
    }

    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Blob | Self::Binary | Self::VarBinary | Self::LongVarBinary
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Per-column metadata, captured once when a result is materialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetaData {
    pub label: String,
    pub name: String,
    pub sql_type: SqlType,
    pub signed: bool,
}

impl ColumnMetaData {
    /// Signed column whose label equals its name.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            sql_type,
            signed: true,
        }
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
