//! Column values as handed out by query results.

use std::fmt;

use bigdecimal::BigDecimal;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::Serialize;

/// A single SQL value.
///
/// Raw result sources may hand out any variant; a query result normalizes
/// it against the column's SQL type when the row is loaded.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    BigInteger(BigInt),
    Decimal(BigDecimal),
    Double(f64),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Blob(Bytes),
    Clob(String),
    Array(Vec<Value>),
}

/// Representation requested by a column read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Int,
    Long,
    BigInteger,
    Decimal,
    Double,
    String,
    Date,
    Time,
    Timestamp,
    Blob,
    Clob,
    Array,
    /// Stored value as-is.
    Object,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::BigInteger(_) => "big integer",
            Self::Decimal(_) => "decimal",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::TimestampTz(_) => "timestamp with offset",
            Self::Blob(_) => "blob",
            Self::Clob(_) => "clob",
            Self::Array(_) => "array",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            Self::Int(value) => Some(*value != 0),
            Self::Long(value) => Some(*value != 0),
            Self::String(raw) => match raw.trim() {
                "1" => Some(true),
                "0" => Some(false),
                other => other.to_ascii_lowercase().parse().ok(),
            },
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Boolean(value) => Some(i64::from(*value)),
            Self::Int(value) => Some(i64::from(*value)),
            Self::Long(value) => Some(*value),
            Self::BigInteger(value) => value.to_i64(),
            Self::Decimal(value) if value.is_integer() => value.to_i64(),
            Self::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_big_integer(&self) -> Option<BigInt> {
        match self {
            Self::Int(value) => Some(BigInt::from(*value)),
            Self::Long(value) => Some(BigInt::from(*value)),
            Self::BigInteger(value) => Some(value.clone()),
            Self::Decimal(value) if value.is_integer() => {
                let (digits, _) = value.with_scale(0).into_bigint_and_exponent();
                Some(digits)
            }
            Self::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            Self::Int(value) => Some(BigDecimal::from(*value)),
            Self::Long(value) => Some(BigDecimal::from(*value)),
            Self::BigInteger(value) => Some(BigDecimal::from(value.clone())),
            Self::Decimal(value) => Some(value.clone()),
            Self::Double(value) => BigDecimal::from_f64(*value),
            Self::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(f64::from(*value)),
            Self::Long(value) => value.to_f64(),
            Self::BigInteger(value) => value.to_f64(),
            Self::Decimal(value) => value.to_f64(),
            Self::Double(value) => Some(*value),
            Self::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(text) | Self::Clob(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Long(value) => write!(f, "{value}"),
            Self::BigInteger(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::String(value) | Self::Clob(value) => f.write_str(value),
            Self::Date(value) => write!(f, "{value}"),
            Self::Time(value) => write!(f, "{value}"),
            Self::Timestamp(value) => write!(f, "{value}"),
            Self::TimestampTz(value) => write!(f, "{}", value.to_rfc3339()),
            Self::Blob(value) => f.write_str(&String::from_utf8_lossy(value)),
            Self::Array(values) => {
                f.write_str("[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
