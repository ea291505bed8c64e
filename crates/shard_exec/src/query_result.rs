//! Memory-backed query result.
//!
//! A [`MemoryQueryResult`] drains one raw result source at construction and
//! serves rows from memory afterwards. Values are normalized per column SQL
//! type while loading, so later reads only ever widen.

use std::io::Cursor;

use anyhow::anyhow;
use bytes::Bytes;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::error::{ExecError, Result};
use crate::metadata::{ColumnMetaData, SqlType};
use crate::source::RawResultSet;
use crate::value::{Value, ValueType};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Single-cursor, forward-only rows loaded from one shard.
#[derive(Debug)]
pub struct MemoryQueryResult {
    columns: Vec<ColumnMetaData>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    was_null: bool,
}

impl MemoryQueryResult {
    /// Reads metadata and every row of `source`.
    pub fn new(mut source: Box<dyn RawResultSet>) -> Result<Self> {
        let columns = source.metadata().map_err(ExecError::RowAccess)?;
        let mut rows = Vec::new();
        while source.next().map_err(ExecError::RowAccess)? {
            let mut row = Vec::with_capacity(columns.len());
            for (offset, column) in columns.iter().enumerate() {
                let raw = source.value(offset + 1).map_err(ExecError::RowAccess)?;
                row.push(normalize(raw, column).map_err(ExecError::RowAccess)?);
            }
            rows.push(row);
        }
        tracing::trace!(columns = columns.len(), rows = rows.len(), "materialized query result");
        Ok(Self {
            columns,
            rows: rows.into_iter(),
            current: None,
            was_null: false,
        })
    }

    /// Moves to the next row; `false` once every row has been visited.
    pub fn next(&mut self) -> bool {
        self.current = self.rows.next();
        self.was_null = self.current.is_none();
        self.current.is_some()
    }

    /// Value of a 1-based column on the current row.
    ///
    /// Nulls come back as [`Value::Null`] whatever `value_type` asks for.
    /// Otherwise the stored value is widened toward `value_type` when that
    /// loses nothing, and returned as stored when it would.
    pub fn get_value(&mut self, index: usize, value_type: ValueType) -> Result<Value> {
        let stored = self.current_value(index)?.clone();
        self.was_null = stored.is_null();
        Ok(widen(stored, value_type))
    }

    /// Like [`Self::get_value`], with timestamps placed in `offset`.
    pub fn get_calendar_value(
        &mut self,
        index: usize,
        value_type: ValueType,
        offset: FixedOffset,
    ) -> Result<Value> {
        match self.get_value(index, value_type)? {
            Value::Timestamp(local) => offset
                .from_local_datetime(&local)
                .single()
                .map(Value::TimestampTz)
                .ok_or_else(|| ExecError::row_access(format!("`{local}` has no instant at {offset}"))),
            other => Ok(other),
        }
    }

    /// Byte view of a column: `ascii`, `unicode` (UTF-16BE) or `binary`.
    pub fn get_input_stream(&mut self, index: usize, encoding: &str) -> Result<Cursor<Vec<u8>>> {
        let stored = self.current_value(index)?.clone();
        self.was_null = stored.is_null();
        if stored.is_null() {
            return Ok(Cursor::new(Vec::new()));
        }
        let bytes = match encoding.to_ascii_lowercase().as_str() {
            "ascii" => stored
                .to_string()
                .chars()
                .map(|ch| if ch.is_ascii() { ch as u8 } else { b'?' })
                .collect(),
            "unicode" => stored
                .to_string()
                .encode_utf16()
                .flat_map(u16::to_be_bytes)
                .collect(),
            "binary" => match stored {
                Value::Blob(bytes) => bytes.to_vec(),
                other => serde_json::to_vec(&other).map_err(|err| ExecError::RowAccess(err.into()))?,
            },
            other => {
                return Err(ExecError::row_access(format!(
                    "unsupported input stream encoding `{other}`"
                )))
            }
        };
        Ok(Cursor::new(bytes))
    }

    /// Whether the most recently read column was SQL NULL.
    pub fn was_null(&self) -> bool {
        self.was_null
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_label(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.label)
    }

    pub fn column_name(&self, index: usize) -> Result<&str> {
        Ok(&self.column(index)?.name)
    }

    pub fn column_type(&self, index: usize) -> Result<&SqlType> {
        Ok(&self.column(index)?.sql_type)
    }

    pub fn is_signed(&self, index: usize) -> Result<bool> {
        Ok(self.column(index)?.signed)
    }

    pub fn columns(&self) -> &[ColumnMetaData] {
        &self.columns
    }

    fn column(&self, index: usize) -> Result<&ColumnMetaData> {
        index
            .checked_sub(1)
            .and_then(|offset| self.columns.get(offset))
            .ok_or_else(|| {
                ExecError::row_access(format!(
                    "column index {index} out of range 1..={}",
                    self.columns.len()
                ))
            })
    }

    fn current_value(&self, index: usize) -> Result<&Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| ExecError::row_access("cursor is not positioned on a row"))?;
        index
            .checked_sub(1)
            .and_then(|offset| row.get(offset))
            .ok_or_else(|| {
                ExecError::row_access(format!("column index {index} out of range 1..={}", row.len()))
            })
    }
}

/// Canonical representation of a raw value for its column type.
fn normalize(raw: Value, column: &ColumnMetaData) -> anyhow::Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = |raw: &Value| {
        anyhow!(
            "column `{}` of type {} cannot hold {} value `{raw}`",
            column.label,
            column.sql_type,
            raw.type_name()
        )
    };
    let normalized = match &column.sql_type {
        SqlType::Boolean | SqlType::Bit => raw.as_bool().map(Value::Boolean),
        SqlType::TinyInt | SqlType::SmallInt => int(&raw),
        SqlType::Integer if column.signed => int(&raw),
        SqlType::Integer => raw.as_i64().map(Value::Long),
        SqlType::BigInt if column.signed => raw.as_i64().map(Value::Long),
        SqlType::BigInt => raw.as_big_integer().map(Value::BigInteger),
        SqlType::Numeric | SqlType::Decimal => raw.as_decimal().map(Value::Decimal),
        SqlType::Float | SqlType::Real | SqlType::Double => raw.as_f64().map(Value::Double),
        sql_type if sql_type.is_character() => Some(Value::String(
            raw.as_text().map_or_else(|| raw.to_string(), str::to_string),
        )),
        SqlType::Date => temporal_date(&raw),
        SqlType::Time => temporal_time(&raw),
        SqlType::Timestamp => temporal_timestamp(&raw),
        SqlType::Clob => raw.as_text().map(|text| Value::Clob(text.to_string())),
        sql_type if sql_type.is_binary() => match &raw {
            Value::Blob(bytes) => Some(Value::Blob(bytes.clone())),
            Value::String(text) => Some(Value::Blob(Bytes::from(text.clone().into_bytes()))),
            _ => None,
        },
        SqlType::Array => matches!(raw, Value::Array(_)).then(|| raw.clone()),
        _ => Some(raw.clone()),
    };
    normalized.ok_or_else(|| mismatch(&raw))
}

fn int(raw: &Value) -> Option<Value> {
    raw.as_i64()
        .and_then(|value| i32::try_from(value).ok())
        .map(Value::Int)
}

fn temporal_date(raw: &Value) -> Option<Value> {
    match raw {
        Value::Date(date) => Some(Value::Date(*date)),
        Value::Timestamp(ts) => Some(Value::Date(ts.date())),
        Value::String(text) => NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
            .ok()
            .map(Value::Date),
        _ => None,
    }
}

fn temporal_time(raw: &Value) -> Option<Value> {
    match raw {
        Value::Time(time) => Some(Value::Time(*time)),
        Value::Timestamp(ts) => Some(Value::Time(ts.time())),
        Value::String(text) => NaiveTime::parse_from_str(text.trim(), TIME_FORMAT)
            .ok()
            .map(Value::Time),
        _ => None,
    }
}

fn temporal_timestamp(raw: &Value) -> Option<Value> {
    match raw {
        Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
        Value::TimestampTz(ts) => Some(Value::Timestamp(ts.naive_local())),
        Value::Date(date) => date.and_hms_opt(0, 0, 0).map(Value::Timestamp),
        Value::String(text) => NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
            .ok()
            .map(Value::Timestamp),
        _ => None,
    }
}

/// Lossless conversion toward `target`; anything else is returned unchanged.
fn widen(stored: Value, target: ValueType) -> Value {
    match (target, stored) {
        (_, Value::Null) => Value::Null,
        (ValueType::Long, Value::Int(value)) => Value::Long(i64::from(value)),
        (ValueType::BigInteger, value @ (Value::Int(_) | Value::Long(_))) => value
            .as_big_integer()
            .map_or(value, Value::BigInteger),
        (ValueType::Decimal, value @ (Value::Int(_) | Value::Long(_) | Value::BigInteger(_) | Value::Double(_))) => {
            value.as_decimal().map_or(value, Value::Decimal)
        }
        (ValueType::Double, value @ (Value::Int(_) | Value::Long(_) | Value::Decimal(_))) => {
            value.as_f64().map_or(value, Value::Double)
        }
        (ValueType::Date, Value::Timestamp(ts)) => Value::Date(ts.date()),
        (ValueType::Time, Value::Timestamp(ts)) => Value::Time(ts.time()),
        (ValueType::String, Value::Clob(text)) => Value::String(text),
        (ValueType::Clob, Value::String(text)) => Value::Clob(text),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn normalizes_integers_by_signedness() {
        let signed = ColumnMetaData::new("id", SqlType::Integer);
        let unsigned = ColumnMetaData::new("id", SqlType::Integer).unsigned();
        assert_eq!(normalize(Value::Long(5), &signed).expect("int"), Value::Int(5));
        assert_eq!(normalize(Value::Int(5), &unsigned).expect("long"), Value::Long(5));
        let big = ColumnMetaData::new("id", SqlType::BigInt).unsigned();
        assert_eq!(
            normalize(Value::Long(7), &big).expect("big"),
            Value::BigInteger(BigInt::from(7))
        );
        assert!(normalize(Value::Long(i64::MAX), &signed).is_err());
    }

    #[test]
    fn normalizes_temporal_text() {
        let column = ColumnMetaData::new("created", SqlType::Timestamp);
        let Value::Timestamp(ts) = normalize(Value::from("2024-02-03 04:05:06"), &column).expect("ts") else {
            panic!("expected a timestamp");
        };
        assert_eq!(ts.to_string(), "2024-02-03 04:05:06");
        let date = ColumnMetaData::new("day", SqlType::Date);
        assert!(normalize(Value::from("not a date"), &date).is_err());
    }

    #[test]
    fn widening_never_narrows() {
        assert_eq!(widen(Value::Int(3), ValueType::Long), Value::Long(3));
        assert_eq!(widen(Value::Long(3), ValueType::Int), Value::Long(3));
        assert_eq!(
            widen(Value::BigInteger(BigInt::from(9)), ValueType::Long),
            Value::BigInteger(BigInt::from(9))
        );
        assert_eq!(widen(Value::Null, ValueType::String), Value::Null);
        assert_eq!(widen(Value::Clob("x".to_string()), ValueType::String), Value::from("x"));
    }
}
