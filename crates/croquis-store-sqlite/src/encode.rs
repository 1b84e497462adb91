//! Conversions between [`croquis_core::value::Value`] and SQLite column
//! values.

use croquis_core::value::Value;
use rusqlite::types::{ToSqlOutput, ValueRef};

/// Bind a column value as a SQL parameter without copying text payloads.
pub fn to_sql(value: &Value) -> ToSqlOutput<'_> {
  match value {
    Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
    Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
    Value::Real(r) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*r)),
    Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
  }
}

/// Decode a column read back from SQLite. Tracked tables declare no blob
/// columns; a blob is read lossily as text rather than failing a snapshot.
pub fn from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::Integer(i),
    ValueRef::Real(r) => Value::Real(r),
    ValueRef::Text(t) | ValueRef::Blob(t) => {
      Value::Text(String::from_utf8_lossy(t).into_owned())
    }
  }
}

/// Read a full row from the current cursor position, in column order.
pub fn row_values(
  row: &rusqlite::Row<'_>,
  column_count: usize,
) -> Result<Vec<Value>, rusqlite::Error> {
  (0..column_count)
    .map(|i| Ok(from_sql(row.get_ref(i)?)))
    .collect()
}
