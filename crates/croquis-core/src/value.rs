//! Column values — the dynamic payload of every tracked record.
//!
//! The store is generic over its tables: a row is a positional vector of
//! [`Value`]s matched against the owning table's column list. The variants
//! mirror SQLite's storage classes; no tracked table declares a blob column.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One column value. Serialises untagged, so a [`Row`] round-trips as a plain
/// JSON array — the representation used by the store's state snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

/// A full row of a tracked table, in column order.
pub type Row = Vec<Value>;

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Null => write!(f, "(null)"),
      Self::Integer(i) => write!(f, "{i}"),
      Self::Real(r) => write!(f, "{r}"),
      Self::Text(s) => write!(f, "{s}"),
    }
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Integer(v.into()) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(inner) => inner.into(),
      None => Self::Null,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn option_conversions() {
    assert_eq!(Value::from(None::<i64>), Value::Null);
    assert_eq!(Value::from(Some(3)), Value::Integer(3));
    assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
  }

  #[test]
  fn accessors() {
    assert_eq!(Value::Integer(7).as_integer(), Some(7));
    assert_eq!(Value::Text("x".into()).as_integer(), None);
    assert!(Value::Null.is_null());
  }
}
