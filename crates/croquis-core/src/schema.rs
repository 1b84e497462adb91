//! Static description of a tracked entity table.
//!
//! Computed once when a store is opened, by introspecting the backend's table
//! definitions, and never mutated afterwards. The change interceptor uses the
//! primary-key split to snapshot rows and the unique groups to decide which
//! column updates must be recorded (and replayed) atomically.

use crate::{
  error::{Error, Result},
  value::Row,
};

/// Column, primary-key and unique-constraint description of one tracked
/// table.
#[derive(Debug, Clone)]
pub struct TableSchema {
  name:          String,
  columns:       Vec<String>,
  /// Indices into `columns` forming the primary key, in key order.
  pk:            Vec<usize>,
  /// Unique-constraint column groups other than the primary key, as indices
  /// into `columns`. Groups may include primary-key columns for scoping; the
  /// interceptor only ever records the non-key members.
  unique_groups: Vec<Vec<usize>>,
}

impl TableSchema {
  /// Build a schema from column names. Fails if the table has no primary key
  /// (history recording requires one) or if a key/group names an unknown
  /// column.
  pub fn new(
    name: impl Into<String>,
    columns: Vec<String>,
    pk_columns: &[String],
    unique_groups: &[Vec<String>],
  ) -> Result<Self> {
    let name = name.into();

    if pk_columns.is_empty() {
      return Err(Error::NoPrimaryKey(name));
    }

    let resolve = |column: &String| -> Result<usize> {
      columns
        .iter()
        .position(|c| c == column)
        .ok_or_else(|| Error::UnknownColumn {
          table:  name.clone(),
          column: column.clone(),
        })
    };

    let pk = pk_columns
      .iter()
      .map(|c| resolve(c))
      .collect::<Result<_>>()?;
    let unique_groups = unique_groups
      .iter()
      .map(|group| group.iter().map(|c| resolve(c)).collect())
      .collect::<Result<_>>()?;

    Ok(Self { name, columns, pk, unique_groups })
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn columns(&self) -> &[String] { &self.columns }

  pub fn column_name(&self, index: usize) -> &str { &self.columns[index] }

  pub fn column_index(&self, column: &str) -> Result<usize> {
    self
      .columns
      .iter()
      .position(|c| c == column)
      .ok_or_else(|| Error::UnknownColumn {
        table:  self.name.clone(),
        column: column.to_owned(),
      })
  }

  pub fn pk_indices(&self) -> &[usize] { &self.pk }

  pub fn is_pk_column(&self, index: usize) -> bool { self.pk.contains(&index) }

  pub fn pk_columns(&self) -> Vec<&str> {
    self.pk.iter().map(|&i| self.columns[i].as_str()).collect()
  }

  pub fn unique_groups(&self) -> &[Vec<usize>] { &self.unique_groups }

  /// The unique group containing `column` whose non-key member count is at
  /// least two — the groups whose updates must stay atomic. Single extra
  /// columns replay safely on their own.
  pub fn atomic_group_containing(&self, column: usize) -> Option<&[usize]> {
    self
      .unique_groups
      .iter()
      .find(|group| {
        group.contains(&column)
          && group.iter().filter(|&&i| !self.is_pk_column(i)).count() >= 2
      })
      .map(Vec::as_slice)
  }

  pub fn check_arity(&self, row: &Row) -> Result<()> {
    if row.len() == self.columns.len() {
      Ok(())
    } else {
      Err(Error::RowArity {
        table:    self.name.clone(),
        expected: self.columns.len(),
        got:      row.len(),
      })
    }
  }

  /// Extract the primary-key values of a full row.
  pub fn pk_of(&self, row: &Row) -> Row {
    self.pk.iter().map(|&i| row[i].clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::Value;

  fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_owned()).collect()
  }

  fn object_schema() -> TableSchema {
    TableSchema::new(
      "object",
      cols(&["ui_id", "object_id", "type_id", "name", "parent_id", "position"]),
      &cols(&["ui_id", "object_id"]),
      &[cols(&["ui_id", "parent_id", "position"])],
    )
    .unwrap()
  }

  #[test]
  fn rejects_table_without_primary_key() {
    let err = TableSchema::new("global", cols(&["key", "value"]), &[], &[]);
    assert!(matches!(err, Err(Error::NoPrimaryKey(t)) if t == "global"));
  }

  #[test]
  fn rejects_unknown_key_column() {
    let err =
      TableSchema::new("t", cols(&["a"]), &cols(&["missing"]), &[]);
    assert!(matches!(err, Err(Error::UnknownColumn { .. })));
  }

  #[test]
  fn pk_extraction() {
    let schema = object_schema();
    let row = vec![
      Value::Integer(1),
      Value::Integer(4),
      Value::from("GtkBox"),
      Value::Null,
      Value::Null,
      Value::Integer(0),
    ];
    assert_eq!(schema.pk_of(&row), vec![Value::Integer(1), Value::Integer(4)]);
  }

  #[test]
  fn atomic_group_excludes_key_only_membership() {
    let schema = object_schema();
    let parent = schema.column_index("parent_id").unwrap();
    let position = schema.column_index("position").unwrap();
    let name = schema.column_index("name").unwrap();

    // parent_id and position are the two non-key members of the group.
    assert!(schema.atomic_group_containing(parent).is_some());
    assert!(schema.atomic_group_containing(position).is_some());
    assert!(schema.atomic_group_containing(name).is_none());
  }
}
