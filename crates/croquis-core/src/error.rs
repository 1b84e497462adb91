//! Error types for `croquis-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A mutation would leave two rows agreeing on a unique-constraint group.
  #[error("unique constraint ({columns}) violated on table {table}")]
  UniqueViolation { table: String, columns: String },

  /// A row references a parent record that does not exist, or a record with
  /// dependent children was deleted without cascading.
  #[error("foreign key violation on table {table}")]
  ForeignKeyViolation { table: String },

  /// A reparent would make a record its own ancestor.
  #[error("reparent would create a cycle in table {table}")]
  Cycle { table: String },

  /// History recording requires a primary key on every tracked table.
  #[error("table {0} has no primary key")]
  NoPrimaryKey(String),

  #[error("unknown table: {0}")]
  UnknownTable(String),

  #[error("unknown column {column} on table {table}")]
  UnknownColumn { table: String, column: String },

  /// Primary key columns identify a record for its whole lifetime and can
  /// never be the target of an update.
  #[error("column {column} is part of the primary key of table {table}")]
  PrimaryKeyColumn { table: String, column: String },

  /// A row value list does not match the table's column count.
  #[error("table {table} expects {expected} values, got {got}")]
  RowArity {
    table:    String,
    expected: usize,
    got:      usize,
  },

  #[error("no row in table {table} matches the given primary key")]
  RowNotFound { table: String },

  /// The history log and the store no longer agree, or the group markers are
  /// unbalanced. When a replay fails, the log is cleared before this error is
  /// surfaced; the store itself is intact either way.
  #[error("history corrupted: {0}")]
  HistoryCorrupted(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
