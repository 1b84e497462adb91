//! The `DocumentStore` trait.
//!
//! Implemented by storage backends (e.g. `croquis-store-sqlite`). Editor
//! layers — widgets, import/export, clipboard — depend on this abstraction,
//! not on any concrete backend.

use crate::value::{Row, Value};

/// Abstraction over a transactional document store with automatic history.
///
/// Every mutation made through [`insert`](Self::insert),
/// [`delete`](Self::delete) or [`update`](Self::update) is captured by the
/// backend's change interceptor; callers never log anything themselves.
/// Bracket the raw mutations of one user-visible command with
/// [`push`](Self::push)/[`pop`](Self::pop) so undo treats them as a unit.
///
/// The model is single-threaded and synchronous: calls either complete or
/// return an error, and the caller must not start a second logical edit
/// while a push/pop scope is open.
pub trait DocumentStore {
  type Error: std::error::Error + 'static;

  // ── Record CRUD ───────────────────────────────────────────────────────

  /// Insert a full row into a tracked table.
  fn insert(&mut self, table: &str, row: Row) -> Result<(), Self::Error>;

  /// Delete the row matching `pk`. Fails if dependent child rows exist;
  /// cascade through the composition helpers instead.
  fn delete(&mut self, table: &str, pk: &[Value]) -> Result<(), Self::Error>;

  /// Set the given columns of the row matching `pk`. Setting every column to
  /// its current value records nothing.
  fn update(
    &mut self,
    table: &str,
    pk: &[Value],
    changes: &[(&str, Value)],
  ) -> Result<(), Self::Error>;

  /// Fetch the full row matching `pk`, if present.
  fn get(
    &self,
    table: &str,
    pk: &[Value],
  ) -> Result<Option<Row>, Self::Error>;

  // ── Transaction grouping ──────────────────────────────────────────────

  /// Open a logical undo group labelled `message`. Nested groups are
  /// recorded, but only the outermost label reaches the undo/redo UI.
  fn push(&mut self, message: &str) -> Result<(), Self::Error>;

  /// Close the innermost open group.
  fn pop(&mut self) -> Result<(), Self::Error>;

  // ── Undo / redo ───────────────────────────────────────────────────────

  /// Revert the latest logical step. A no-op when there is nothing to undo;
  /// raises a history-corrupted error if replay fails (the history log is
  /// cleared before the error is returned).
  fn undo(&mut self) -> Result<(), Self::Error>;

  /// Re-apply the next logical step. A no-op when there is nothing to redo.
  fn redo(&mut self) -> Result<(), Self::Error>;

  /// Labels for the steps an [`undo`](Self::undo) and a [`redo`](Self::redo)
  /// would act on, for "Undo: …" / "Redo: …" affordances.
  fn undo_redo_messages(&self) -> (Option<String>, Option<String>);

  // ── History control ───────────────────────────────────────────────────

  /// Global suspend switch; used while loading or migrating a document.
  fn history_enabled(&self) -> bool;
  fn set_history_enabled(&mut self, enabled: bool);

  fn current_index(&self) -> i64;

  /// Jump to a point in history — internally just repeated undo/redo, so the
  /// cursor lands on the nearest logical-group boundary.
  fn set_current_index(&mut self, index: i64) -> Result<(), Self::Error>;

  fn max_index(&self) -> i64;

  /// Drop all history and reset the cursor. Does not undo anything.
  fn clear_history(&mut self);
}
