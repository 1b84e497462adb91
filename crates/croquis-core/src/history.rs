//! The history log — an append-only, monotonically numbered record of every
//! raw mutation, plus the cursor undo/redo moves over it.
//!
//! The log is pure data; the store's change interceptor appends to it and the
//! undo/redo engine walks it. Sequence numbers are contiguous from 1 for the
//! lifetime of the log between clears, so the cursor doubles as a count of
//! currently-applied entries: `current_index == max_index()` means there is
//! nothing to redo.

use serde::{Deserialize, Serialize};

use crate::value::Row;

/// One raw table mutation, or a PUSH/POP group marker.
///
/// `old`/`new` are full-row snapshots, not diffs; UPDATE additionally names
/// the changed column subset so the engine can replay just those columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryOp {
  /// Row created. `new` is the complete row.
  Insert { table: String, pk: Row, new: Row },
  /// Row removed. `old` is the complete row as it was.
  Delete { table: String, pk: Row, old: Row },
  /// Columns changed. `columns` is the changed subset — a single column, or
  /// the non-key members of a unique-constraint group that must replay
  /// atomically.
  Update {
    table:   String,
    pk:      Row,
    columns: Vec<String>,
    old:     Row,
    new:     Row,
  },
  /// Opens a logical undo group, labelled for the UI. `pop_seq` is filled in
  /// when the matching [`HistoryOp::Pop`] is recorded.
  Push {
    message: String,
    pop_seq: Option<i64>,
  },
  /// Closes the innermost open group.
  Pop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub seq: i64,
  pub op:  HistoryOp,
}

impl HistoryEntry {
  /// Human-readable description of a single-entry undo step, used when no
  /// PUSH label applies ("Update name of object").
  pub fn label(&self) -> String {
    match &self.op {
      HistoryOp::Insert { table, .. } => format!("Add {table}"),
      HistoryOp::Delete { table, .. } => format!("Remove {table}"),
      HistoryOp::Update { table, columns, .. } => {
        format!("Update {} of {table}", columns.join(", "))
      }
      HistoryOp::Push { message, .. } => message.clone(),
      HistoryOp::Pop => String::new(),
    }
  }
}

/// Append-only history log with a movable cursor.
///
/// Appending while the cursor sits before the end first truncates every entry
/// past the cursor — the classic "new edit after undo invalidates redo" rule.
/// Entries are never edited afterwards, except that the interceptor's
/// compression rule may rewrite the value fields of the most recent entry.
#[derive(Debug, Default)]
pub struct HistoryLog {
  entries: Vec<HistoryEntry>,
  current: i64,
}

impl HistoryLog {
  pub fn new() -> Self { Self::default() }

  /// Drop any pending-redo tail, then append `op` with the next sequence
  /// number and advance the cursor over it. Returns the assigned sequence
  /// number.
  pub fn append(&mut self, op: HistoryOp) -> i64 {
    self.truncate_to_current();
    let seq = self.entries.len() as i64 + 1;
    self.entries.push(HistoryEntry { seq, op });
    self.current = seq;
    seq
  }

  /// Drop all entries and reset the cursor. Does not undo anything.
  pub fn clear(&mut self) {
    self.entries.clear();
    self.current = 0;
  }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  /// Highest sequence number in the log; 0 when empty.
  pub fn max_index(&self) -> i64 { self.entries.len() as i64 }

  pub fn current_index(&self) -> i64 { self.current }

  /// Move the cursor. Only the undo/redo engine calls this; it keeps the
  /// cursor on logical-group boundaries.
  pub fn set_current_index(&mut self, index: i64) {
    debug_assert!((0..=self.max_index()).contains(&index));
    self.current = index;
  }

  pub fn entry(&self, seq: i64) -> Option<&HistoryEntry> {
    if seq < 1 {
      return None;
    }
    self.entries.get(seq as usize - 1)
  }

  /// Mutable access for the two sanctioned rewrites: compression of the
  /// latest entry's values, and back-filling a PUSH's `pop_seq`. Sequence
  /// numbers and primary keys are never touched.
  pub fn entry_mut(&mut self, seq: i64) -> Option<&mut HistoryEntry> {
    if seq < 1 {
      return None;
    }
    self.entries.get_mut(seq as usize - 1)
  }

  pub fn last(&self) -> Option<&HistoryEntry> { self.entries.last() }

  pub fn last_mut(&mut self) -> Option<&mut HistoryEntry> {
    self.entries.last_mut()
  }

  /// Whether the cursor sits at the end of the log — the only state in which
  /// compression against the last entry is sound.
  pub fn at_end(&self) -> bool { self.current == self.max_index() }

  /// Drop every entry past `seq` and pull the cursor back with it. Used to
  /// discard the entries a failed compound operation recorded before its
  /// database changes were rolled back.
  pub fn truncate_to(&mut self, seq: i64) {
    let keep = seq.clamp(0, self.max_index());
    self.entries.truncate(keep as usize);
    self.current = self.current.min(keep);
  }

  fn truncate_to_current(&mut self) {
    if self.current < self.max_index() {
      self.entries.truncate(self.current as usize);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn update_op(table: &str, n: i64) -> HistoryOp {
    HistoryOp::Update {
      table:   table.to_owned(),
      pk:      vec![n.into()],
      columns: vec!["name".to_owned()],
      old:     vec![crate::value::Value::Null],
      new:     vec![n.into()],
    }
  }

  #[test]
  fn sequence_numbers_are_contiguous_from_one() {
    let mut log = HistoryLog::new();
    assert_eq!(log.append(update_op("t", 1)), 1);
    assert_eq!(log.append(update_op("t", 2)), 2);
    assert_eq!(log.append(update_op("t", 3)), 3);
    assert_eq!(log.max_index(), 3);
    assert_eq!(log.current_index(), 3);
  }

  #[test]
  fn append_after_rewind_truncates_redo_tail() {
    let mut log = HistoryLog::new();
    for n in 1..=5 {
      log.append(update_op("t", n));
    }
    log.set_current_index(3);
    let seq = log.append(update_op("t", 6));

    assert_eq!(seq, 4);
    assert_eq!(log.max_index(), 4);
    assert!(log.at_end());
    // Entries 4 and 5 are gone for good.
    assert_eq!(log.entry(4).map(|e| e.seq), Some(4));
    assert_eq!(log.entry(5), None);
  }

  #[test]
  fn clear_resets_cursor_without_renumbering_gap() {
    let mut log = HistoryLog::new();
    log.append(update_op("t", 1));
    log.append(update_op("t", 2));
    log.clear();

    assert!(log.is_empty());
    assert_eq!(log.current_index(), 0);
    assert_eq!(log.append(update_op("t", 3)), 1);
  }

  #[test]
  fn entry_lookup_bounds() {
    let mut log = HistoryLog::new();
    log.append(update_op("t", 1));
    assert!(log.entry(0).is_none());
    assert!(log.entry(1).is_some());
    assert!(log.entry(2).is_none());
  }

  #[test]
  fn labels_for_single_entry_steps() {
    let entry = HistoryEntry { seq: 1, op: update_op("object", 1) };
    assert_eq!(entry.label(), "Update name of object");

    let push = HistoryEntry {
      seq: 2,
      op:  HistoryOp::Push { message: "Add widget".into(), pop_seq: None },
    };
    assert_eq!(push.label(), "Add widget");
  }
}
