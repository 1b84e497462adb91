//! The undo/redo engine.
//!
//! A step is either a single history entry or a whole PUSH..POP group; the
//! engine walks the log, replays the entries of one step with history
//! recording and constraint enforcement suspended, validates the resulting
//! state, and moves the cursor. Any failure mid-replay rolls the database
//! back to the pre-step state; any failure at all then clears the log, since
//! a log that cannot be replayed no longer describes the store.

use std::collections::BTreeMap;

use croquis_core::{
  error::Error as CoreError,
  events::{self, RowMove, Slot},
  history::{HistoryEntry, HistoryOp},
  value::{Row, Value},
};

use crate::{store::SqliteStore, Error, Result};

impl SqliteStore {
  /// Revert the most recent step. A no-op when nothing has been recorded.
  pub fn undo(&mut self) -> Result<()> {
    if self.current_index() == 0 {
      return Ok(());
    }
    self.replay(true).map_err(|err| self.corrupt_history(err))
  }

  /// Re-apply the step most recently undone. A no-op at the end of the log.
  pub fn redo(&mut self) -> Result<()> {
    if self.current_index() >= self.max_index() {
      return Ok(());
    }
    self.replay(false).map_err(|err| self.corrupt_history(err))
  }

  /// Jump the cursor to `index` (clamped to the log bounds) by undoing or
  /// redoing whole steps. Because the cursor only rests on step boundaries,
  /// the walk may overshoot an `index` that falls inside a group; it settles
  /// on the nearest boundary at or past the target in the direction of
  /// travel.
  pub fn set_current_index(&mut self, index: i64) -> Result<()> {
    let target = index.clamp(0, self.max_index());
    if target < self.current_index() {
      while self.current_index() > target {
        self.undo()?;
      }
    } else {
      while self.current_index() < target {
        self.redo()?;
      }
    }
    Ok(())
  }

  /// Labels for the next undo and redo steps, for menu items and tooltips.
  /// `None` on a side means that direction has nothing to do.
  pub fn undo_redo_messages(&self) -> (Option<String>, Option<String>) {
    (self.undo_message(), self.redo_message())
  }

  fn undo_message(&self) -> Option<String> {
    let entry = self.history().entry(self.current_index())?;
    match &entry.op {
      HistoryOp::Pop => {
        let push = self.matching_push(entry.seq).ok()?;
        match &self.history().entry(push)?.op {
          HistoryOp::Push { message, .. } => Some(message.clone()),
          _ => None,
        }
      }
      HistoryOp::Push { .. } => None,
      _ => Some(self.entry_message(entry)),
    }
  }

  fn redo_message(&self) -> Option<String> {
    let entry = self.history().entry(self.current_index() + 1)?;
    match &entry.op {
      HistoryOp::Push { message, .. } => Some(message.clone()),
      HistoryOp::Pop => None,
      _ => Some(self.entry_message(entry)),
    }
  }

  // ── Step boundaries ───────────────────────────────────────────────────

  /// Sequence numbers of the next undo step, in application (reverse) order.
  fn undo_span(&self) -> Result<Vec<i64>> {
    let cur = self.current_index();
    let entry = self
      .history()
      .entry(cur)
      .ok_or_else(|| corrupted("undo cursor points past the log"))?;
    match entry.op {
      HistoryOp::Pop => {
        let push = self.matching_push(cur)?;
        Ok((push..=cur).rev().collect())
      }
      HistoryOp::Push { .. } => {
        Err(corrupted("PUSH with no matching POP at the undo cursor"))
      }
      _ => Ok(vec![cur]),
    }
  }

  /// Sequence numbers of the next redo step, in application (forward) order.
  fn redo_span(&self) -> Result<Vec<i64>> {
    let next = self.current_index() + 1;
    let entry = self
      .history()
      .entry(next)
      .ok_or_else(|| corrupted("redo cursor points past the log"))?;
    match &entry.op {
      HistoryOp::Push { pop_seq, .. } => {
        let pop = match pop_seq {
          Some(pop) if *pop > next && *pop <= self.max_index() => *pop,
          _ => self.matching_pop(next)?,
        };
        Ok((next..=pop).collect())
      }
      HistoryOp::Pop => {
        Err(corrupted("POP with no matching PUSH at the redo cursor"))
      }
      _ => Ok(vec![next]),
    }
  }

  fn matching_push(&self, pop_seq: i64) -> Result<i64> {
    let mut depth = 0i64;
    for seq in (1..=pop_seq).rev() {
      match self.history().entry(seq).map(|e| &e.op) {
        Some(HistoryOp::Pop) => depth += 1,
        Some(HistoryOp::Push { .. }) => {
          depth -= 1;
          if depth == 0 {
            return Ok(seq);
          }
        }
        _ => {}
      }
    }
    Err(corrupted("POP with no matching PUSH"))
  }

  fn matching_pop(&self, push_seq: i64) -> Result<i64> {
    let mut depth = 0i64;
    for seq in push_seq..=self.max_index() {
      match self.history().entry(seq).map(|e| &e.op) {
        Some(HistoryOp::Push { .. }) => depth += 1,
        Some(HistoryOp::Pop) => {
          depth -= 1;
          if depth == 0 {
            return Ok(seq);
          }
        }
        _ => {}
      }
    }
    Err(corrupted("PUSH with no matching POP"))
  }

  // ── Replay ────────────────────────────────────────────────────────────

  fn replay(&mut self, backward: bool) -> Result<()> {
    let span = if backward { self.undo_span()? } else { self.redo_span()? };
    let Some(&boundary) = span.last() else {
      return Ok(());
    };
    let new_cursor = if backward { boundary - 1 } else { boundary };

    let was_enabled = self.suspend_history();
    let result = self.replay_span(&span, backward);
    self.resume_history(was_enabled);

    let moves = result?;
    self.history_mut().set_current_index(new_cursor);
    self.emit_changes(&moves);
    Ok(())
  }

  /// Apply one step inside a savepoint and validate the outcome; on any
  /// failure the database is rolled back to the pre-step state.
  fn replay_span(
    &mut self,
    span: &[i64],
    backward: bool,
  ) -> Result<Vec<RowMove>> {
    // The foreign-key pragma has no effect inside a transaction, so suspend
    // enforcement before opening the savepoint.
    self.set_constraints(false)?;
    self.conn().execute_batch("SAVEPOINT croquis_replay")?;

    let mut moves: BTreeMap<(i64, i64), RowMove> = BTreeMap::new();
    let outcome = self
      .apply_span(span, backward, &mut moves)
      .and_then(|()| self.verify_constraints());
    let outcome = match outcome {
      Ok(()) => self
        .conn()
        .execute_batch("RELEASE croquis_replay")
        .map_err(Error::from),
      Err(err) => {
        let _ = self
          .conn()
          .execute_batch("ROLLBACK TO croquis_replay; RELEASE croquis_replay;");
        Err(err)
      }
    };
    self.set_constraints(true)?;
    outcome?;
    Ok(moves.into_values().collect())
  }

  fn apply_span(
    &mut self,
    span: &[i64],
    backward: bool,
    moves: &mut BTreeMap<(i64, i64), RowMove>,
  ) -> Result<()> {
    for &seq in span {
      let entry = self
        .history()
        .entry(seq)
        .cloned()
        .ok_or_else(|| corrupted("history entry missing from the log"))?;
      self.apply_entry(&entry, backward, moves)?;
    }
    Ok(())
  }

  fn apply_entry(
    &mut self,
    entry: &HistoryEntry,
    backward: bool,
    moves: &mut BTreeMap<(i64, i64), RowMove>,
  ) -> Result<()> {
    match &entry.op {
      HistoryOp::Insert { table, pk, new } => {
        if backward {
          self.delete(table, pk)?;
        } else {
          self.insert(table, new.clone())?;
        }
        if table == "object" {
          let slot = Some(self.row_slot(new));
          let (old_slot, new_slot) =
            if backward { (slot, None) } else { (None, slot) };
          track(moves, pk, old_slot, new_slot);
        }
      }
      HistoryOp::Delete { table, pk, old } => {
        if backward {
          self.insert(table, old.clone())?;
        } else {
          self.delete(table, pk)?;
        }
        if table == "object" {
          let slot = Some(self.row_slot(old));
          let (old_slot, new_slot) =
            if backward { (None, slot) } else { (slot, None) };
          track(moves, pk, old_slot, new_slot);
        }
      }
      HistoryOp::Update { table, pk, columns, old, new } => {
        let indices = {
          let schema = self.schema_of(table)?;
          columns
            .iter()
            .map(|c| schema.column_index(c))
            .collect::<Result<Vec<_>, CoreError>>()?
        };
        let source = if backward { old } else { new };
        let changes: Vec<(&str, Value)> = columns
          .iter()
          .zip(&indices)
          .map(|(column, &i)| (column.as_str(), source[i].clone()))
          .collect();
        self.update(table, pk, &changes)?;
        if table == "object" {
          let (from, to) = if backward { (new, old) } else { (old, new) };
          track(
            moves,
            pk,
            Some(self.row_slot(from)),
            Some(self.row_slot(to)),
          );
        }
      }
      HistoryOp::Push { .. } | HistoryOp::Pop => {}
    }
    Ok(())
  }

  fn row_slot(&self, row: &Row) -> Slot {
    let (parent_id, position) = self.object_slot(row);
    Slot { parent_id, position }
  }

  fn emit_changes(&mut self, moves: &[RowMove]) {
    if moves.is_empty() {
      return;
    }
    let changes = events::coalesce(moves);
    if changes.is_empty() {
      return;
    }
    tracing::debug!(lists = changes.len(), "emitting coalesced list changes");
    if let Some(mut handler) = self.take_items_changed() {
      handler(&changes);
      self.restore_items_changed(Some(handler));
    }
  }

  /// A step that cannot be replayed means the log and the store disagree;
  /// the log is discarded wholesale rather than left half-believable.
  fn corrupt_history(&mut self, err: Error) -> Error {
    tracing::warn!(error = %err, "history replay failed; clearing the log");
    self.clear_history();
    match err {
      Error::Core(CoreError::HistoryCorrupted(_)) => err,
      other => CoreError::HistoryCorrupted(other.to_string()).into(),
    }
  }
}

fn corrupted(message: &str) -> Error {
  CoreError::HistoryCorrupted(message.to_owned()).into()
}

/// Record one row's placement on each side of the step. The first sighting
/// fixes the `old` side; later sightings only advance the `new` side.
fn track(
  moves: &mut BTreeMap<(i64, i64), RowMove>,
  pk: &[Value],
  old: Option<Slot>,
  new: Option<Slot>,
) {
  let (Some(ui_id), Some(object_id)) = (
    pk.first().and_then(Value::as_integer),
    pk.get(1).and_then(Value::as_integer),
  ) else {
    return;
  };
  moves
    .entry((ui_id, object_id))
    .and_modify(|mv| mv.new = new)
    .or_insert(RowMove { ui_id, object_id, old, new });
}
