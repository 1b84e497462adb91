//! [`SqliteStore`] — the SQLite implementation of [`DocumentStore`].

use std::collections::BTreeMap;

use croquis_core::{
  error::Error as CoreError,
  events::ListChange,
  history::{HistoryEntry, HistoryLog, HistoryOp},
  schema::TableSchema,
  store::DocumentStore,
  value::{Row, Value},
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::{encode, schema, Error, Result};

// ─── Per-table SQL ───────────────────────────────────────────────────────────

/// Statements precomputed from the introspected schema at open time, the
/// same way for every tracked table.
#[derive(Debug)]
struct TableSql {
  insert:   String,
  select:   String,
  delete:   String,
  where_pk: String,
}

impl TableSql {
  fn new(schema: &TableSchema) -> Self {
    let table = schema.name();
    let columns = schema.columns().join(", ");
    let placeholders =
      vec!["?"; schema.columns().len()].join(", ");
    let where_pk = schema
      .pk_columns()
      .iter()
      .map(|c| format!("{c} = ?"))
      .collect::<Vec<_>>()
      .join(" AND ");

    Self {
      insert: format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders})"
      ),
      select: format!("SELECT {columns} FROM {table} WHERE {where_pk}"),
      delete: format!("DELETE FROM {table} WHERE {where_pk}"),
      where_pk,
    }
  }
}

#[derive(Debug)]
struct Tracked {
  schema: TableSchema,
  sql:    TableSql,
}

/// Column offsets of the hierarchy columns in the `object` table, cached for
/// the undo engine's structural-change tracking.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectColumns {
  pub parent_id: usize,
  pub position:  usize,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Croquis document store backed by an in-memory SQLite database.
///
/// The store and its history log are created together when a document is
/// opened; import/export layers populate and drain it through the record
/// CRUD surface.
pub struct SqliteStore {
  conn:    Connection,
  tables:  Vec<Tracked>,
  history: HistoryLog,

  history_enabled:     bool,
  constraints_enabled: bool,
  /// Sequence numbers of PUSH entries whose POP has not been recorded yet.
  open_pushes: Vec<i64>,

  pub(crate) object_columns: ObjectColumns,
  items_changed: Option<Box<dyn FnMut(&[ListChange])>>,
}

impl SqliteStore {
  /// Create an empty store and run schema initialisation and introspection.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.execute_batch(schema::SCHEMA)?;

    let tables: Vec<Tracked> = schema::introspect(&conn)?
      .into_iter()
      .map(|schema| {
        let sql = TableSql::new(&schema);
        Tracked { schema, sql }
      })
      .collect();

    let object = tables
      .iter()
      .find(|t| t.schema.name() == "object")
      .ok_or_else(|| CoreError::UnknownTable("object".into()))?;
    let object_columns = ObjectColumns {
      parent_id: object.schema.column_index("parent_id")?,
      position:  object.schema.column_index("position")?,
    };

    Ok(Self {
      conn,
      tables,
      history: HistoryLog::new(),
      history_enabled: true,
      constraints_enabled: true,
      open_pushes: Vec::new(),
      object_columns,
      items_changed: None,
    })
  }

  /// The history log, for inspection and diagnostics.
  pub fn history(&self) -> &HistoryLog { &self.history }

  /// Register the observer for batched structural-change events emitted by
  /// undo/redo.
  pub fn on_items_changed(
    &mut self,
    handler: impl FnMut(&[ListChange]) + 'static,
  ) {
    self.items_changed = Some(Box::new(handler));
  }

  // ── Record CRUD ───────────────────────────────────────────────────────

  pub fn insert(&mut self, table: &str, row: Row) -> Result<()> {
    let t = self.tracked(table)?;
    t.schema.check_arity(&row)?;
    if self.constraints_enabled {
      check_unique(&self.conn, &t.schema, &row, None)?;
    }

    self
      .conn
      .execute(&t.sql.insert, params_from_iter(row.iter().map(encode::to_sql)))
      .map_err(|err| map_constraint(err, &t.schema))?;

    let table = t.schema.name().to_owned();
    let pk = t.schema.pk_of(&row);
    self.record(HistoryOp::Insert { table, pk, new: row });
    Ok(())
  }

  pub fn delete(&mut self, table: &str, pk: &[Value]) -> Result<()> {
    let t = self.tracked(table)?;
    let old = select_row(&self.conn, t, pk)?.ok_or_else(|| {
      CoreError::RowNotFound { table: t.schema.name().to_owned() }
    })?;

    self
      .conn
      .execute(&t.sql.delete, params_from_iter(pk.iter().map(encode::to_sql)))
      .map_err(|err| map_constraint(err, &t.schema))?;

    let table = t.schema.name().to_owned();
    self.record(HistoryOp::Delete { table, pk: pk.to_vec(), old });
    Ok(())
  }

  pub fn update(
    &mut self,
    table: &str,
    pk: &[Value],
    changes: &[(&str, Value)],
  ) -> Result<()> {
    let t = self.tracked(table)?;
    let old = select_row(&self.conn, t, pk)?.ok_or_else(|| {
      CoreError::RowNotFound { table: t.schema.name().to_owned() }
    })?;

    let mut new = old.clone();
    for (column, value) in changes {
      let idx = t.schema.column_index(column)?;
      if t.schema.is_pk_column(idx) {
        return Err(
          CoreError::PrimaryKeyColumn {
            table:  t.schema.name().to_owned(),
            column: (*column).to_owned(),
          }
          .into(),
        );
      }
      new[idx] = value.clone();
    }

    let changed: Vec<usize> =
      (0..new.len()).filter(|&i| new[i] != old[i]).collect();
    if changed.is_empty() {
      // No-op updates produce no history.
      return Ok(());
    }

    if self.constraints_enabled {
      check_unique(&self.conn, &t.schema, &new, Some(pk))?;
      if t.schema.name() == "object"
        && new[self.object_columns.parent_id]
          != old[self.object_columns.parent_id]
      {
        if let (Some(ui_id), Some(object_id)) = (
          pk.first().and_then(Value::as_integer),
          pk.get(1).and_then(Value::as_integer),
        ) {
          self.check_no_cycle(
            ui_id,
            object_id,
            new[self.object_columns.parent_id].as_integer(),
          )?;
        }
      }
    }

    let sets = changed
      .iter()
      .map(|&i| format!("{} = ?", t.schema.column_name(i)))
      .collect::<Vec<_>>()
      .join(", ");
    let sql = format!(
      "UPDATE {} SET {sets} WHERE {}",
      t.schema.name(),
      t.sql.where_pk
    );
    self
      .conn
      .execute(
        &sql,
        params_from_iter(
          changed
            .iter()
            .map(|&i| encode::to_sql(&new[i]))
            .chain(pk.iter().map(encode::to_sql)),
        ),
      )
      .map_err(|err| map_constraint(err, &t.schema))?;

    // Split the changed columns into atomic unique-group units plus one unit
    // per remaining column; each unit becomes its own history entry.
    let mut units: Vec<Vec<usize>> = Vec::new();
    let mut leftover = changed.clone();
    for &idx in &changed {
      if !leftover.contains(&idx) {
        continue;
      }
      if let Some(group) = t.schema.atomic_group_containing(idx) {
        let members: Vec<usize> = group
          .iter()
          .copied()
          .filter(|&i| !t.schema.is_pk_column(i))
          .collect();
        leftover.retain(|i| !members.contains(i));
        units.push(members);
      }
    }
    for idx in leftover {
      units.push(vec![idx]);
    }

    let table = t.schema.name().to_owned();
    let unit_columns: Vec<Vec<String>> = units
      .iter()
      .map(|unit| {
        unit.iter().map(|&i| t.schema.column_name(i).to_owned()).collect()
      })
      .collect();

    for columns in unit_columns {
      self.record_update(
        table.clone(),
        pk.to_vec(),
        columns,
        old.clone(),
        new.clone(),
      );
    }
    Ok(())
  }

  pub fn get(&self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
    let t = self.tracked(table)?;
    select_row(&self.conn, t, pk)
  }

  // ── Transaction grouping ──────────────────────────────────────────────

  pub fn push(&mut self, message: &str) -> Result<()> {
    if !self.history_enabled {
      return Ok(());
    }
    let seq = self.record_returning_seq(HistoryOp::Push {
      message: message.to_owned(),
      pop_seq: None,
    });
    self.open_pushes.push(seq);
    Ok(())
  }

  pub fn pop(&mut self) -> Result<()> {
    if !self.history_enabled {
      return Ok(());
    }
    let Some(push_seq) = self.open_pushes.pop() else {
      return Err(
        CoreError::HistoryCorrupted("pop without a matching push".into())
          .into(),
      );
    };
    let pop_seq = self.record_returning_seq(HistoryOp::Pop);
    if let Some(entry) = self.history.entry_mut(push_seq) {
      if let HistoryOp::Push { pop_seq: slot, .. } = &mut entry.op {
        *slot = Some(pop_seq);
      }
    }
    Ok(())
  }

  // ── History control ───────────────────────────────────────────────────

  pub fn history_enabled(&self) -> bool { self.history_enabled }

  /// Global suspend switch, used during document load and history-format
  /// migration. While disabled, mutations record nothing and push/pop are
  /// no-ops.
  pub fn set_history_enabled(&mut self, enabled: bool) {
    self.history_enabled = enabled;
  }

  pub fn current_index(&self) -> i64 { self.history.current_index() }

  pub fn max_index(&self) -> i64 { self.history.max_index() }

  pub fn clear_history(&mut self) {
    self.history.clear();
    self.open_pushes.clear();
  }

  // ── Document helpers ──────────────────────────────────────────────────

  /// Create a document, allocating the next `ui_id`.
  pub fn add_ui(
    &mut self,
    name: Option<&str>,
    filename: Option<&str>,
  ) -> Result<i64> {
    let ui_id: i64 = self.conn.query_row(
      "SELECT coalesce(MAX(ui_id), 0) + 1 FROM ui",
      [],
      |r| r.get(0),
    )?;
    self.insert("ui", vec![
      ui_id.into(),
      Value::Null,
      name.into(),
      filename.into(),
      Value::Null,
      Value::Null,
      Value::Null,
      Value::Null,
    ])?;
    Ok(ui_id)
  }

  /// Remove a document and everything in it, as one logical step.
  pub fn remove_ui(&mut self, ui_id: i64) -> Result<()> {
    let row = self
      .get("ui", &[ui_id.into()])?
      .ok_or(CoreError::RowNotFound { table: "ui".into() })?;
    let label = row[2].as_text().unwrap_or("document").to_owned();

    self.atomic(|s| {
      s.push(&format!("Remove {label}"))?;
      for toplevel in s.object_children(ui_id, None)? {
        s.cascade_delete_object(ui_id, toplevel)?;
      }
      s.delete("ui", &[ui_id.into()])?;
      s.pop()
    })
  }

  /// Create an object, allocating the next `object_id` within the document.
  ///
  /// `position` of `None` (or out of range) appends at the end of the
  /// sibling list; otherwise trailing siblings are shifted to keep positions
  /// dense.
  pub fn add_object(
    &mut self,
    ui_id: i64,
    type_id: &str,
    name: Option<&str>,
    parent_id: Option<i64>,
    position: Option<i64>,
  ) -> Result<i64> {
    let object_id: i64 = self.conn.query_row(
      "SELECT coalesce(MAX(object_id), 0) + 1 FROM object WHERE ui_id = ?",
      [ui_id],
      |r| r.get(0),
    )?;
    let count = self.sibling_count(ui_id, parent_id)?;
    let position = match position {
      Some(p) if (0..count).contains(&p) => p,
      _ => count,
    };

    self.atomic(|s| {
      s.push(&format!("Add {}", name.unwrap_or(type_id)))?;
      if position < count {
        // Highest first, so no two siblings ever share a slot.
        for (sibling, pos) in
          s.children_with_positions(ui_id, parent_id)?.into_iter().rev()
        {
          if pos >= position {
            s.update("object", &[ui_id.into(), sibling.into()], &[(
              "position",
              (pos + 1).into(),
            )])?;
          }
        }
      }
      s.insert("object", vec![
        ui_id.into(),
        object_id.into(),
        type_id.into(),
        name.into(),
        parent_id.into(),
        position.into(),
        Value::Null,
      ])?;
      s.pop()
    })?;
    Ok(object_id)
  }

  /// Remove an object and its whole subtree, then close the gap in the old
  /// sibling list. One logical step.
  pub fn remove_object(&mut self, ui_id: i64, object_id: i64) -> Result<()> {
    let row = self
      .get("object", &[ui_id.into(), object_id.into()])?
      .ok_or(CoreError::RowNotFound { table: "object".into() })?;
    let (parent_id, position) = self.object_slot(&row);
    let label = object_label(&row);

    self.atomic(|s| {
      s.push(&format!("Remove {label}"))?;
      s.cascade_delete_object(ui_id, object_id)?;
      // Ascending, so closing the gap never collides.
      for (sibling, pos) in s.children_with_positions(ui_id, parent_id)? {
        if pos > position {
          s.update("object", &[ui_id.into(), sibling.into()], &[(
            "position",
            (pos - 1).into(),
          )])?;
        }
      }
      s.pop()
    })
  }

  /// Move an object within its sibling list.
  pub fn reorder_object(
    &mut self,
    ui_id: i64,
    object_id: i64,
    new_position: i64,
  ) -> Result<()> {
    let row = self
      .get("object", &[ui_id.into(), object_id.into()])?
      .ok_or(CoreError::RowNotFound { table: "object".into() })?;
    let (parent_id, old_position) = self.object_slot(&row);
    let count = self.sibling_count(ui_id, parent_id)?;
    let new_position = new_position.clamp(0, count - 1);
    if new_position == old_position {
      return Ok(());
    }
    let label = object_label(&row);

    self.atomic(|s| {
      s.push(&format!("Reorder {label}"))?;
      let result = s.with_constraints_disabled(|s| {
        let mut order: Vec<i64> = s
          .children_with_positions(ui_id, parent_id)?
          .into_iter()
          .map(|(id, _)| id)
          .filter(|&id| id != object_id)
          .collect();
        order.insert(new_position as usize, object_id);
        for (pos, id) in order.into_iter().enumerate() {
          s.update("object", &[ui_id.into(), id.into()], &[(
            "position",
            (pos as i64).into(),
          )])?;
        }
        Ok(())
      });
      s.pop()?;
      result
    })
  }

  /// Move an object under a new parent (or to the toplevel list), keeping
  /// both sibling lists dense. `new_position` of `None` appends.
  pub fn reparent_object(
    &mut self,
    ui_id: i64,
    object_id: i64,
    new_parent: Option<i64>,
    new_position: Option<i64>,
  ) -> Result<()> {
    let row = self
      .get("object", &[ui_id.into(), object_id.into()])?
      .ok_or(CoreError::RowNotFound { table: "object".into() })?;
    let (old_parent, old_position) = self.object_slot(&row);
    if new_parent == old_parent {
      let count = self.sibling_count(ui_id, old_parent)?;
      return self.reorder_object(
        ui_id,
        object_id,
        new_position.unwrap_or(count - 1),
      );
    }

    if let Some(parent) = new_parent {
      self
        .get("object", &[ui_id.into(), parent.into()])?
        .ok_or(CoreError::RowNotFound { table: "object".into() })?;
    }
    self.check_no_cycle(ui_id, object_id, new_parent)?;

    let dest_count = self.sibling_count(ui_id, new_parent)?;
    let target = match new_position {
      Some(p) if (0..=dest_count).contains(&p) => p,
      _ => dest_count,
    };
    let label = object_label(&row);

    self.atomic(|s| {
      s.push(&format!("Move {label}"))?;
      let result = s.with_constraints_disabled(|s| {
        // parent_id and position form a unique group, so this lands in the
        // log as one atomic entry.
        s.update("object", &[ui_id.into(), object_id.into()], &[
          ("parent_id", new_parent.into()),
          ("position", target.into()),
        ])?;
        for (sibling, pos) in s.children_with_positions(ui_id, old_parent)? {
          if pos > old_position {
            s.update("object", &[ui_id.into(), sibling.into()], &[(
              "position",
              (pos - 1).into(),
            )])?;
          }
        }
        for (sibling, pos) in
          s.children_with_positions(ui_id, new_parent)?.into_iter().rev()
        {
          if sibling != object_id && pos >= target {
            s.update("object", &[ui_id.into(), sibling.into()], &[(
              "position",
              (pos + 1).into(),
            )])?;
          }
        }
        Ok(())
      });
      s.pop()?;
      result
    })
  }

  /// Child object ids under `parent_id` (or the toplevel list), in position
  /// order.
  pub fn object_children(
    &self,
    ui_id: i64,
    parent_id: Option<i64>,
  ) -> Result<Vec<i64>> {
    Ok(
      self
        .children_with_positions(ui_id, parent_id)?
        .into_iter()
        .map(|(id, _)| id)
        .collect(),
    )
  }

  /// Canonical JSON dump of every tracked table, in schema order with rows
  /// sorted by primary key. Two stores hold identical relational state iff
  /// their snapshots are byte-identical.
  pub fn snapshot(&self) -> Result<String> {
    let mut doc = serde_json::Map::new();
    for t in &self.tables {
      let order_by = t.schema.pk_columns().join(", ");
      let sql = format!(
        "SELECT {} FROM {} ORDER BY {order_by}",
        t.schema.columns().join(", "),
        t.schema.name()
      );
      let mut stmt = self.conn.prepare(&sql)?;
      let rows = stmt
        .query_map([], |row| {
          encode::row_values(row, t.schema.columns().len())
        })?
        .collect::<Result<Vec<Row>, rusqlite::Error>>()?;
      doc.insert(t.schema.name().to_owned(), serde_json::to_value(rows)?);
    }
    Ok(serde_json::Value::Object(doc).to_string())
  }

  // ── Constraint control ────────────────────────────────────────────────

  /// Run one logical multi-step edit with constraint checking suspended.
  ///
  /// Structural edits such as reparenting transiently violate the
  /// sibling-uniqueness invariant mid-flight; this suspends validation for
  /// the duration of `f`, re-enables it, and verifies the full store before
  /// returning. The suspension itself leaves no trace in history.
  pub fn with_constraints_disabled<T>(
    &mut self,
    f: impl FnOnce(&mut Self) -> Result<T>,
  ) -> Result<T> {
    if !self.constraints_enabled {
      return f(self);
    }
    self.set_constraints(false)?;
    let result = f(self);
    self.set_constraints(true)?;
    let value = result?;
    self.verify_constraints()?;
    Ok(value)
  }

  pub(crate) fn set_constraints(&mut self, enabled: bool) -> Result<()> {
    // The pragma only takes effect outside a transaction; inside one, SQLite
    // keeps enforcing foreign keys, which compound edits tolerate because
    // they keep references valid statement by statement. The undo engine
    // flips it before opening its savepoint, where it does take effect.
    self.conn.pragma_update(None, "foreign_keys", enabled)?;
    self.constraints_enabled = enabled;
    Ok(())
  }

  /// Validate the whole store: foreign keys plus every declared unique
  /// group. NULLs compare equal here — toplevel objects share one sibling
  /// list.
  pub(crate) fn verify_constraints(&self) -> Result<()> {
    let mut stmt = self.conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    if let Some(row) = rows.next()? {
      let table: String = row.get(0)?;
      return Err(CoreError::ForeignKeyViolation { table }.into());
    }

    for t in &self.tables {
      for group in t.schema.unique_groups() {
        let columns: Vec<&str> =
          group.iter().map(|&i| t.schema.column_name(i)).collect();
        let list = columns.join(", ");
        let sql = format!(
          "SELECT COUNT(*) FROM (SELECT 1 FROM {} GROUP BY {list} \
           HAVING COUNT(*) > 1)",
          t.schema.name()
        );
        let duplicates: i64 =
          self.conn.query_row(&sql, [], |r| r.get(0))?;
        if duplicates > 0 {
          return Err(
            CoreError::UniqueViolation {
              table:   t.schema.name().to_owned(),
              columns: list,
            }
            .into(),
          );
        }
      }
    }

    // Hierarchy acyclicity: no object may be reachable from itself.
    let mut stmt = self
      .conn
      .prepare("SELECT ui_id, object_id, parent_id FROM object")?;
    let parents = stmt
      .query_map([], |row| {
        Ok((
          (row.get::<_, i64>(0)?, row.get::<_, i64>(1)?),
          row.get::<_, Option<i64>>(2)?,
        ))
      })?
      .collect::<Result<BTreeMap<(i64, i64), Option<i64>>, rusqlite::Error>>(
      )?;
    for (&(ui_id, object_id), &parent) in &parents {
      let mut steps = parents.len();
      let mut cursor = parent;
      while let Some(p) = cursor {
        if p == object_id || steps == 0 {
          return Err(CoreError::Cycle { table: "object".into() }.into());
        }
        steps -= 1;
        cursor = parents.get(&(ui_id, p)).copied().flatten();
      }
    }
    Ok(())
  }

  /// Walk the would-be ancestor chain of `object_id` starting from `parent`.
  /// A record reachable from itself would make the sibling walks and the
  /// cascade recursion diverge, so it is rejected like any other constraint.
  /// The walk is bounded by the document's object count in case the stored
  /// chain is already cyclic; a missing parent row ends the walk and is left
  /// to foreign-key enforcement.
  fn check_no_cycle(
    &self,
    ui_id: i64,
    object_id: i64,
    parent: Option<i64>,
  ) -> Result<()> {
    let mut remaining: i64 = self.conn.query_row(
      "SELECT COUNT(*) FROM object WHERE ui_id = ?",
      [ui_id],
      |r| r.get(0),
    )?;
    let mut cursor = parent;
    while let Some(p) = cursor {
      if p == object_id || remaining <= 0 {
        return Err(CoreError::Cycle { table: "object".into() }.into());
      }
      remaining -= 1;
      cursor = self
        .conn
        .query_row(
          "SELECT parent_id FROM object WHERE ui_id = ? AND object_id = ?",
          params![ui_id, p],
          |r| r.get(0),
        )
        .optional()?
        .flatten();
    }
    Ok(())
  }

  // ── Internals ─────────────────────────────────────────────────────────

  fn tracked(&self, table: &str) -> Result<&Tracked> {
    self
      .tables
      .iter()
      .find(|t| t.schema.name() == table)
      .ok_or_else(|| CoreError::UnknownTable(table.to_owned()).into())
  }

  fn record(&mut self, op: HistoryOp) {
    if self.history_enabled {
      self.record_returning_seq(op);
    }
  }

  fn record_returning_seq(&mut self, op: HistoryOp) -> i64 {
    if !self.history.at_end() {
      tracing::debug!(
        dropped = self.history.max_index() - self.history.current_index(),
        "new edit after undo; discarding redo tail"
      );
    }
    self.history.append(op)
  }

  /// Append an UPDATE entry, or compress it into the immediately preceding
  /// entry when that entry is an UPDATE of the same row and column set, or
  /// the row's own INSERT. Compression never applies while redo is pending
  /// and never crosses a PUSH/POP marker (markers simply never match).
  fn record_update(
    &mut self,
    table: String,
    pk: Row,
    columns: Vec<String>,
    old: Row,
    new: Row,
  ) {
    if !self.history_enabled {
      return;
    }
    if self.history.at_end() {
      if let Some(last) = self.history.last_mut() {
        match &mut last.op {
          HistoryOp::Update {
            table: last_table,
            pk: last_pk,
            columns: last_columns,
            new: last_new,
            ..
          } if *last_table == table
            && *last_pk == pk
            && *last_columns == columns =>
          {
            *last_new = new;
            tracing::trace!(table = %table, seq = last.seq, "compressed update");
            return;
          }
          HistoryOp::Insert { table: last_table, pk: last_pk, new: last_new }
            if *last_table == table && *last_pk == pk =>
          {
            *last_new = new;
            tracing::trace!(table = %table, seq = last.seq, "folded update into insert");
            return;
          }
          _ => {}
        }
      }
    }
    self
      .history
      .append(HistoryOp::Update { table, pk, columns, old, new });
  }

  /// Run `f` all-or-nothing: on error, roll the database back and drop any
  /// history entries the failed operation recorded.
  fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
    let start_cursor = self.history.current_index();
    self.conn.execute_batch("SAVEPOINT croquis_op")?;
    match f(self) {
      Ok(value) => {
        self.conn.execute_batch("RELEASE croquis_op")?;
        Ok(value)
      }
      Err(err) => {
        let _ = self
          .conn
          .execute_batch("ROLLBACK TO croquis_op; RELEASE croquis_op;");
        if self.history.max_index() > start_cursor
          || self.history.current_index() != start_cursor
        {
          self.history.truncate_to(start_cursor);
          self.open_pushes.retain(|&seq| seq <= start_cursor);
        }
        Err(err)
      }
    }
  }

  fn cascade_delete_object(&mut self, ui_id: i64, object_id: i64) -> Result<()> {
    for child in self.object_children(ui_id, Some(object_id))? {
      self.cascade_delete_object(ui_id, child)?;
    }
    for table in ["object_property", "object_signal", "object_data"] {
      for pk in self.dependent_pks(table, ui_id, object_id)? {
        self.delete(table, &pk)?;
      }
    }
    self.delete("object", &[ui_id.into(), object_id.into()])
  }

  /// Primary keys of `table` rows hanging off one object.
  fn dependent_pks(
    &self,
    table: &str,
    ui_id: i64,
    object_id: i64,
  ) -> Result<Vec<Row>> {
    let t = self.tracked(table)?;
    let pk_columns = t.schema.pk_columns().join(", ");
    let sql = format!(
      "SELECT {pk_columns} FROM {} WHERE ui_id = ? AND object_id = ? \
       ORDER BY {pk_columns}",
      t.schema.name()
    );
    let count = t.schema.pk_indices().len();
    let mut stmt = self.conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params![ui_id, object_id], |row| {
        encode::row_values(row, count)
      })?
      .collect::<Result<Vec<Row>, rusqlite::Error>>()?;
    Ok(rows)
  }

  fn children_with_positions(
    &self,
    ui_id: i64,
    parent_id: Option<i64>,
  ) -> Result<Vec<(i64, i64)>> {
    let mut stmt = self.conn.prepare(
      "SELECT object_id, position FROM object \
       WHERE ui_id = ? AND parent_id IS ? ORDER BY position",
    )?;
    let rows = stmt
      .query_map(params![ui_id, parent_id], |row| {
        Ok((row.get(0)?, row.get(1)?))
      })?
      .collect::<Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
  }

  fn sibling_count(&self, ui_id: i64, parent_id: Option<i64>) -> Result<i64> {
    Ok(self.conn.query_row(
      "SELECT COUNT(*) FROM object WHERE ui_id = ? AND parent_id IS ?",
      params![ui_id, parent_id],
      |r| r.get(0),
    )?)
  }

  /// Single-entry step label. Object rows are named by their `name` (falling
  /// back to `type_id`); other tables use the generic table-level label.
  pub(crate) fn entry_message(&self, entry: &HistoryEntry) -> String {
    match &entry.op {
      HistoryOp::Insert { table, new, .. } if table == "object" => {
        format!("Add {}", object_label(new))
      }
      HistoryOp::Delete { table, old, .. } if table == "object" => {
        format!("Remove {}", object_label(old))
      }
      HistoryOp::Update { table, columns, new, .. } if table == "object" => {
        format!("Update {} of {}", columns.join(", "), object_label(new))
      }
      _ => entry.label(),
    }
  }

  pub(crate) fn object_slot(&self, row: &Row) -> (Option<i64>, i64) {
    let parent = row[self.object_columns.parent_id].as_integer();
    let position =
      row[self.object_columns.position].as_integer().unwrap_or(0);
    (parent, position)
  }

  pub(crate) fn conn(&self) -> &Connection { &self.conn }

  pub(crate) fn schema_of(&self, table: &str) -> Result<&TableSchema> {
    Ok(&self.tracked(table)?.schema)
  }

  pub(crate) fn history_mut(&mut self) -> &mut HistoryLog { &mut self.history }

  pub(crate) fn take_items_changed(
    &mut self,
  ) -> Option<Box<dyn FnMut(&[ListChange])>> {
    self.items_changed.take()
  }

  pub(crate) fn restore_items_changed(
    &mut self,
    handler: Option<Box<dyn FnMut(&[ListChange])>>,
  ) {
    self.items_changed = handler;
  }

  pub(crate) fn suspend_history(&mut self) -> bool {
    std::mem::replace(&mut self.history_enabled, false)
  }

  pub(crate) fn resume_history(&mut self, enabled: bool) {
    self.history_enabled = enabled;
  }
}

fn object_label(row: &Row) -> String {
  row[3]
    .as_text()
    .or_else(|| row[2].as_text())
    .unwrap_or("object")
    .to_owned()
}

// ─── Free helpers ────────────────────────────────────────────────────────────

fn select_row(
  conn: &Connection,
  t: &Tracked,
  pk: &[Value],
) -> Result<Option<Row>> {
  let mut stmt = conn.prepare(&t.sql.select)?;
  let mut rows = stmt.query(params_from_iter(pk.iter().map(encode::to_sql)))?;
  match rows.next()? {
    Some(row) => Ok(Some(encode::row_values(row, t.schema.columns().len())?)),
    None => Ok(None),
  }
}

/// Reject a row that would collide with an existing one on any declared
/// unique group. `IS` comparison makes NULLs equal, so toplevel objects
/// (NULL parent) share one sibling list.
fn check_unique(
  conn: &Connection,
  schema: &TableSchema,
  row: &Row,
  exclude_pk: Option<&[Value]>,
) -> Result<()> {
  for group in schema.unique_groups() {
    let clauses = group
      .iter()
      .map(|&i| format!("{} IS ?", schema.column_name(i)))
      .collect::<Vec<_>>()
      .join(" AND ");
    let mut sql = format!(
      "SELECT COUNT(*) FROM {} WHERE {clauses}",
      schema.name()
    );
    let mut values: Vec<&Value> = group.iter().map(|&i| &row[i]).collect();
    if let Some(pk) = exclude_pk {
      let self_match = schema
        .pk_columns()
        .iter()
        .map(|c| format!("{c} IS ?"))
        .collect::<Vec<_>>()
        .join(" AND ");
      sql.push_str(&format!(" AND NOT ({self_match})"));
      values.extend(pk.iter());
    }

    let count: i64 = conn.query_row(
      &sql,
      params_from_iter(values.into_iter().map(encode::to_sql)),
      |r| r.get(0),
    )?;
    if count > 0 {
      return Err(
        CoreError::UniqueViolation {
          table:   schema.name().to_owned(),
          columns: group
            .iter()
            .map(|&i| schema.column_name(i))
            .collect::<Vec<_>>()
            .join(", "),
        }
        .into(),
      );
    }
  }
  Ok(())
}

/// Translate SQLite constraint failures into the domain taxonomy.
fn map_constraint(err: rusqlite::Error, schema: &TableSchema) -> Error {
  if let rusqlite::Error::SqliteFailure(code, _) = &err {
    match code.extended_code {
      rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
        return CoreError::ForeignKeyViolation {
          table: schema.name().to_owned(),
        }
        .into();
      }
      rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
      | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
        return CoreError::UniqueViolation {
          table:   schema.name().to_owned(),
          columns: schema.pk_columns().join(", "),
        }
        .into();
      }
      _ => {}
    }
  }
  err.into()
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  fn insert(&mut self, table: &str, row: Row) -> Result<()> {
    SqliteStore::insert(self, table, row)
  }

  fn delete(&mut self, table: &str, pk: &[Value]) -> Result<()> {
    SqliteStore::delete(self, table, pk)
  }

  fn update(
    &mut self,
    table: &str,
    pk: &[Value],
    changes: &[(&str, Value)],
  ) -> Result<()> {
    SqliteStore::update(self, table, pk, changes)
  }

  fn get(&self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
    SqliteStore::get(self, table, pk)
  }

  fn push(&mut self, message: &str) -> Result<()> {
    SqliteStore::push(self, message)
  }

  fn pop(&mut self) -> Result<()> { SqliteStore::pop(self) }

  fn undo(&mut self) -> Result<()> { SqliteStore::undo(self) }

  fn redo(&mut self) -> Result<()> { SqliteStore::redo(self) }

  fn undo_redo_messages(&self) -> (Option<String>, Option<String>) {
    SqliteStore::undo_redo_messages(self)
  }

  fn history_enabled(&self) -> bool { SqliteStore::history_enabled(self) }

  fn set_history_enabled(&mut self, enabled: bool) {
    SqliteStore::set_history_enabled(self, enabled);
  }

  fn current_index(&self) -> i64 { SqliteStore::current_index(self) }

  fn set_current_index(&mut self, index: i64) -> Result<()> {
    SqliteStore::set_current_index(self, index)
  }

  fn max_index(&self) -> i64 { SqliteStore::max_index(self) }

  fn clear_history(&mut self) { SqliteStore::clear_history(self) }
}
