//! SQL schema for the Croquis document store.
//!
//! Five tracked tables form the document model: `ui` (a document), `object`
//! (the hierarchical, sibling-ordered widget tree), and the three leaf tables
//! hanging off `object`. Foreign keys deliberately omit `ON DELETE CASCADE` —
//! cascading runs through the store's delete primitive so the change
//! interceptor records every removed row.

use croquis_core::{schema::TableSchema, Result};
use rusqlite::Connection;

/// Full DDL, executed once at open. Idempotent via `IF NOT EXISTS`.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ui (
    ui_id       INTEGER PRIMARY KEY,
    template_id INTEGER,
    name        TEXT,
    filename    TEXT,
    description TEXT,
    copyright   TEXT,
    authors     TEXT,
    comment     TEXT
);

-- The widget tree. Siblings carry a dense 0-based position within
-- (ui_id, parent_id); parent_id NULL is the document's toplevel list.
CREATE TABLE IF NOT EXISTS object (
    ui_id     INTEGER NOT NULL REFERENCES ui(ui_id),
    object_id INTEGER NOT NULL,
    type_id   TEXT NOT NULL,
    name      TEXT,
    parent_id INTEGER,
    position  INTEGER NOT NULL DEFAULT 0,
    comment   TEXT,
    PRIMARY KEY (ui_id, object_id),
    FOREIGN KEY (ui_id, parent_id) REFERENCES object(ui_id, object_id)
);
CREATE INDEX IF NOT EXISTS object_parent_idx ON object(ui_id, parent_id);

CREATE TABLE IF NOT EXISTS object_property (
    ui_id        INTEGER NOT NULL,
    object_id    INTEGER NOT NULL,
    owner_id     TEXT NOT NULL,
    property_id  TEXT NOT NULL,
    value        TEXT,
    translatable INTEGER NOT NULL DEFAULT 0,
    comment      TEXT,
    PRIMARY KEY (ui_id, object_id, owner_id, property_id),
    FOREIGN KEY (ui_id, object_id) REFERENCES object(ui_id, object_id)
);

CREATE TABLE IF NOT EXISTS object_signal (
    ui_id     INTEGER NOT NULL,
    object_id INTEGER NOT NULL,
    signal_id TEXT NOT NULL,
    handler   TEXT NOT NULL,
    detail    TEXT,
    user_data TEXT,
    swap      INTEGER NOT NULL DEFAULT 0,
    after     INTEGER NOT NULL DEFAULT 0,
    comment   TEXT,
    PRIMARY KEY (ui_id, object_id, signal_id, handler),
    FOREIGN KEY (ui_id, object_id) REFERENCES object(ui_id, object_id)
);

-- Auxiliary nested data attached to an object (accessibility info, custom
-- tags, etc.); `parent_id` nests data rows under other data rows.
CREATE TABLE IF NOT EXISTS object_data (
    ui_id     INTEGER NOT NULL,
    object_id INTEGER NOT NULL,
    owner_id  TEXT NOT NULL,
    data_id   INTEGER NOT NULL,
    id        INTEGER NOT NULL,
    value     TEXT,
    parent_id INTEGER,
    comment   TEXT,
    PRIMARY KEY (ui_id, object_id, owner_id, data_id, id),
    FOREIGN KEY (ui_id, object_id) REFERENCES object(ui_id, object_id)
);
";

/// Tracked tables in dependency order — parents before children, so cascades
/// and snapshots can walk the list in either direction.
pub const TRACKED_TABLES: &[&str] =
  &["ui", "object", "object_property", "object_signal", "object_data"];

/// Non-PK unique-constraint groups, declared statically rather than as SQL
/// UNIQUE indexes: replay must be able to suspend these checks, and SQLite
/// cannot disable a UNIQUE index. Groups may include primary-key columns for
/// scoping.
fn unique_groups(table: &str) -> &'static [&'static [&'static str]] {
  match table {
    // One child per slot: sibling positions are unique within a parent.
    "object" => &[&["ui_id", "parent_id", "position"]],
    _ => &[],
  }
}

/// Introspect the live table definitions into [`TableSchema`]s, in
/// [`TRACKED_TABLES`] order. Fails if a tracked table has no primary key.
pub fn introspect(conn: &Connection) -> Result<Vec<TableSchema>, crate::Error> {
  TRACKED_TABLES
    .iter()
    .map(|table| table_schema(conn, table))
    .collect()
}

fn table_schema(
  conn: &Connection,
  table: &str,
) -> Result<TableSchema, crate::Error> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  // (column name, 1-based position within the primary key or 0)
  let info = stmt
    .query_map([], |row| {
      Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?))
    })?
    .collect::<Result<Vec<_>, rusqlite::Error>>()?;

  let columns: Vec<String> =
    info.iter().map(|(name, _)| name.clone()).collect();

  let mut pk: Vec<(i64, String)> = info
    .iter()
    .filter(|(_, pk_pos)| *pk_pos > 0)
    .map(|(name, pk_pos)| (*pk_pos, name.clone()))
    .collect();
  pk.sort_unstable_by_key(|(pos, _)| *pos);
  let pk_columns: Vec<String> = pk.into_iter().map(|(_, name)| name).collect();

  let groups: Vec<Vec<String>> = unique_groups(table)
    .iter()
    .map(|group| group.iter().map(|c| (*c).to_owned()).collect())
    .collect();

  Ok(TableSchema::new(table, columns, &pk_columns, &groups)?)
}
