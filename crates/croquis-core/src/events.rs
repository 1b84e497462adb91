//! Batched structural-change events for sibling-ordered list views.
//!
//! The undo/redo engine replays raw history entries one row at a time. A list
//! view notified per entry would render states that never logically existed —
//! during a reparent-with-reorder an item appears to vanish and come back in
//! the wrong slot. Instead the engine collects every hierarchical row it
//! touched and emits one coalesced event per affected sibling list per
//! logical step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity of one sibling list: a parent slot inside a document.
/// `parent_id` of `None` is the document's toplevel list.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
  Deserialize,
)]
pub struct ParentKey {
  pub ui_id:     i64,
  pub parent_id: Option<i64>,
}

/// One observer notification, in the shape list views consume: at `position`,
/// `removed` old items were replaced by `added` new items.
///
/// The spans are conservative — they may cover untouched rows sitting between
/// touched ones — but the before/after item counts are always consistent with
/// the store state on each side of the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChange {
  pub parent:   ParentKey,
  pub position: usize,
  pub removed:  usize,
  pub added:    usize,
}

/// Where a hierarchical row sits within its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
  pub parent_id: Option<i64>,
  pub position:  i64,
}

/// One row's placement before and after a logical step. `None` on a side
/// means the row did not exist on that side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMove {
  pub ui_id:     i64,
  pub object_id: i64,
  pub old:       Option<Slot>,
  pub new:       Option<Slot>,
}

/// Collapse per-row moves into one event per affected sibling list, ordered
/// by parent for determinism.
pub fn coalesce(moves: &[RowMove]) -> Vec<ListChange> {
  // Per parent: positions leaving the list (old side) and arriving (new
  // side). A row moving within one parent contributes to both sides.
  let mut old_side: BTreeMap<ParentKey, Vec<i64>> = BTreeMap::new();
  let mut new_side: BTreeMap<ParentKey, Vec<i64>> = BTreeMap::new();

  for mv in moves {
    if mv.old == mv.new {
      continue;
    }
    if let Some(old) = mv.old {
      let key = ParentKey { ui_id: mv.ui_id, parent_id: old.parent_id };
      old_side.entry(key).or_default().push(old.position);
    }
    if let Some(new) = mv.new {
      let key = ParentKey { ui_id: mv.ui_id, parent_id: new.parent_id };
      new_side.entry(key).or_default().push(new.position);
    }
  }

  let mut parents: Vec<ParentKey> = old_side.keys().copied().collect();
  parents.extend(new_side.keys().copied());
  parents.sort_unstable();
  parents.dedup();

  parents
    .into_iter()
    .filter_map(|parent| {
      let old = old_side.get(&parent);
      let new = new_side.get(&parent);

      let min = old
        .into_iter()
        .chain(new)
        .flatten()
        .copied()
        .min()?
        .max(0) as usize;

      let span = |positions: Option<&Vec<i64>>| {
        positions
          .and_then(|p| p.iter().copied().max())
          .map_or(0, |max| (max.max(0) as usize).saturating_sub(min) + 1)
      };

      Some(ListChange {
        parent,
        position: min,
        removed: span(old),
        added: span(new),
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slot(parent_id: Option<i64>, position: i64) -> Option<Slot> {
    Some(Slot { parent_id, position })
  }

  #[test]
  fn pure_insertions_produce_added_span() {
    let moves = [
      RowMove { ui_id: 1, object_id: 2, old: None, new: slot(None, 0) },
      RowMove { ui_id: 1, object_id: 3, old: None, new: slot(None, 1) },
    ];
    assert_eq!(coalesce(&moves), vec![ListChange {
      parent:   ParentKey { ui_id: 1, parent_id: None },
      position: 0,
      removed:  0,
      added:    2,
    }]);
  }

  #[test]
  fn removal_with_renumber_is_one_event() {
    // Object at position 1 removed; the old position-2 sibling slid to 1.
    let moves = [
      RowMove { ui_id: 1, object_id: 5, old: slot(None, 1), new: None },
      RowMove {
        ui_id:     1,
        object_id: 6,
        old:       slot(None, 2),
        new:       slot(None, 1),
      },
    ];
    assert_eq!(coalesce(&moves), vec![ListChange {
      parent:   ParentKey { ui_id: 1, parent_id: None },
      position: 1,
      removed:  2,
      added:    1,
    }]);
  }

  #[test]
  fn reparent_touches_both_lists_once() {
    let moves = [RowMove {
      ui_id:     1,
      object_id: 7,
      old:       slot(Some(2), 0),
      new:       slot(Some(3), 1),
    }];
    let changes = coalesce(&moves);
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0], ListChange {
      parent:   ParentKey { ui_id: 1, parent_id: Some(2) },
      position: 0,
      removed:  1,
      added:    0,
    });
    assert_eq!(changes[1], ListChange {
      parent:   ParentKey { ui_id: 1, parent_id: Some(3) },
      position: 1,
      removed:  0,
      added:    1,
    });
  }

  #[test]
  fn unmoved_rows_emit_nothing() {
    let moves = [RowMove {
      ui_id:     1,
      object_id: 4,
      old:       slot(None, 0),
      new:       slot(None, 0),
    }];
    assert!(coalesce(&moves).is_empty());
  }
}
