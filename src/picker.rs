//! Picker item-verification for the Sallaty client core.
//!
//! While an order is in `preparing`, warehouse staff count each physical
//! item and tick it off. The entered counts live in SQLite keyed by
//! `(order_id, item_index)` so a killed or restarted app resumes exactly
//! where the picker left off. An order may only be marked `prepared` when
//! every entered count equals the ordered quantity; `validate` collects
//! every discrepancy so the picker sees the whole list in one pass.

use rusqlite::params;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::db::DbState;
use crate::orders::Order;

/// Per-item checklist state, as persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCheck {
    pub entered_count: u32,
    pub checked: bool,
}

/// One discrepant item. `entered < ordered` reads "needs N more",
/// `entered > ordered` reads "N too many".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub item_index: usize,
    pub name: String,
    pub ordered: u32,
    pub entered: u32,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entered < self.ordered {
            write!(
                f,
                "needs {} more of {}",
                self.ordered - self.entered,
                self.name
            )
        } else {
            write!(
                f,
                "{} too many of {}",
                self.entered - self.ordered,
                self.name
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Reconcile entered counts against the order's quantities.
///
/// Not fail-fast: every discrepant item produces exactly one error, in
/// item order. An item with no checklist row counts as entered 0.
pub fn validate(
    order: &Order,
    checklist: &HashMap<usize, ItemCheck>,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (index, item) in order.items.iter().enumerate() {
        let entered = checklist
            .get(&index)
            .map(|c| c.entered_count)
            .unwrap_or(0);
        if entered != item.quantity {
            errors.push(ValidationError {
                item_index: index,
                name: item.name.clone(),
                ordered: item.quantity,
                entered,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Durable checklist
// ---------------------------------------------------------------------------

/// Record the physically counted quantity for one item.
pub fn set_entered_count(
    db: &DbState,
    order_id: &str,
    item_index: usize,
    count: u32,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO picker_checks (order_id, item_index, entered_count, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(order_id, item_index) DO UPDATE SET
            entered_count = excluded.entered_count,
            updated_at = excluded.updated_at",
        params![order_id, item_index as i64, count],
    )
    .map_err(|e| format!("set_entered_count: {e}"))?;
    Ok(())
}

/// Record the checkbox state for one item.
pub fn set_checked(
    db: &DbState,
    order_id: &str,
    item_index: usize,
    checked: bool,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT INTO picker_checks (order_id, item_index, checked, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(order_id, item_index) DO UPDATE SET
            checked = excluded.checked,
            updated_at = excluded.updated_at",
        params![order_id, item_index as i64, checked],
    )
    .map_err(|e| format!("set_checked: {e}"))?;
    Ok(())
}

/// Read back the whole checklist for an order, keyed by item index.
/// A reopened app calls this to restore the picking screen.
pub fn checklist(db: &DbState, order_id: &str) -> Result<HashMap<usize, ItemCheck>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT item_index, entered_count, checked
             FROM picker_checks
             WHERE order_id = ?1",
        )
        .map_err(|e| format!("checklist prepare: {e}"))?;

    let rows = stmt
        .query_map(params![order_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })
        .map_err(|e| format!("checklist query: {e}"))?;

    let mut out = HashMap::new();
    for row in rows.flatten() {
        let (index, entered, checked) = row;
        out.insert(
            index as usize,
            ItemCheck {
                entered_count: entered.max(0) as u32,
                checked,
            },
        );
    }
    Ok(out)
}

/// Purge all checklist rows for an order. Called once the order leaves
/// the preparing/prepared boundary.
pub fn clear(db: &DbState, order_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let purged = conn
        .execute(
            "DELETE FROM picker_checks WHERE order_id = ?1",
            params![order_id],
        )
        .map_err(|e| format!("clear checklist: {e}"))?;
    if purged > 0 {
        debug!(order_id, purged, "picker checklist purged");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
