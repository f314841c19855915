//! Offline consistency checks over the whole store.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::{decode_opt_uuid, decode_uuid, Database};
use crate::error::{Result, StoreError};

/// A single broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// `edited`, `edited_at` and the presence of history rows disagree.
    EditStateMismatch {
        message_id: Uuid,
        edited: bool,
        has_edited_at: bool,
        history_rows: u64,
    },
    /// A row references a parent row that no longer exists.
    DanglingReference {
        table: String,
        rowid: Option<i64>,
        parent_table: String,
    },
    /// Following parent links from this message leads back to it.
    ReplyCycle { message_id: Uuid },
}

/// Outcome of [`Database::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub users: u64,
    pub messages: u64,
    pub history_rows: u64,
    pub notifications: u64,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

impl Database {
    /// Scan every table for broken invariants.  Read-only.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let tx = self.begin_read()?;
        let mut report = IntegrityReport {
            users: count_rows(&tx, "users")?,
            messages: count_rows(&tx, "messages")?,
            history_rows: count_rows(&tx, "message_history")?,
            notifications: count_rows(&tx, "notifications")?,
            violations: Vec::new(),
        };

        check_edit_state(&tx, &mut report.violations)?;
        check_foreign_keys(&tx, &mut report.violations)?;
        check_reply_cycles(&tx, &mut report.violations)?;

        if report.is_clean() {
            tracing::debug!(messages = report.messages, "integrity check passed");
        } else {
            tracing::warn!(
                violations = report.violations.len(),
                "integrity check found violations"
            );
        }
        Ok(report)
    }
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn check_edit_state(conn: &Connection, out: &mut Vec<Violation>) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.edited, m.edited_at IS NOT NULL,
                (SELECT COUNT(*) FROM message_history h WHERE h.message_id = m.id)
         FROM messages m",
    )?;
    let rows = stmt.query_map([], |row| {
        let id_str: String = row.get(0)?;
        let history_rows: i64 = row.get(3)?;
        Ok((
            decode_uuid(0, &id_str)?,
            row.get::<_, bool>(1)?,
            row.get::<_, bool>(2)?,
            u64::try_from(history_rows).unwrap_or_default(),
        ))
    })?;

    for row in rows {
        let (message_id, edited, has_edited_at, history_rows) = row?;
        if edited != has_edited_at || edited != (history_rows > 0) {
            out.push(Violation::EditStateMismatch {
                message_id,
                edited,
                has_edited_at,
                history_rows,
            });
        }
    }
    Ok(())
}

fn check_foreign_keys(conn: &Connection, out: &mut Vec<Violation>) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let rows = stmt.query_map([], |row| {
        Ok(Violation::DanglingReference {
            table: row.get(0)?,
            rowid: row.get(1)?,
            parent_table: row.get(2)?,
        })
    })?;
    for row in rows {
        out.push(row?);
    }
    Ok(())
}

fn check_reply_cycles(conn: &Connection, out: &mut Vec<Violation>) -> Result<()> {
    let mut stmt = conn.prepare("SELECT id, parent_message_id FROM messages")?;
    let parents: HashMap<Uuid, Option<Uuid>> = stmt
        .query_map([], |row| {
            let id_str: String = row.get(0)?;
            Ok((decode_uuid(0, &id_str)?, decode_opt_uuid(1, row.get(1)?)?))
        })?
        .collect::<std::result::Result<_, _>>()
        .map_err(StoreError::Sqlite)?;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        OnPath,
        Done,
    }

    let mut marks: HashMap<Uuid, Mark> = HashMap::with_capacity(parents.len());
    for &start in parents.keys() {
        let mut path = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            match marks.get(&id) {
                Some(Mark::Done) => break,
                Some(Mark::OnPath) => {
                    out.push(Violation::ReplyCycle { message_id: id });
                    break;
                }
                None => {
                    marks.insert(id, Mark::OnPath);
                    path.push(id);
                    cursor = parents.get(&id).copied().flatten();
                }
            }
        }
        for id in path {
            marks.insert(id, Mark::Done);
        }
    }
    Ok(())
}
