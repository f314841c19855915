//! Explicit cleanup procedures run inside message and user deletion.
//!
//! The schema declares foreign keys without `ON DELETE` actions, because the
//! relations need different treatment: a deleted message takes its replies,
//! history and notifications with it, while a deleted user only loses the
//! authorship stamps it left on messages that survive.  These functions never
//! commit; the caller's transaction does, and the deferred foreign keys turn
//! any orphan left behind into a commit failure.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::decode_uuid;
use crate::error::Result;

/// What a cleanup removed or rewrote.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub messages_deleted: usize,
    pub history_deleted: usize,
    pub notifications_deleted: usize,
    /// History rows kept but with `edited_by` cleared.
    pub history_authorship_cleared: usize,
    /// Surviving messages whose `edited_by` was cleared.
    pub edit_authorship_cleared: usize,
}

impl CleanupReport {
    fn absorb(&mut self, other: CleanupReport) {
        self.messages_deleted += other.messages_deleted;
        self.history_deleted += other.history_deleted;
        self.notifications_deleted += other.notifications_deleted;
        self.history_authorship_cleared += other.history_authorship_cleared;
        self.edit_authorship_cleared += other.edit_authorship_cleared;
    }
}

/// Delete `roots` and every transitive reply, together with their history
/// rows and notifications.
pub(crate) fn purge_messages(conn: &Connection, roots: &[Uuid]) -> Result<CleanupReport> {
    let doomed = with_descendants(conn, roots)?;
    let mut report = CleanupReport::default();

    // Leaves first, so no statement ever points at an already-deleted row.
    for id in doomed.iter().rev() {
        let id = id.to_string();
        report.notifications_deleted += conn.execute(
            "DELETE FROM notifications WHERE message_id = ?1",
            params![id],
        )?;
        report.history_deleted += conn.execute(
            "DELETE FROM message_history WHERE message_id = ?1",
            params![id],
        )?;
        report.messages_deleted +=
            conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    }

    Ok(report)
}

/// Remove everything that depends on `user_id`, leaving only the user row
/// for the caller to delete.
pub(crate) fn purge_user(conn: &Connection, user_id: Uuid) -> Result<CleanupReport> {
    let uid = user_id.to_string();

    let owned = {
        let mut stmt =
            conn.prepare("SELECT id FROM messages WHERE sender_id = ?1 OR receiver_id = ?1")?;
        let rows = stmt.query_map(params![uid], |row| {
            let id_str: String = row.get(0)?;
            decode_uuid(0, &id_str)
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut report = purge_messages(conn, &owned)?;

    let mut cleared = CleanupReport {
        history_authorship_cleared: conn.execute(
            "UPDATE message_history SET edited_by = NULL WHERE edited_by = ?1",
            params![uid],
        )?,
        edit_authorship_cleared: conn.execute(
            "UPDATE messages SET edited_by = NULL WHERE edited_by = ?1",
            params![uid],
        )?,
        ..CleanupReport::default()
    };
    cleared.notifications_deleted =
        conn.execute("DELETE FROM notifications WHERE user_id = ?1", params![uid])?;
    report.absorb(cleared);

    Ok(report)
}

/// `roots` plus all transitive replies in breadth-first order.  Parents come
/// before their replies; a message reached twice is kept once.
fn with_descendants(conn: &Connection, roots: &[Uuid]) -> Result<Vec<Uuid>> {
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut order = Vec::new();
    let mut queue: VecDeque<Uuid> = VecDeque::new();

    for root in roots {
        if seen.insert(*root) {
            order.push(*root);
            queue.push_back(*root);
        }
    }

    let mut stmt = conn.prepare("SELECT id FROM messages WHERE parent_message_id = ?1")?;
    while let Some(parent) = queue.pop_front() {
        let rows = stmt.query_map(params![parent.to_string()], |row| {
            let id_str: String = row.get(0)?;
            decode_uuid(0, &id_str)
        })?;
        for row in rows {
            let child = row?;
            if seen.insert(child) {
                order.push(child);
                queue.push_back(child);
            }
        }
    }

    Ok(order)
}
