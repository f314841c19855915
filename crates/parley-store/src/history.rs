//! Edit tracking: snapshots of message content taken before each edit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{decode_opt_uuid, decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::messages::require_message;
use crate::models::{Message, MessageHistory};

/// Apply a content edit to `current` inside an open transaction.
///
/// Returns `None` without writing anything when the content is unchanged.
/// Otherwise writes one history row holding the content being replaced,
/// attributed to whoever wrote that content (the last editor, or the sender
/// if the message was never edited), then stamps the message as edited by
/// `editor_id` and stores the new content.
pub(crate) fn apply_edit(
    conn: &Connection,
    current: &Message,
    new_content: &str,
    editor_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Message>> {
    if current.content == new_content {
        tracing::debug!(message_id = %current.id, "content unchanged, skipping history");
        return Ok(None);
    }

    let snapshot = MessageHistory {
        id: Uuid::new_v4(),
        message_id: current.id,
        content: current.content.clone(),
        edited_at: now,
        edited_by: if current.edited {
            current.edited_by
        } else {
            Some(current.sender_id)
        },
    };

    conn.execute(
        "INSERT INTO message_history (id, message_id, content, edited_at, edited_by)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            snapshot.id.to_string(),
            snapshot.message_id.to_string(),
            snapshot.content,
            encode_ts(&snapshot.edited_at),
            snapshot.edited_by.map(|u| u.to_string()),
        ],
    )?;

    let affected = conn.execute(
        "UPDATE messages
         SET content = ?1, edited = 1, edited_at = ?2, edited_by = ?3
         WHERE id = ?4",
        params![
            new_content,
            encode_ts(&now),
            editor_id.to_string(),
            current.id.to_string(),
        ],
    )?;
    if affected != 1 {
        return Err(StoreError::Integrity(format!(
            "message {} vanished during edit",
            current.id
        )));
    }

    tracing::debug!(
        message_id = %current.id,
        history_id = %snapshot.id,
        editor_id = %editor_id,
        "message edited"
    );

    Ok(Some(Message {
        content: new_content.to_string(),
        edited: true,
        edited_at: Some(now),
        edited_by: Some(editor_id),
        ..current.clone()
    }))
}

impl Database {
    /// All snapshots of a message, newest first.
    pub fn get_message_history(&self, message_id: Uuid) -> Result<Vec<MessageHistory>> {
        let tx = self.begin_read()?;
        require_message(&tx, message_id)?;

        let mut stmt = tx.prepare(
            "SELECT id, message_id, content, edited_at, edited_by
             FROM message_history
             WHERE message_id = ?1
             ORDER BY edited_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![message_id.to_string()], row_to_history)?;

        let mut history = Vec::new();
        for row in rows {
            history.push(row?);
        }
        Ok(history)
    }
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageHistory> {
    let id_str: String = row.get(0)?;
    let message_str: String = row.get(1)?;
    let edited_str: String = row.get(3)?;

    Ok(MessageHistory {
        id: decode_uuid(0, &id_str)?,
        message_id: decode_uuid(1, &message_str)?,
        content: row.get(2)?,
        edited_at: decode_ts(3, &edited_str)?,
        edited_by: decode_opt_uuid(4, row.get(4)?)?,
    })
}
