//! Notifications derived from sent messages.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::messages::require_message;
use crate::models::{Message, Notification};
use crate::users::require_user;

const NOTIFICATION_COLUMNS: &str = "id, user_id, message_id, read, created_at";

/// Notify the receiver of a freshly inserted message.  Messages a user sends
/// to themselves produce no notification.
pub(crate) fn notify_receiver(
    conn: &Connection,
    message: &Message,
) -> Result<Option<Notification>> {
    if message.receiver_id == message.sender_id {
        return Ok(None);
    }

    let notification = Notification {
        id: Uuid::new_v4(),
        user_id: message.receiver_id,
        message_id: message.id,
        read: false,
        created_at: message.created_at,
    };

    conn.execute(
        "INSERT INTO notifications (id, user_id, message_id, read, created_at)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![
            notification.id.to_string(),
            notification.user_id.to_string(),
            notification.message_id.to_string(),
            encode_ts(&notification.created_at),
        ],
    )?;

    tracing::debug!(
        notification_id = %notification.id,
        user_id = %notification.user_id,
        message_id = %notification.message_id,
        "notification created"
    );
    Ok(Some(notification))
}

impl Database {
    /// Notifications addressed to `user_id`, newest first.
    pub fn list_notifications(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let tx = self.begin_read()?;
        require_user(&tx, user_id)?;

        let filter = if unread_only { "AND read = 0" } else { "" };
        let mut stmt = tx.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ?1 {filter}
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// Notifications that point at `message_id`.
    pub fn notifications_for_message(&self, message_id: Uuid) -> Result<Vec<Notification>> {
        let tx = self.begin_read()?;
        require_message(&tx, message_id)?;

        let mut stmt = tx.prepare(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE message_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![message_id.to_string()], row_to_notification)?;
        let notifications = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notifications)
    }

    /// Mark a notification as read.  Only its recipient may do so.
    pub fn mark_notification_read(
        &mut self,
        notification_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Notification> {
        let tx = self.begin_write()?;
        let mut notification = tx
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![notification_id.to_string()],
                row_to_notification,
            )
            .map_err(not_found(format!("notification {notification_id}")))?;

        if notification.user_id != actor_id {
            return Err(StoreError::Permission(format!(
                "notification {notification_id} belongs to another user"
            )));
        }

        if !notification.read {
            tx.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1",
                params![notification_id.to_string()],
            )?;
            tx.commit()?;
            notification.read = true;
        }
        Ok(notification)
    }
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let message_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;

    Ok(Notification {
        id: decode_uuid(0, &id_str)?,
        user_id: decode_uuid(1, &user_str)?,
        message_id: decode_uuid(2, &message_str)?,
        read: row.get(3)?,
        created_at: decode_ts(4, &created_str)?,
    })
}
