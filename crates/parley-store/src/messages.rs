use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::cascade::{self, CleanupReport};
use crate::database::{
    decode_opt_ts, decode_opt_uuid, decode_ts, decode_uuid, encode_ts, not_found, Database,
};
use crate::error::{Result, StoreError};
use crate::history;
use crate::models::{Message, MessageFilter, UnreadMessage};
use crate::notifications;
use crate::users::require_user;

pub(crate) const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, created_at, read, \
     edited, edited_at, edited_by, parent_message_id";

impl Database {
    /// Send a message, optionally as a reply to `parent_id`.
    ///
    /// The receiver's notification is written in the same transaction.
    pub fn create_message(
        &mut self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: self.now(),
            read: false,
            edited: false,
            edited_at: None,
            edited_by: None,
            parent_message_id: parent_id,
        };
        let max_len = self.max_content_len();

        let tx = self.begin_write()?;
        require_user(&tx, sender_id)?;
        require_user(&tx, receiver_id)?;
        if let Some(parent_id) = parent_id {
            require_message(&tx, parent_id)?;
        }
        validate_content(content, max_len)?;

        tx.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, created_at, parent_message_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id.to_string(),
                sender_id.to_string(),
                receiver_id.to_string(),
                message.content,
                encode_ts(&message.created_at),
                parent_id.map(|p| p.to_string()),
            ],
        )?;
        notifications::notify_receiver(&tx, &message)?;
        tx.commit()?;

        tracing::debug!(
            message_id = %message.id,
            sender_id = %sender_id,
            receiver_id = %receiver_id,
            reply = parent_id.is_some(),
            "message created"
        );
        Ok(message)
    }

    /// Fetch a single message by id.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        fetch_message(self.conn(), id)
    }

    /// Replace a message's content on behalf of `editor_id`.
    ///
    /// Who may edit is decided by the calling layer; the store only requires
    /// the editor to exist.  When the content actually changes, the previous
    /// content is snapshotted into the history and the message is stamped as
    /// edited; otherwise nothing is written.
    pub fn update_message_content(
        &mut self,
        message_id: Uuid,
        new_content: &str,
        editor_id: Uuid,
    ) -> Result<Message> {
        let now = self.now();
        let max_len = self.max_content_len();

        let tx = self.begin_write()?;
        let current = fetch_message(&tx, message_id)?;
        require_user(&tx, editor_id)?;
        if current.content != new_content {
            validate_content(new_content, max_len)?;
        }

        match history::apply_edit(&tx, &current, new_content, editor_id, now)? {
            Some(updated) => {
                tx.commit()?;
                Ok(updated)
            }
            None => Ok(current),
        }
    }

    /// Mark a message as read by its receiver.  Already-read messages are
    /// left untouched.
    pub fn mark_read(&mut self, message_id: Uuid, actor_id: Uuid) -> Result<Message> {
        let tx = self.begin_write()?;
        let mut message = fetch_message(&tx, message_id)?;
        if message.receiver_id != actor_id {
            return Err(StoreError::Permission(format!(
                "only the receiver may mark message {message_id} as read"
            )));
        }

        if !message.read {
            tx.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1",
                params![message_id.to_string()],
            )?;
            tx.commit()?;
            message.read = true;
        }
        Ok(message)
    }

    /// Delete a message and its whole reply tree.  Only the sender may
    /// delete.
    pub fn delete_message(&mut self, message_id: Uuid, actor_id: Uuid) -> Result<CleanupReport> {
        let tx = self.begin_write()?;
        let message = fetch_message(&tx, message_id)?;
        if message.sender_id != actor_id {
            return Err(StoreError::Permission(format!(
                "only the sender may delete message {message_id}"
            )));
        }

        let report = cascade::purge_messages(&tx, &[message_id])?;
        tx.commit()?;

        tracing::info!(
            message_id = %message_id,
            messages_deleted = report.messages_deleted,
            history_deleted = report.history_deleted,
            notifications_deleted = report.notifications_deleted,
            "message deleted"
        );
        Ok(report)
    }

    /// Unread messages addressed to `user_id`, newest first.
    pub fn get_unread(&self, user_id: Uuid) -> Result<Vec<UnreadMessage>> {
        let tx = self.begin_read()?;
        require_user(&tx, user_id)?;

        let mut stmt = tx.prepare(
            "SELECT m.id, m.sender_id, u.username, m.content, m.created_at
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.receiver_id = ?1 AND m.read = 0
             ORDER BY m.created_at DESC, m.rowid DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            let sender_str: String = row.get(1)?;
            let created_str: String = row.get(4)?;
            Ok(UnreadMessage {
                id: decode_uuid(0, &id_str)?,
                sender_id: decode_uuid(1, &sender_str)?,
                sender_username: row.get(2)?,
                content: row.get(3)?,
                created_at: decode_ts(4, &created_str)?,
            })
        })?;

        let mut unread = Vec::new();
        for row in rows {
            unread.push(row?);
        }
        Ok(unread)
    }

    /// Number of unread messages addressed to `user_id`.
    pub fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        let tx = self.begin_read()?;
        require_user(&tx, user_id)?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Every message exchanged between two users in either direction,
    /// oldest first.
    pub fn get_conversation(&self, user_a: Uuid, user_b: Uuid) -> Result<Vec<Message>> {
        let tx = self.begin_read()?;
        require_user(&tx, user_a)?;
        require_user(&tx, user_b)?;

        let mut stmt = tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(
            params![user_a.to_string(), user_b.to_string()],
            row_to_message,
        )?;
        let messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Messages `user_id` sent or received that match every criterion set
    /// in `filter`, newest first.
    ///
    /// `text` matches the content or the sender's username, ignoring ASCII
    /// case.  A blank `text` is ignored.
    pub fn search_messages(&self, user_id: Uuid, filter: &MessageFilter) -> Result<Vec<Message>> {
        if let (Some(since), Some(until)) = (filter.since, filter.until) {
            if since > until {
                return Err(StoreError::Validation("search window ends before it starts".into()));
            }
        }
        let needle = filter
            .text
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let tx = self.begin_read()?;
        require_user(&tx, user_id)?;

        let mut stmt = tx.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 OR receiver_id = ?1)
               AND (?2 IS NULL OR sender_id = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
               AND (?4 IS NULL OR created_at <= ?4)
               AND (?5 IS NULL
                    OR instr(lower(content), ?5) > 0
                    OR EXISTS (SELECT 1 FROM users u
                               WHERE u.id = messages.sender_id
                                 AND instr(lower(u.username), ?5) > 0))
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(
            params![
                user_id.to_string(),
                filter.sender_id.map(|id| id.to_string()),
                filter.since.as_ref().map(encode_ts),
                filter.until.as_ref().map(encode_ts),
                needle,
            ],
            row_to_message,
        )?;
        let messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(user_id = %user_id, matches = messages.len(), "message search");
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn fetch_message(conn: &Connection, id: Uuid) -> Result<Message> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id.to_string()],
        row_to_message,
    )
    .map_err(not_found(format!("message {id}")))
}

pub(crate) fn require_message(conn: &Connection, id: Uuid) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("message {id}")))
    }
}

fn validate_content(content: &str, max_len: usize) -> Result<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("message content must not be blank".into()));
    }
    if content.chars().count() > max_len {
        return Err(StoreError::Validation(format!(
            "message content longer than {max_len} characters"
        )));
    }
    Ok(())
}

/// Map a `rusqlite::Row` selected with [`MESSAGE_COLUMNS`] to a [`Message`].
pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let created_str: String = row.get(4)?;

    Ok(Message {
        id: decode_uuid(0, &id_str)?,
        sender_id: decode_uuid(1, &sender_str)?,
        receiver_id: decode_uuid(2, &receiver_str)?,
        content: row.get(3)?,
        created_at: decode_ts(4, &created_str)?,
        read: row.get(5)?,
        edited: row.get(6)?,
        edited_at: decode_opt_ts(7, row.get(7)?)?,
        edited_by: decode_opt_uuid(8, row.get(8)?)?,
        parent_message_id: decode_opt_uuid(9, row.get(9)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, user};

    #[test]
    fn new_message_defaults() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");

        let m = db.create_message(a.id, b.id, "hi", None).unwrap();
        assert!(!m.read);
        assert!(!m.edited);
        assert!(m.edited_at.is_none());
        assert!(m.edited_by.is_none());
        assert!(m.is_thread_start());
        assert_eq!(db.get_message(m.id).unwrap(), m);
    }

    #[test]
    fn create_rejects_unknown_references() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let ghost = Uuid::new_v4();

        assert!(matches!(
            db.create_message(ghost, a.id, "hi", None),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.create_message(a.id, ghost, "hi", None),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.create_message(a.id, a.id, "hi", Some(ghost)),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(db.get_unread(a.id).unwrap().len(), 0);
    }

    #[test]
    fn create_rejects_blank_and_oversized_content() {
        let mut db = test_db().with_max_content_len(5);
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");

        let blank = db.create_message(a.id, b.id, " \n", None).unwrap_err();
        assert!(matches!(blank, StoreError::Validation(_)));
        assert!(blank.is_retryable_with_new_input());
        assert!(matches!(
            db.create_message(a.id, b.id, "too long", None),
            Err(StoreError::Validation(_))
        ));
        assert!(db.list_notifications(b.id, false).unwrap().is_empty());
    }

    #[test]
    fn failed_notification_rolls_back_send() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_notifications BEFORE INSERT ON notifications
                 BEGIN SELECT RAISE(ABORT, 'notifications unavailable'); END;",
            )
            .unwrap();

        let err = db.create_message(a.id, b.id, "hi", None).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert!(!err.is_retryable_with_new_input());

        assert!(db.get_unread(b.id).unwrap().is_empty());
        assert!(db.get_conversation(a.id, b.id).unwrap().is_empty());
        assert_eq!(db.check_integrity().unwrap().messages, 0);
    }

    #[test]
    fn mark_read_by_receiver_only() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let m = db.create_message(a.id, b.id, "hi", None).unwrap();

        assert!(matches!(
            db.mark_read(m.id, a.id),
            Err(StoreError::Permission(_))
        ));
        assert!(matches!(
            db.mark_read(Uuid::new_v4(), b.id),
            Err(StoreError::NotFound(_))
        ));

        let read = db.mark_read(m.id, b.id).unwrap();
        assert!(read.read);
        assert!(!read.edited);
        // Idempotent.
        assert!(db.mark_read(m.id, b.id).unwrap().read);
        assert_eq!(db.get_message(m.id).unwrap(), read);
    }

    #[test]
    fn mark_read_leaves_notification_and_history_alone() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let m = db.create_message(a.id, b.id, "hi", None).unwrap();

        db.mark_read(m.id, b.id).unwrap();

        let notes = db.list_notifications(b.id, true).unwrap();
        assert_eq!(notes.len(), 1);
        assert!(db.get_message_history(m.id).unwrap().is_empty());
    }

    #[test]
    fn unread_inbox_is_newest_first() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let first = db.create_message(a.id, b.id, "one", None).unwrap();
        let second = db.create_message(a.id, b.id, "two", None).unwrap();
        let third = db.create_message(a.id, b.id, "three", None).unwrap();
        db.create_message(b.id, a.id, "reply", None).unwrap();
        db.mark_read(second.id, b.id).unwrap();

        let unread = db.get_unread(b.id).unwrap();
        let ids: Vec<_> = unread.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![third.id, first.id]);
        assert_eq!(unread[0].sender_username, "a");
        assert_eq!(unread[0].content, "three");
        assert_eq!(db.unread_count(b.id).unwrap(), 2);
        assert_eq!(db.unread_count(a.id).unwrap(), 1);
    }

    #[test]
    fn unread_for_unknown_user_is_not_found() {
        let db = test_db();
        assert!(matches!(
            db.get_unread(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn edit_rejects_unknown_references() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let m = db.create_message(a.id, b.id, "hi", None).unwrap();

        assert!(matches!(
            db.update_message_content(m.id, "hello", Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.update_message_content(Uuid::new_v4(), "hello", a.id),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(db.get_message(m.id).unwrap(), m);
    }

    #[test]
    fn delete_message_by_sender_only() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let m = db.create_message(a.id, b.id, "hi", None).unwrap();

        assert!(matches!(
            db.delete_message(m.id, b.id),
            Err(StoreError::Permission(_))
        ));

        let report = db.delete_message(m.id, a.id).unwrap();
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.notifications_deleted, 1);
        assert!(matches!(db.get_message(m.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn search_filters_by_sender_window_and_text() {
        let mut db = test_db();
        let alice = user(&mut db, "alice");
        let bob = user(&mut db, "bob");
        let carol = user(&mut db, "carol");
        let lunch = db.create_message(alice.id, bob.id, "Lunch at noon?", None).unwrap();
        let reply = db
            .create_message(bob.id, alice.id, "sure, LUNCH works", Some(lunch.id))
            .unwrap();
        let later = db.create_message(carol.id, bob.id, "meeting notes", None).unwrap();
        db.create_message(alice.id, carol.id, "lunch for carol", None).unwrap();

        let ids = |found: Vec<Message>| found.into_iter().map(|m| m.id).collect::<Vec<_>>();

        let all = db.search_messages(bob.id, &MessageFilter::default()).unwrap();
        assert_eq!(ids(all), vec![later.id, reply.id, lunch.id]);

        let from_alice = MessageFilter {
            sender_id: Some(alice.id),
            ..MessageFilter::default()
        };
        assert_eq!(ids(db.search_messages(bob.id, &from_alice).unwrap()), vec![lunch.id]);

        let by_content = MessageFilter {
            text: Some(" lunch ".into()),
            ..MessageFilter::default()
        };
        assert_eq!(
            ids(db.search_messages(bob.id, &by_content).unwrap()),
            vec![reply.id, lunch.id]
        );

        let by_username = MessageFilter {
            text: Some("CAROL".into()),
            ..MessageFilter::default()
        };
        assert_eq!(ids(db.search_messages(bob.id, &by_username).unwrap()), vec![later.id]);

        let window = MessageFilter {
            since: Some(reply.created_at),
            until: Some(later.created_at),
            ..MessageFilter::default()
        };
        assert_eq!(
            ids(db.search_messages(bob.id, &window).unwrap()),
            vec![later.id, reply.id]
        );
    }

    #[test]
    fn search_rejects_bad_input() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let m = db.create_message(a.id, a.id, "memo", None).unwrap();

        let inverted = MessageFilter {
            since: m.created_at.checked_add_signed(chrono::Duration::seconds(1)),
            until: Some(m.created_at),
            ..MessageFilter::default()
        };
        assert!(matches!(
            db.search_messages(a.id, &inverted),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.search_messages(Uuid::new_v4(), &MessageFilter::default()),
            Err(StoreError::NotFound(_))
        ));

        let blank = MessageFilter {
            text: Some("  ".into()),
            ..MessageFilter::default()
        };
        assert_eq!(db.search_messages(a.id, &blank).unwrap(), vec![m]);
    }

    #[test]
    fn conversation_covers_both_directions() {
        let mut db = test_db();
        let a = user(&mut db, "a");
        let b = user(&mut db, "b");
        let c = user(&mut db, "c");
        let m1 = db.create_message(a.id, b.id, "hi b", None).unwrap();
        db.create_message(a.id, c.id, "hi c", None).unwrap();
        let m2 = db.create_message(b.id, a.id, "hi a", None).unwrap();

        let convo = db.get_conversation(b.id, a.id).unwrap();
        let ids: Vec<_> = convo.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
    }
}
