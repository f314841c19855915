//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `messages`, `message_history` and
//! `notifications`.
//!
//! Foreign keys carry no `ON DELETE` action.  Cleanup is done explicitly by
//! the cascade module, and the keys are deferred so that a cleanup which
//! leaves an orphan fails at commit instead of mid-procedure.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    username     TEXT NOT NULL UNIQUE,
    display_name TEXT,
    email        TEXT,
    created_at   TEXT NOT NULL                -- RFC-3339, microseconds, UTC
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    sender_id         TEXT NOT NULL,              -- FK -> users(id)
    receiver_id       TEXT NOT NULL,              -- FK -> users(id)
    content           TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    read              INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    edited            INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    edited_at         TEXT,                       -- set iff edited = 1
    edited_by         TEXT,                       -- nullable FK -> users(id)
    parent_message_id TEXT,                       -- nullable FK -> messages(id)

    CHECK ((edited = 0) = (edited_at IS NULL)),

    FOREIGN KEY (sender_id) REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (receiver_id) REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (edited_by) REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (parent_message_id) REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_read ON messages(receiver_id, read);
CREATE INDEX IF NOT EXISTS idx_messages_sender_receiver ON messages(sender_id, receiver_id);
CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_message_id);
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);
CREATE INDEX IF NOT EXISTS idx_messages_edited_by ON messages(edited_by);

-- ----------------------------------------------------------------
-- Message history (append-only edit snapshots)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_history (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    content    TEXT NOT NULL,                 -- content before the edit
    edited_at  TEXT NOT NULL,
    edited_by  TEXT,                          -- nullable FK -> users(id)

    FOREIGN KEY (message_id) REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (edited_by) REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS idx_history_message ON message_history(message_id, edited_at DESC);
CREATE INDEX IF NOT EXISTS idx_history_edited_by ON message_history(edited_by);

-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,                 -- FK -> users(id), recipient
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    read       INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
    FOREIGN KEY (message_id) REFERENCES messages(id) DEFERRABLE INITIALLY DEFERRED
);

CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, read);
CREATE INDEX IF NOT EXISTS idx_notifications_message ON notifications(message_id);
CREATE INDEX IF NOT EXISTS idx_notifications_created ON notifications(created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
