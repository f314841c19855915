//! CRUD operations for [`User`] records.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::cascade::{self, CleanupReport};
use crate::database::{decode_ts, decode_uuid, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{NewUser, User};

/// Maximum username length, in characters.
pub const MAX_USERNAME_LEN: usize = 150;

const USER_COLUMNS: &str = "id, username, display_name, email, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new user.  Usernames are trimmed and must be unique.
    pub fn create_user(&mut self, new: NewUser) -> Result<User> {
        let username = new.username.trim().to_string();
        if username.is_empty() {
            return Err(StoreError::Validation("username must not be blank".into()));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(StoreError::Validation(format!(
                "username longer than {MAX_USERNAME_LEN} characters"
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username,
            display_name: non_blank(new.display_name),
            email: non_blank(new.email),
            created_at: self.now(),
        };

        let tx = self.begin_write()?;

        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            params![user.username],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StoreError::Validation(format!(
                "username '{}' is already taken",
                user.username
            )));
        }

        tx.execute(
            "INSERT INTO users (id, username, display_name, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.username,
                user.display_name,
                user.email,
                encode_ts(&user.created_at),
            ],
        )?;
        tx.commit()?;

        tracing::info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single user by id.
    pub fn get_user(&self, id: Uuid) -> Result<User> {
        fetch_user(self.conn(), id)
    }

    /// Fetch a user by username.  Surrounding whitespace is ignored.
    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username.trim()],
                row_to_user,
            )
            .map_err(not_found(format!("user '{username}'")))
    }

    /// List all users, ordered by username.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username ASC"))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a user and everything that depends on them.
    ///
    /// Messages the user sent or received go away together with their reply
    /// trees, history and notifications.  History rows and edit stamps the
    /// user authored on surviving messages keep their content but lose the
    /// author reference.  The user row is removed last, in the same
    /// transaction.
    pub fn delete_user(&mut self, id: Uuid) -> Result<CleanupReport> {
        let tx = self.begin_write()?;
        let user = fetch_user(&tx, id)?;

        let report = cascade::purge_user(&tx, id)?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;

        tracing::info!(
            user_id = %id,
            username = %user.username,
            messages_deleted = report.messages_deleted,
            history_deleted = report.history_deleted,
            notifications_deleted = report.notifications_deleted,
            history_authorship_cleared = report.history_authorship_cleared,
            edit_authorship_cleared = report.edit_authorship_cleared,
            "user deleted"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn fetch_user(conn: &Connection, id: Uuid) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id.to_string()],
        row_to_user,
    )
    .map_err(not_found(format!("user {id}")))
}

pub(crate) fn require_user(conn: &Connection, id: Uuid) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("user {id}")))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(4)?;

    Ok(User {
        id: decode_uuid(0, &id_str)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        created_at: decode_ts(4, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_db, user};

    #[test]
    fn create_and_fetch() {
        let mut db = test_db();
        let alice = db
            .create_user(NewUser {
                username: "  alice ".into(),
                display_name: Some("Alice".into()),
                email: Some("   ".into()),
            })
            .unwrap();

        assert_eq!(alice.username, "alice");
        assert_eq!(alice.display_name.as_deref(), Some("Alice"));
        assert_eq!(alice.email, None);
        assert_eq!(db.get_user(alice.id).unwrap(), alice);
        assert_eq!(db.get_user_by_username("alice").unwrap(), alice);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let mut db = test_db();
        user(&mut db, "bob");
        let err = db.create_user(NewUser::new("bob")).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn blank_and_oversized_usernames_are_rejected() {
        let mut db = test_db();
        assert!(matches!(
            db.create_user(NewUser::new("   ")),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            db.create_user(NewUser::new("x".repeat(MAX_USERNAME_LEN + 1))),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn unknown_user_is_not_found() {
        let mut db = test_db();
        assert!(matches!(
            db.get_user(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.get_user_by_username("nobody"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            db.delete_user(Uuid::new_v4()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_user_without_messages() {
        let mut db = test_db();
        let carol = user(&mut db, "carol");
        let report = db.delete_user(carol.id).unwrap();
        assert_eq!(report, CleanupReport::default());
        assert!(db.list_users().unwrap().is_empty());
    }
}
