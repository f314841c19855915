//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.  Mutating operations live
//! in the entity modules (`users`, `messages`, ...) as further `impl Database`
//! blocks; each one opens a single `BEGIN IMMEDIATE` transaction through
//! [`Database::begin_write`] and commits it only after every follow-on effect
//! has been applied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    clock: Arc<dyn Clock>,
    max_content_len: usize,
}

impl Database {
    /// Open (or create) the database described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db_path = config.resolve_db_path()?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %db_path.display(), "opening database");

        let conn = Connection::open(&db_path)?;
        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn, config)
    }

    /// Open (or create) a database at an explicit path with default settings.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let config = StoreConfig {
            db_path: Some(path.to_path_buf()),
            ..StoreConfig::default()
        };
        Self::open(&config)
    }

    /// Open a private in-memory database.  Contents vanish on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, &StoreConfig::default())
    }

    fn from_connection(conn: Connection, config: &StoreConfig) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(config.busy_timeout)?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
            max_content_len: config.max_content_len,
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the maximum message length (in characters).
    pub fn with_max_content_len(mut self, max: usize) -> Self {
        self.max_content_len = max;
        self
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed helpers; raw access bypasses every
    /// consistency rule the store enforces.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn max_content_len(&self) -> usize {
        self.max_content_len
    }

    /// Start a write transaction.  `IMMEDIATE` takes the write lock up front
    /// so two writers never both read the same state and then race to
    /// commit.  Dropping the transaction without committing rolls it back.
    pub(crate) fn begin_write(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Start a read transaction.  Every statement run through it sees the
    /// same snapshot, even while another connection commits to the file.
    /// Dropping it ends the snapshot.
    pub(crate) fn begin_read(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }
}

// ---------------------------------------------------------------------------
// Column codecs shared by the entity modules
// ---------------------------------------------------------------------------

/// Fixed-width RFC 3339 so that text order in SQLite equals time order.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn decode_opt_uuid(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<Uuid>> {
    raw.map(|s| decode_uuid(idx, &s)).transpose()
}

pub(crate) fn decode_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(idx, &s)).transpose()
}

/// Map "no rows" to [`StoreError::NotFound`] and everything else to
/// [`StoreError::Sqlite`].
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let what = what.into();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let user_id = {
            let mut db = Database::open_at(&path).unwrap();
            db.create_user(crate::NewUser::new("alice")).unwrap().id
        };

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.get_user(user_id).unwrap().username, "alice");
    }

    #[test]
    fn in_memory_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
    }

    #[test]
    fn malformed_column_is_a_sqlite_error() {
        let mut db = crate::test_support::test_db();
        let alice = crate::test_support::user(&mut db, "alice");
        db.conn()
            .execute(
                "UPDATE users SET created_at = 'yesterday' WHERE id = ?1",
                [alice.id.to_string()],
            )
            .unwrap();

        assert!(matches!(
            db.get_user(alice.id),
            Err(StoreError::Sqlite(rusqlite::Error::FromSqlConversionFailure(4, _, _)))
        ));
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = DateTime::from_timestamp(1_700_000_000, 5_000).unwrap();
        let late = DateTime::from_timestamp(1_700_000_000, 120_000_000).unwrap();
        assert!(encode_ts(&early) < encode_ts(&late));
        assert_eq!(decode_ts(0, &encode_ts(&late)).unwrap(), late);
    }
}
