//! SQLite storage layer.
//!
//! Two tables: `backlog` holds pending payloads, `status` holds at most one
//! row meaning "a worker is active". Every statement runs in autocommit mode
//! through the connection's [`RetryPolicy`], so each one is its own atomic
//! transaction and busy/locked failures are absorbed before they reach the
//! caller.
//!
//! Rows are addressed by `rowid` and `work` may hold TEXT or BLOB, so a
//! database created with the plain `backlog (work text UNIQUE)` schema is
//! read and written the same way as one created here.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Error, Result};
use crate::model::{BacklogEntry, EntryId};
use crate::retry::RetryPolicy;

const ENSURE_BACKLOG: &str = "
    CREATE TABLE IF NOT EXISTS backlog (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        work    BLOB NOT NULL UNIQUE
    )";
const PUSH_WORK: &str = "INSERT INTO backlog (work) VALUES (?1)";
const OLDEST_WORK: &str = "SELECT rowid, work FROM backlog ORDER BY rowid ASC LIMIT 1";
const LIST_WORK: &str = "SELECT rowid, work FROM backlog ORDER BY rowid ASC LIMIT ?1";
const REMOVE_WORK: &str = "DELETE FROM backlog WHERE rowid = ?1";

const ENSURE_STATUS: &str = "CREATE TABLE IF NOT EXISTS status (active INTEGER UNIQUE)";
const DECLARE_ACTIVE: &str = "INSERT INTO status (active) VALUES (1)";
const DECLARE_INACTIVE: &str = "DELETE FROM status";
// Emptiness check and release in one statement: an insert into `backlog`
// either lands before it (and the marker stays) or after it (and the next
// `start` finds no marker).
const DECLARE_INACTIVE_IF_IDLE: &str =
    "DELETE FROM status WHERE NOT EXISTS (SELECT 1 FROM backlog)";

/// Storage backend. Owns one SQLite connection.
///
/// Handles are never shared between processes; producers and the worker
/// each open their own.
pub struct Storage {
    conn: Connection,
    retry: RetryPolicy,
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Does not create tables; callers ensure the ones they touch.
    pub fn open(path: impl AsRef<Path>, retry: RetryPolicy) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self { conn, retry };
        storage.init()?;
        Ok(storage)
    }

    fn init(&self) -> Result<()> {
        // WAL keeps readers from blocking the worker's deletes.
        self.retry.execute("journal_mode", || {
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        })?;
        Ok(())
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Storage(e))
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    pub fn ensure_backlog(&self) -> Result<()> {
        self.retry
            .execute("ensure_backlog", || self.conn.execute(ENSURE_BACKLOG, []))?;
        Ok(())
    }

    pub fn ensure_status(&self) -> Result<()> {
        self.retry
            .execute("ensure_status", || self.conn.execute(ENSURE_STATUS, []))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backlog
    // -----------------------------------------------------------------------

    /// Append a payload. Fails with [`Error::DuplicateWork`] if an identical
    /// payload is already pending.
    ///
    /// NUL-free UTF-8 payloads (all JSON) are bound as TEXT, anything else
    /// as BLOB. SQLite never considers a TEXT and a BLOB equal, so the same
    /// bytes must always land with the same type for the UNIQUE check to
    /// catch them.
    pub fn insert_work(&self, payload: &[u8]) -> Result<EntryId> {
        let text = std::str::from_utf8(payload)
            .ok()
            .filter(|text| !text.contains('\0'));
        match self.retry.execute("push_work", || match text {
            Some(text) => self.conn.execute(PUSH_WORK, params![text]),
            None => self.conn.execute(PUSH_WORK, params![payload]),
        }) {
            Ok(_) => Ok(EntryId(self.conn.last_insert_rowid())),
            Err(Error::Constraint(_)) => Err(Error::DuplicateWork),
            Err(e) => Err(e),
        }
    }

    /// The pending entry with the smallest id, if any.
    pub fn oldest_work(&self) -> Result<Option<BacklogEntry>> {
        self.retry.execute("get_work", || {
            self.conn
                .query_row(OLDEST_WORK, [], row_to_entry)
                .optional()
        })
    }

    /// Delete a consumed entry. Returns whether a row was removed.
    pub fn delete_work(&self, id: EntryId) -> Result<bool> {
        let deleted = self
            .retry
            .execute("remove_work", || self.conn.execute(REMOVE_WORK, params![id.0]))?;
        Ok(deleted > 0)
    }

    /// Number of pending entries.
    pub fn pending(&self) -> Result<u64> {
        let count: i64 = self.retry.execute("count_work", || {
            self.conn
                .query_row("SELECT COUNT(*) FROM backlog", [], |row| row.get(0))
        })?;
        Ok(count as u64)
    }

    /// Up to `limit` pending entries, oldest first.
    pub fn backlog(&self, limit: usize) -> Result<Vec<BacklogEntry>> {
        self.retry.execute("list_work", || {
            let mut stmt = self.conn.prepare(LIST_WORK)?;
            let entries = stmt
                .query_map(params![limit as i64], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>();
            entries
        })
    }

    // -----------------------------------------------------------------------
    // Status marker
    // -----------------------------------------------------------------------

    /// Insert the status marker. Fails with [`Error::AlreadyActive`] if
    /// another worker holds it.
    pub fn claim_active(&self) -> Result<()> {
        match self
            .retry
            .execute("declare_active", || self.conn.execute(DECLARE_ACTIVE, []))
        {
            Ok(_) => Ok(()),
            Err(Error::Constraint(_)) => Err(Error::AlreadyActive),
            Err(e) => Err(e),
        }
    }

    /// Release the marker only if the backlog is empty, atomically.
    /// Returns `true` if the marker was released.
    pub fn release_if_idle(&self) -> Result<bool> {
        let released = self.retry.execute("declare_inactive_if_idle", || {
            self.conn.execute(DECLARE_INACTIVE_IF_IDLE, [])
        })?;
        Ok(released > 0)
    }

    /// Release the marker unconditionally. Returns the number of rows removed.
    pub fn release_all(&self) -> Result<usize> {
        self.retry
            .execute("declare_inactive", || self.conn.execute(DECLARE_INACTIVE, []))
    }

    /// Whether a status marker exists.
    pub fn is_active(&self) -> Result<bool> {
        self.retry.execute("is_active", || {
            self.conn
                .query_row("SELECT EXISTS (SELECT 1 FROM status)", [], |row| row.get(0))
        })
    }
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<BacklogEntry> {
    let payload = match row.get_ref(1)? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                1,
                "work".to_string(),
                other.data_type(),
            ));
        }
    };
    Ok(BacklogEntry {
        id: EntryId(row.get(0)?),
        payload,
    })
}
