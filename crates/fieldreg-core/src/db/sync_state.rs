//! Sync bookkeeping repository implementation

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

const PULL_CURSOR_KEY: &str = "pull_cursor";

/// Trait for persisted sync bookkeeping
pub trait SyncState {
    /// Last remote position fully applied by a completed cycle
    fn cursor(&self) -> Result<Option<String>>;

    /// Persist a new pull cursor
    fn set_cursor(&self, cursor: &str) -> Result<()>;
}

/// `SQLite` implementation of `SyncState`
pub struct SqliteSyncState<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncState<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SyncState for SqliteSyncState<'_> {
    fn cursor(&self) -> Result<Option<String>> {
        self.get_value(PULL_CURSOR_KEY)
    }

    fn set_cursor(&self, cursor: &str) -> Result<()> {
        self.set_value(PULL_CURSOR_KEY, cursor)
    }
}
