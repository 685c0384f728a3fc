//! Change log repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::models::{ChangeEntry, ChangeId, Document, DocumentId, Revision};
use rusqlite::{params, Connection};

/// Rows fetched per page by [`Entries`]
const PAGE_SIZE: usize = 64;

/// Trait for change log operations
pub trait ChangeLog {
    /// Append an entry for `snapshot` at its current revision
    fn append(&self, snapshot: &Document, base_revision: Option<&Revision>) -> Result<ChangeEntry>;

    /// Oldest entries first, at most `limit`, without removing them
    fn drain(&self, limit: usize) -> Entries<'_>;

    /// Remove an acknowledged entry; returns whether it was still present
    fn acknowledge(&self, id: ChangeId) -> Result<bool>;

    /// Remove entries for `document_id` whose revision is not `current`
    fn supersede(&self, document_id: &DocumentId, current: &Revision) -> Result<usize>;

    /// Point the remaining entries of a document at a new base revision
    fn rebase(&self, document_id: &DocumentId, base: &Revision) -> Result<usize>;

    /// Remove every entry of a document
    fn clear_document(&self, document_id: &DocumentId) -> Result<usize>;

    /// Entries of a single document, oldest first
    fn entries_for(&self, document_id: &DocumentId) -> Result<Vec<ChangeEntry>>;

    /// Number of entries awaiting acknowledgment
    fn pending_count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `ChangeLog`
pub struct SqliteChangeLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteChangeLog<'a> {
    /// Create a new change log with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            seq: row.get(0)?,
            document_id: row.get(1)?,
            revision: row.get(2)?,
            base_revision: row.get(3)?,
            snapshot: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Entry columns before decoding
struct RawEntry {
    seq: i64,
    document_id: String,
    revision: String,
    base_revision: Option<String>,
    snapshot: String,
    created_at: i64,
}

impl RawEntry {
    fn decode(self) -> Result<ChangeEntry> {
        Ok(ChangeEntry {
            id: ChangeId(self.seq),
            document_id: self
                .document_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid document id '{}'", self.document_id)))?,
            revision: self.revision.parse().map_err(Error::Database)?,
            base_revision: self
                .base_revision
                .map(|base| base.parse::<Revision>())
                .transpose()
                .map_err(Error::Database)?,
            snapshot: serde_json::from_str(&self.snapshot)?,
            created_at: self.created_at,
        })
    }
}

impl ChangeLog for SqliteChangeLog<'_> {
    fn append(&self, snapshot: &Document, base_revision: Option<&Revision>) -> Result<ChangeEntry> {
        let revision = snapshot.require_revision()?.clone();
        let created_at = crate::util::now_millis();
        let body = serde_json::to_string(snapshot)?;

        self.conn.execute(
            "INSERT INTO change_log (document_id, revision, base_revision, snapshot, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                snapshot.id.as_str(),
                revision.to_string(),
                base_revision.map(ToString::to_string),
                body,
                created_at
            ],
        )?;

        Ok(ChangeEntry {
            id: ChangeId(self.conn.last_insert_rowid()),
            document_id: snapshot.id,
            revision,
            base_revision: base_revision.cloned(),
            snapshot: snapshot.clone(),
            created_at,
        })
    }

    fn drain(&self, limit: usize) -> Entries<'_> {
        Entries {
            conn: self.conn,
            after: 0,
            remaining: limit,
            buffer: VecDeque::new(),
            exhausted: limit == 0,
        }
    }

    fn acknowledge(&self, id: ChangeId) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM change_log WHERE seq = ?", params![id.0])?;
        Ok(rows > 0)
    }

    fn supersede(&self, document_id: &DocumentId, current: &Revision) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM change_log WHERE document_id = ? AND revision != ?",
            params![document_id.as_str(), current.to_string()],
        )?;
        if rows > 0 {
            tracing::debug!("Superseded {rows} change(s) for {document_id}");
        }
        Ok(rows)
    }

    fn rebase(&self, document_id: &DocumentId, base: &Revision) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE change_log SET base_revision = ? WHERE document_id = ?",
            params![base.to_string(), document_id.as_str()],
        )?;
        Ok(rows)
    }

    fn clear_document(&self, document_id: &DocumentId) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM change_log WHERE document_id = ?",
            params![document_id.as_str()],
        )?;
        Ok(rows)
    }

    fn entries_for(&self, document_id: &DocumentId) -> Result<Vec<ChangeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, document_id, revision, base_revision, snapshot, created_at
             FROM change_log
             WHERE document_id = ?
             ORDER BY seq ASC",
        )?;

        let raw = stmt
            .query_map(params![document_id.as_str()], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter().map(RawEntry::decode).collect()
    }

    fn pending_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Lazy, paged walk over the change log in creation order.
///
/// Entries belonging to documents in `conflict` status are skipped; they stay
/// in the log until the conflict is resolved.
pub struct Entries<'a> {
    conn: &'a Connection,
    after: i64,
    remaining: usize,
    buffer: VecDeque<ChangeEntry>,
    exhausted: bool,
}

impl Entries<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let page = self.remaining.min(PAGE_SIZE);
        let mut stmt = self.conn.prepare_cached(
            "SELECT c.seq, c.document_id, c.revision, c.base_revision, c.snapshot, c.created_at
             FROM change_log c
             WHERE c.seq > ?
               AND NOT EXISTS (
                   SELECT 1 FROM documents d
                   WHERE d.id = c.document_id AND d.sync_status = 'conflict'
               )
             ORDER BY c.seq ASC
             LIMIT ?",
        )?;

        let raw = stmt
            .query_map(params![self.after, page as i64], SqliteChangeLog::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if raw.len() < page {
            self.exhausted = true;
        }
        for entry in raw {
            let entry = entry.decode()?;
            self.after = entry.id.0;
            self.buffer.push_back(entry);
        }
        Ok(())
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<ChangeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(error) = self.fetch_page() {
                self.exhausted = true;
                self.remaining = 0;
                return Some(Err(error));
            }
        }
        let entry = self.buffer.pop_front()?;
        self.remaining -= 1;
        Some(Ok(entry))
    }
}
