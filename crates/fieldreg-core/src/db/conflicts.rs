//! Conflict ledger repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{ConflictStrategy, Document, DocumentId, Revision, SyncConflict};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for conflict ledger operations
pub trait ConflictLog {
    /// Record a detected conflict; returns the new row id
    fn record(
        &self,
        document_id: &DocumentId,
        local_revision: &Revision,
        remote: &Document,
        strategy: ConflictStrategy,
    ) -> Result<i64>;

    /// Most recent conflicts first
    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;

    /// Latest unresolved conflict for a document
    fn unresolved_for(&self, document_id: &DocumentId) -> Result<Option<SyncConflict>>;

    /// Close every open conflict of a document
    fn mark_resolved(&self, document_id: &DocumentId) -> Result<usize>;

    /// Swap in a newer remote copy for the open identity conflict of its
    /// document; returns whether a row changed
    fn refresh_remote(&self, remote: &Document) -> Result<bool>;
}

/// `SQLite` implementation of `ConflictLog`
pub struct SqliteConflictLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictLog<'a> {
    /// Create a new ledger with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(SyncConflict, String)> {
        let strategy: String = row.get(5)?;
        Ok((
            SyncConflict {
                id: row.get(0)?,
                document_id: row.get(1)?,
                local_revision: row.get(2)?,
                remote_revision: row.get(3)?,
                remote_snapshot: row.get(4)?,
                strategy: ConflictStrategy::FieldLww,
                detected_at: row.get(6)?,
                resolved_at: row.get(7)?,
            },
            strategy,
        ))
    }

    fn decode((mut conflict, strategy): (SyncConflict, String)) -> Result<SyncConflict> {
        conflict.strategy = strategy.parse().map_err(Error::Database)?;
        Ok(conflict)
    }
}

impl ConflictLog for SqliteConflictLog<'_> {
    fn record(
        &self,
        document_id: &DocumentId,
        local_revision: &Revision,
        remote: &Document,
        strategy: ConflictStrategy,
    ) -> Result<i64> {
        let remote_revision = remote.require_revision()?;
        // Identity conflicts keep the remote copy until a decision is made
        let snapshot = match strategy {
            ConflictStrategy::Identity => Some(serde_json::to_string(remote)?),
            ConflictStrategy::FieldLww => None,
        };

        self.conn.execute(
            "INSERT INTO sync_conflicts
                (document_id, local_revision, remote_revision, remote_snapshot, strategy, detected_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                document_id.as_str(),
                local_revision.to_string(),
                remote_revision.to_string(),
                snapshot,
                strategy.as_str(),
                crate::util::now_millis()
            ],
        )?;

        tracing::info!(
            "Recorded {strategy} conflict on {document_id}: local {local_revision}, remote {remote_revision}"
        );
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, local_revision, remote_revision, remote_snapshot,
                    strategy, detected_at, resolved_at
             FROM sync_conflicts
             ORDER BY detected_at DESC, id DESC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(params![limit.min(i64::MAX as usize) as i64], Self::parse_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(Self::decode).collect()
    }

    fn unresolved_for(&self, document_id: &DocumentId) -> Result<Option<SyncConflict>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, document_id, local_revision, remote_revision, remote_snapshot,
                        strategy, detected_at, resolved_at
                 FROM sync_conflicts
                 WHERE document_id = ? AND resolved_at IS NULL
                 ORDER BY id DESC
                 LIMIT 1",
                params![document_id.as_str()],
                Self::parse_row,
            )
            .optional()?;

        row.map(Self::decode).transpose()
    }

    fn mark_resolved(&self, document_id: &DocumentId) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolved_at = ?
             WHERE document_id = ? AND resolved_at IS NULL",
            params![crate::util::now_millis(), document_id.as_str()],
        )?;
        Ok(rows)
    }

    fn refresh_remote(&self, remote: &Document) -> Result<bool> {
        let remote_revision = remote.require_revision()?.to_string();
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET remote_revision = ?, remote_snapshot = ?
             WHERE document_id = ? AND strategy = ? AND resolved_at IS NULL
               AND remote_revision != ?",
            params![
                remote_revision,
                serde_json::to_string(remote)?,
                remote.id.as_str(),
                ConflictStrategy::Identity.as_str(),
                remote_revision
            ],
        )?;
        if rows > 0 {
            tracing::debug!("Refreshed remote copy of identity conflict on {}", remote.id);
        }
        Ok(rows > 0)
    }
}
