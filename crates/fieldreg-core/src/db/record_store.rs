//! Record store repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::collections::VecDeque;

use crate::db::change_log::{ChangeLog, SqliteChangeLog};
use crate::error::{Error, Result};
use crate::models::{
    ChangeEntry, Document, DocumentId, DocumentKind, FieldStamps, Revision, SyncStatus,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Rows fetched per page by [`Documents`]
const PAGE_SIZE: usize = 100;

/// Selection applied by [`RecordStore::list`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub status: Option<SyncStatus>,
    /// Include tombstones that are waiting for remote acknowledgment
    pub include_deleted: bool,
}

impl DocumentFilter {
    #[must_use]
    pub const fn with_kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub const fn with_status(mut self, status: SyncStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub const fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// What a confirmed push did to the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushConfirmation {
    /// The pushed revision is still current and now synced
    Synced,
    /// The document was edited during the round-trip and stays pending
    StillPending,
    /// A synced tombstone was removed from the store
    Purged,
    /// The document no longer exists locally
    Missing,
}

/// Document counts per sync status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub conflict: usize,
    pub queued_changes: usize,
}

/// Trait for document storage operations
pub trait RecordStore {
    /// Save a local edit with optimistic concurrency; returns the new revision
    fn put(&self, document: &Document) -> Result<Revision>;

    /// Write a tombstone for the document at `revision`
    fn delete(&self, id: &DocumentId, revision: &Revision) -> Result<Revision>;

    /// Get a document by ID
    fn get(&self, id: &DocumentId) -> Result<Document>;

    /// Get a document by ID, `None` when absent
    fn find(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Lazily list documents in insertion order
    fn list(&self, filter: DocumentFilter) -> Documents<'_>;

    /// Write the sync engine's resolution of a document.
    ///
    /// Fails with `StaleResolution` when the stored revision is no longer
    /// `expected_prior` (`None` meaning the document must be absent).
    fn apply_resolved(
        &self,
        id: &DocumentId,
        resolved: &Document,
        expected_prior: Option<&Revision>,
    ) -> Result<Document>;

    /// Record that the remote accepted a change log entry
    fn confirm_push(&self, entry: &ChangeEntry) -> Result<PushConfirmation>;

    /// Set the sync status of a document
    fn set_status(&self, id: &DocumentId, status: SyncStatus) -> Result<()>;

    /// Move documents in `from` status to `to`; returns how many changed
    fn transition_status(&self, from: SyncStatus, to: SyncStatus) -> Result<usize>;

    /// Remove a document and its change log entries
    fn purge(&self, id: &DocumentId) -> Result<bool>;

    /// Counts per status plus queued changes
    fn summary(&self) -> Result<StoreSummary>;
}

/// `SQLite` implementation of `RecordStore`
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn change_log(&self) -> SqliteChangeLog<'a> {
        SqliteChangeLog::new(self.conn)
    }

    /// Insert or update the row for a document, keeping its row order
    fn write(&self, document: &Document) -> Result<()> {
        let revision = document.require_revision()?;
        let body = serde_json::to_string(document)?;
        self.conn.execute(
            "INSERT INTO documents (id, kind, revision, sync_status, deleted, updated_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                revision = excluded.revision,
                sync_status = excluded.sync_status,
                deleted = excluded.deleted,
                updated_at = excluded.updated_at,
                body = excluded.body",
            params![
                document.id.as_str(),
                document.kind.as_str(),
                revision.to_string(),
                document.sync_status.as_str(),
                i32::from(document.deleted),
                document.updated_at,
                body
            ],
        )?;
        Ok(())
    }

    /// Shared path for local edits and tombstones
    fn write_local(&self, document: &Document) -> Result<Revision> {
        let mut next = document.clone();
        if !next.deleted {
            next.customer.normalize();
            next.customer.validate().map_err(Error::InvalidInput)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let now = crate::util::now_millis();

        let revision = match self.find(&document.id)? {
            None => {
                if document.revision.is_some() {
                    return Err(Error::NotFound(document.id.to_string()));
                }
                let revision = Revision::initial();
                next.revision = Some(revision.clone());
                next.origin = Some(revision.clone());
                next.merged_from.clear();
                next.synced_revision = None;
                next.stamps = FieldStamps::uniform(now);
                next.created_at = now;
                next.updated_at = now;
                next.sync_status = SyncStatus::Pending;
                revision
            }
            Some(current) => {
                if current.revision != document.revision {
                    return Err(Error::RevisionConflict {
                        current: Box::new(current),
                    });
                }
                if current.deleted {
                    return Err(Error::NotFound(document.id.to_string()));
                }
                let revision = current.require_revision()?.next();
                next.revision = Some(revision.clone());
                next.origin.clone_from(&current.origin);
                next.merged_from.clear();
                next.synced_revision.clone_from(&current.synced_revision);
                // Stamps strictly increase across writes of one replica
                next.stamp_changes_since(&current, now.max(current.updated_at + 1));
                next.sync_status = if current.sync_status == SyncStatus::Conflict {
                    SyncStatus::Conflict
                } else {
                    SyncStatus::Pending
                };
                revision
            }
        };

        self.write(&next)?;
        let log = self.change_log();
        log.append(&next, next.synced_revision.as_ref())?;
        log.supersede(&next.id, &revision)?;
        tx.commit()?;

        tracing::debug!("Stored {} at revision {revision}", next.id);
        Ok(revision)
    }

    /// Parse a document from its stored body
    fn parse_body(body: &str) -> Result<Document> {
        Ok(serde_json::from_str(body)?)
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn put(&self, document: &Document) -> Result<Revision> {
        let mut next = document.clone();
        next.deleted = false;
        self.write_local(&next)
    }

    fn delete(&self, id: &DocumentId, revision: &Revision) -> Result<Revision> {
        let mut tombstone = self.get(id)?;
        if tombstone.revision.as_ref() != Some(revision) {
            return Err(Error::RevisionConflict {
                current: Box::new(tombstone),
            });
        }
        if tombstone.deleted {
            return Err(Error::NotFound(id.to_string()));
        }
        tombstone.deleted = true;
        self.write_local(&tombstone)
    }

    fn get(&self, id: &DocumentId) -> Result<Document> {
        self.find(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn find(&self, id: &DocumentId) -> Result<Option<Document>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        body.as_deref().map(Self::parse_body).transpose()
    }

    fn list(&self, filter: DocumentFilter) -> Documents<'_> {
        Documents {
            conn: self.conn,
            filter,
            after: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn apply_resolved(
        &self,
        id: &DocumentId,
        resolved: &Document,
        expected_prior: Option<&Revision>,
    ) -> Result<Document> {
        if &resolved.id != id {
            return Err(Error::InvalidInput(format!(
                "resolution for {} applied to {id}",
                resolved.id
            )));
        }
        let revision = resolved.require_revision()?.clone();

        let tx = self.conn.unchecked_transaction()?;
        let current = self.find(id)?;
        let found = current.as_ref().and_then(|doc| doc.revision.clone());
        if found.as_ref() != expected_prior {
            return Err(Error::StaleResolution {
                id: *id,
                expected: expected_prior.cloned(),
                found,
            });
        }

        let mut next = resolved.clone();
        if next.origin.is_none() {
            next.origin = current
                .as_ref()
                .and_then(|doc| doc.origin.clone())
                .or_else(|| Some(revision.clone()));
        }

        let log = self.change_log();
        log.clear_document(id)?;

        if next.synced_revision.as_ref() == Some(&revision) {
            if next.deleted {
                self.conn
                    .execute("DELETE FROM documents WHERE id = ?", params![id.as_str()])?;
                tx.commit()?;
                tracing::debug!("Purged {id} after resolving to a remote tombstone");
                return Ok(next);
            }
            next.sync_status = SyncStatus::Synced;
            self.write(&next)?;
        } else {
            next.sync_status = SyncStatus::Pending;
            self.write(&next)?;
            log.append(&next, next.synced_revision.as_ref())?;
        }
        tx.commit()?;

        tracing::debug!("Applied resolution {revision} to {id} ({})", next.sync_status);
        Ok(next)
    }

    fn confirm_push(&self, entry: &ChangeEntry) -> Result<PushConfirmation> {
        let tx = self.conn.unchecked_transaction()?;
        let log = self.change_log();
        log.acknowledge(entry.id)?;

        let Some(mut current) = self.find(&entry.document_id)? else {
            tx.commit()?;
            return Ok(PushConfirmation::Missing);
        };

        let confirmation = if current.revision.as_ref() == Some(&entry.revision) {
            log.clear_document(&entry.document_id)?;
            if current.deleted {
                self.conn.execute(
                    "DELETE FROM documents WHERE id = ?",
                    params![entry.document_id.as_str()],
                )?;
                PushConfirmation::Purged
            } else {
                current.synced_revision = Some(entry.revision.clone());
                if current.sync_status != SyncStatus::Conflict {
                    current.sync_status = SyncStatus::Synced;
                }
                self.write(&current)?;
                PushConfirmation::Synced
            }
        } else {
            // Edited during the round-trip: the newer entry now builds on what the remote holds
            current.synced_revision = Some(entry.revision.clone());
            if current.sync_status == SyncStatus::Syncing {
                current.sync_status = SyncStatus::Pending;
            }
            self.write(&current)?;
            log.rebase(&entry.document_id, &entry.revision)?;
            PushConfirmation::StillPending
        };

        tx.commit()?;
        Ok(confirmation)
    }

    fn set_status(&self, id: &DocumentId, status: SyncStatus) -> Result<()> {
        let mut document = self.get(id)?;
        document.sync_status = status;
        self.write(&document)
    }

    fn transition_status(&self, from: SyncStatus, to: SyncStatus) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let ids = self
            .conn
            .prepare("SELECT id FROM documents WHERE sync_status = ?")?
            .query_map(params![from.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for id in &ids {
            let id: DocumentId = id
                .parse()
                .map_err(|_| Error::Database(format!("invalid document id '{id}'")))?;
            self.set_status(&id, to)?;
        }
        tx.commit()?;
        Ok(ids.len())
    }

    fn purge(&self, id: &DocumentId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        self.change_log().clear_document(id)?;
        let rows = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?", params![id.as_str()])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn summary(&self) -> Result<StoreSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM documents GROUP BY sync_status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary = StoreSummary {
            queued_changes: self.change_log().pending_count()?,
            ..StoreSummary::default()
        };
        for (status, count) in counts {
            let count = usize::try_from(count).unwrap_or_default();
            match status.parse::<SyncStatus>().map_err(Error::Database)? {
                SyncStatus::Pending => summary.pending = count,
                SyncStatus::Syncing => summary.syncing = count,
                SyncStatus::Synced => summary.synced = count,
                SyncStatus::Conflict => summary.conflict = count,
            }
        }
        Ok(summary)
    }
}

/// Lazy, paged walk over stored documents in insertion order.
///
/// Each call to [`RecordStore::list`] starts a fresh walk over current state.
pub struct Documents<'a> {
    conn: &'a Connection,
    filter: DocumentFilter,
    after: i64,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl Documents<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT rowid, body FROM documents
             WHERE rowid > ?1
               AND (?2 IS NULL OR kind = ?2)
               AND (?3 IS NULL OR sync_status = ?3)
               AND (?4 = 1 OR deleted = 0)
             ORDER BY rowid ASC
             LIMIT ?5",
        )?;

        let rows = stmt
            .query_map(
                params![
                    self.after,
                    self.filter.kind.map(DocumentKind::as_str),
                    self.filter.status.map(SyncStatus::as_str),
                    i32::from(self.filter.include_deleted),
                    PAGE_SIZE as i64
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if rows.len() < PAGE_SIZE {
            self.exhausted = true;
        }
        for (rowid, body) in rows {
            self.after = rowid;
            self.buffer.push_back(SqliteRecordStore::parse_body(&body)?);
        }
        Ok(())
    }
}

impl Iterator for Documents<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(error) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(error));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Customer, Geolocation};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn acme() -> Document {
        Document::new_customer(Customer::new("Acme", "Jane", "0700 000 000", "12 Kimathi St"))
    }

    #[test]
    fn test_put_and_get() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let draft = acme();
        let revision = store.put(&draft).unwrap();
        assert_eq!(revision.generation(), 1);

        let fetched = store.get(&draft.id).unwrap();
        assert_eq!(fetched.customer, draft.customer);
        assert_eq!(fetched.revision.as_ref(), Some(&revision));
        assert_eq!(fetched.origin.as_ref(), Some(&revision));
        assert_eq!(fetched.sync_status, SyncStatus::Pending);
        assert!(fetched.has_unsynced_changes());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        assert!(matches!(
            store.get(&DocumentId::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_put_rejects_invalid_customer() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let draft = Document::new_customer(Customer::new("", "Jane", "0700", "12 Kimathi St"));
        assert!(matches!(store.put(&draft), Err(Error::InvalidInput(_))));
        assert!(store.find(&draft.id).unwrap().is_none());

        let no_address = Document::new_customer(Customer::new("Acme", "Jane", "0700", " "));
        let result = store.put(&no_address);
        assert!(matches!(result, Err(Error::InvalidInput(message)) if message.contains("address")));
        assert!(store.find(&no_address.id).unwrap().is_none());
    }

    #[test]
    fn test_put_advances_generation() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.phone = "0711 111 111".to_string();
        let second = store.put(&doc).unwrap();
        assert_eq!(second.generation(), 2);

        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.address = "1 Main St".to_string();
        let third = store.put(&doc).unwrap();
        assert_eq!(third.generation(), 3);
    }

    #[test]
    fn test_stale_put_fails_with_revision_conflict() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let stale = store.get(&draft.id).unwrap();

        let mut fresh = stale.clone();
        fresh.customer.phone = "0722".to_string();
        store.put(&fresh).unwrap();

        let mut conflicting = stale;
        conflicting.customer.phone = "0733".to_string();
        match store.put(&conflicting) {
            Err(Error::RevisionConflict { current }) => {
                assert_eq!(current.customer.phone, "0722");
            }
            other => panic!("expected RevisionConflict, got {other:?}"),
        }

        // Never silently overwritten
        assert_eq!(store.get(&draft.id).unwrap().customer.phone, "0722");
    }

    #[test]
    fn test_put_with_unknown_revision_is_not_found() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let mut draft = acme();
        draft.revision = Some(Revision::initial());
        assert!(matches!(store.put(&draft), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_edits_collapse_to_single_change() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.phone = "0711".to_string();
        store.put(&doc).unwrap();
        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.address = "1 Main St".to_string();
        let latest = store.put(&doc).unwrap();

        let entries = log.entries_for(&draft.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].revision, latest);
        assert_eq!(entries[0].base_revision, None);
        assert_eq!(entries[0].snapshot.customer.address, "1 Main St");
        assert_eq!(entries[0].snapshot.customer.phone, "0711");
    }

    #[test]
    fn test_put_stamps_only_changed_fields() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let before = store.get(&draft.id).unwrap();

        let mut doc = before.clone();
        doc.customer.geolocation = Some(Geolocation::new(1.0, 2.0, 5.0, 10).unwrap());
        store.put(&doc).unwrap();
        let after = store.get(&draft.id).unwrap();

        assert_eq!(after.stamps.phone, before.stamps.phone);
        assert!(after.stamps.geolocation >= before.stamps.geolocation);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn test_list_filters_and_keeps_insertion_order() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let first = acme();
        let second = acme();
        let third = acme();
        for doc in [&first, &second, &third] {
            store.put(doc).unwrap();
        }
        store.set_status(&second.id, SyncStatus::Synced).unwrap();

        let all: Vec<DocumentId> = store
            .list(DocumentFilter::default())
            .map(|doc| doc.unwrap().id)
            .collect();
        assert_eq!(all, vec![first.id, second.id, third.id]);

        let pending: Vec<DocumentId> = store
            .list(
                DocumentFilter::default()
                    .with_kind(DocumentKind::Customer)
                    .with_status(SyncStatus::Pending),
            )
            .map(|doc| doc.unwrap().id)
            .collect();
        assert_eq!(pending, vec![first.id, third.id]);

        // Updates keep the original position
        let mut doc = store.get(&first.id).unwrap();
        doc.customer.phone = "0799".to_string();
        store.put(&doc).unwrap();
        let again: Vec<DocumentId> = store
            .list(DocumentFilter::default())
            .map(|doc| doc.unwrap().id)
            .collect();
        assert_eq!(again, all);
    }

    #[test]
    fn test_list_is_restartable_and_lazy() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        for _ in 0..(PAGE_SIZE + 5) {
            store.put(&acme()).unwrap();
        }

        let mut walk = store.list(DocumentFilter::default());
        assert!(walk.next().unwrap().is_ok());

        assert_eq!(store.list(DocumentFilter::default()).count(), PAGE_SIZE + 5);
        assert_eq!(store.list(DocumentFilter::default()).count(), PAGE_SIZE + 5);
    }

    #[test]
    fn test_delete_writes_tombstone() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        let revision = store.put(&draft).unwrap();
        let tombstone_rev = store.delete(&draft.id, &revision).unwrap();
        assert_eq!(tombstone_rev.generation(), 2);

        let tombstone = store.get(&draft.id).unwrap();
        assert!(tombstone.deleted);
        assert_eq!(store.list(DocumentFilter::default()).count(), 0);
        assert_eq!(
            store.list(DocumentFilter::default().including_deleted()).count(),
            1
        );

        let entries = log.entries_for(&draft.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].snapshot.deleted);

        // Tombstones accept no further edits
        assert!(store.put(&tombstone).is_err());
    }

    #[test]
    fn test_confirm_push_marks_synced() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let entry = log.drain(1).next().unwrap().unwrap();

        assert_eq!(store.confirm_push(&entry).unwrap(), PushConfirmation::Synced);
        let doc = store.get(&draft.id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(doc.synced_revision, doc.revision);
        assert_eq!(log.pending_count().unwrap(), 0);

        // Replayed acknowledgment is harmless
        assert_eq!(store.confirm_push(&entry).unwrap(), PushConfirmation::Synced);
    }

    #[test]
    fn test_confirm_push_after_concurrent_edit_rebases() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        store.put(&draft).unwrap();
        let in_flight = log.drain(1).next().unwrap().unwrap();

        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.phone = "0788".to_string();
        store.put(&doc).unwrap();

        assert_eq!(
            store.confirm_push(&in_flight).unwrap(),
            PushConfirmation::StillPending
        );
        let doc = store.get(&draft.id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Pending);
        let entries = log.entries_for(&draft.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].base_revision.as_ref(), Some(&in_flight.revision));
    }

    #[test]
    fn test_confirm_push_purges_tombstone() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        let revision = store.put(&draft).unwrap();
        store.delete(&draft.id, &revision).unwrap();
        let entry = log.drain(1).next().unwrap().unwrap();

        assert_eq!(store.confirm_push(&entry).unwrap(), PushConfirmation::Purged);
        assert!(store.find(&draft.id).unwrap().is_none());
    }

    #[test]
    fn test_apply_resolved_requires_expected_prior() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let draft = acme();
        let read_at = store.put(&draft).unwrap();

        // A local edit lands while the resolution is being computed
        let mut doc = store.get(&draft.id).unwrap();
        doc.customer.phone = "0755".to_string();
        store.put(&doc).unwrap();

        let mut resolved = store.get(&draft.id).unwrap();
        resolved.revision = Some(read_at.next().next());
        let error = store
            .apply_resolved(&draft.id, &resolved, Some(&read_at))
            .unwrap_err();
        assert!(error.is_stale_resolution());
        assert_eq!(store.get(&draft.id).unwrap().customer.phone, "0755");
    }

    #[test]
    fn test_apply_resolved_remote_revision_is_synced() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        let local = store.put(&draft).unwrap();

        let mut remote = store.get(&draft.id).unwrap();
        let remote_rev = local.next();
        remote.revision = Some(remote_rev.clone());
        remote.synced_revision = Some(remote_rev.clone());
        remote.customer.phone = "0766".to_string();

        let applied = store
            .apply_resolved(&draft.id, &remote, Some(&local))
            .unwrap();
        assert_eq!(applied.sync_status, SyncStatus::Synced);
        assert_eq!(log.pending_count().unwrap(), 0);
        assert_eq!(store.get(&draft.id).unwrap().revision, Some(remote_rev));
    }

    #[test]
    fn test_apply_resolved_merge_queues_push() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let log = SqliteChangeLog::new(db.connection());

        let draft = acme();
        let local = store.put(&draft).unwrap();
        let remote_rev = local.next();

        let mut merged = store.get(&draft.id).unwrap();
        merged.revision = Some(Revision::merge(&local, &remote_rev));
        merged.synced_revision = Some(remote_rev.clone());

        let applied = store
            .apply_resolved(&draft.id, &merged, Some(&local))
            .unwrap();
        assert_eq!(applied.sync_status, SyncStatus::Pending);

        let entries = log.entries_for(&draft.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].revision, merged.revision.unwrap());
        assert_eq!(entries[0].base_revision, Some(remote_rev));
    }

    #[test]
    fn test_apply_resolved_inserts_absent_document() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let mut remote = acme();
        let rev = Revision::initial();
        remote.revision = Some(rev.clone());
        remote.synced_revision = Some(rev.clone());

        store.apply_resolved(&remote.id, &remote, None).unwrap();
        let stored = store.get(&remote.id).unwrap();
        assert_eq!(stored.origin, Some(rev));
        assert_eq!(stored.sync_status, SyncStatus::Synced);

        // Expecting absence fails once the document exists
        assert!(store
            .apply_resolved(&remote.id, &remote, None)
            .unwrap_err()
            .is_stale_resolution());
    }

    #[test]
    fn test_transition_status_and_summary() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let a = acme();
        let b = acme();
        store.put(&a).unwrap();
        store.put(&b).unwrap();
        store.set_status(&a.id, SyncStatus::Syncing).unwrap();

        let summary = store.summary().unwrap();
        assert_eq!(summary.syncing, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.queued_changes, 2);

        assert_eq!(
            store
                .transition_status(SyncStatus::Syncing, SyncStatus::Pending)
                .unwrap(),
            1
        );
        assert_eq!(store.summary().unwrap().pending, 2);
    }

    #[test]
    fn test_purge_removes_document_and_changes() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());
        let draft = acme();
        store.put(&draft).unwrap();

        assert!(store.purge(&draft.id).unwrap());
        assert!(!store.purge(&draft.id).unwrap());
        assert_eq!(store.summary().unwrap(), StoreSummary::default());
    }
}
