//! Shared store service used by the sync engine and clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::{
    ChangeLog, ConflictLog, Database, DocumentFilter, PushConfirmation, RecordStore,
    SqliteChangeLog, SqliteConflictLog, SqliteRecordStore, SqliteSyncState, StoreSummary,
    SyncState,
};
use crate::models::{
    ChangeEntry, ConflictStrategy, Customer, Document, DocumentId, Revision, SyncConflict,
    SyncStatus,
};
use crate::{Error, Result};

/// Manual decision for an identity conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityResolution {
    /// Discard the local document and adopt the remote one
    KeepRemote,
    /// Keep the local document under a fresh id and adopt the remote one
    KeepBoth,
}

/// Result of resolving an identity conflict.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityOutcome {
    /// The remote document, now stored under the contested id
    pub adopted: Document,
    /// New id of the local copy when it was kept
    pub relocated: Option<DocumentId>,
}

/// Thread-safe service for store, change log and sync bookkeeping.
///
/// All access goes through one connection behind a single async mutex.
#[derive(Clone)]
pub struct StoreService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl StoreService {
    /// Open a store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        tracing::debug!("Opened registry database at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Save a local edit; returns the new revision.
    pub async fn put(&self, document: &Document) -> Result<Revision> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).put(document)
    }

    /// Save a new customer and return the stored document.
    pub async fn create(&self, customer: Customer) -> Result<Document> {
        let draft = Document::new_customer(customer);
        let db = self.db.lock().await;
        let store = SqliteRecordStore::new(db.connection());
        store.put(&draft)?;
        store.get(&draft.id)
    }

    /// Tombstone a document at `revision`.
    pub async fn delete(&self, id: &DocumentId, revision: &Revision) -> Result<Revision> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).delete(id, revision)
    }

    pub async fn get(&self, id: &DocumentId) -> Result<Document> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).get(id)
    }

    pub async fn find(&self, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).find(id)
    }

    /// Collect the documents matching `filter` in insertion order.
    pub async fn list(&self, filter: DocumentFilter) -> Result<Vec<Document>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).list(filter).collect()
    }

    /// Write a resolution computed by the sync engine.
    pub async fn apply_resolved(
        &self,
        id: &DocumentId,
        resolved: &Document,
        expected_prior: Option<&Revision>,
    ) -> Result<Document> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).apply_resolved(id, resolved, expected_prior)
    }

    /// Snapshot of the oldest pushable change log entries.
    pub async fn drain(&self, limit: usize) -> Result<Vec<ChangeEntry>> {
        let db = self.db.lock().await;
        SqliteChangeLog::new(db.connection()).drain(limit).collect()
    }

    /// Flag documents whose entries are about to be pushed.
    pub async fn mark_syncing(&self, entries: &[ChangeEntry]) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let store = SqliteRecordStore::new(conn);
        let tx = conn.unchecked_transaction()?;
        for entry in entries {
            if let Some(document) = store.find(&entry.document_id)? {
                if document.sync_status == SyncStatus::Pending {
                    store.set_status(&entry.document_id, SyncStatus::Syncing)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Return documents stuck in `syncing` to `pending`.
    pub async fn reset_syncing(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection())
            .transition_status(SyncStatus::Syncing, SyncStatus::Pending)
    }

    /// Record a remote acknowledgment of `entry`.
    pub async fn confirm_push(&self, entry: &ChangeEntry) -> Result<PushConfirmation> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).confirm_push(entry)
    }

    /// Record an automatic field-level merge in the conflict ledger.
    pub async fn record_merge(&self, local: &Revision, remote: &Document) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteConflictLog::new(db.connection()).record(
            &remote.id,
            local,
            remote,
            ConflictStrategy::FieldLww,
        )
    }

    /// Flag an identity conflict and keep the remote copy for a later decision.
    pub async fn mark_identity_conflict(&self, local: &Revision, remote: &Document) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let tx = conn.unchecked_transaction()?;
        let ledger = SqliteConflictLog::new(conn);
        ledger.mark_resolved(&remote.id)?;
        ledger.record(&remote.id, local, remote, ConflictStrategy::Identity)?;
        SqliteRecordStore::new(conn).set_status(&remote.id, SyncStatus::Conflict)?;
        tx.commit()?;
        Ok(())
    }

    /// Keep the latest remote copy for a document parked in identity conflict.
    pub async fn refresh_identity_conflict(&self, remote: &Document) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteConflictLog::new(db.connection()).refresh_remote(remote)
    }

    /// Settle an identity conflict with a manual decision.
    pub async fn resolve_identity_conflict(
        &self,
        id: &DocumentId,
        choice: IdentityResolution,
    ) -> Result<IdentityOutcome> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let store = SqliteRecordStore::new(conn);
        let ledger = SqliteConflictLog::new(conn);

        let local = store.get(id)?;
        if local.sync_status != SyncStatus::Conflict {
            return Err(Error::InvalidInput(format!(
                "document {id} has no identity conflict"
            )));
        }
        let snapshot = ledger
            .unresolved_for(id)?
            .and_then(|conflict| conflict.remote_snapshot)
            .ok_or_else(|| {
                Error::Database(format!("identity conflict on {id} has no remote copy"))
            })?;
        let mut remote: Document = serde_json::from_str(&snapshot)?;
        remote.synced_revision.clone_from(&remote.revision);

        let relocated = match choice {
            IdentityResolution::KeepRemote => None,
            IdentityResolution::KeepBoth => {
                let copy = Document::new_customer(local.customer.clone());
                store.put(&copy)?;
                Some(copy.id)
            }
        };

        let adopted = store.apply_resolved(id, &remote, local.revision.as_ref())?;
        ledger.mark_resolved(id)?;
        tracing::info!("Resolved identity conflict on {id} with {choice:?}");

        Ok(IdentityOutcome { adopted, relocated })
    }

    pub async fn summary(&self) -> Result<StoreSummary> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).summary()
    }

    /// Most recent conflict ledger rows.
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictLog::new(db.connection()).list(limit)
    }

    /// Change log entries of one document.
    pub async fn changes_for(&self, id: &DocumentId) -> Result<Vec<ChangeEntry>> {
        let db = self.db.lock().await;
        SqliteChangeLog::new(db.connection()).entries_for(id)
    }

    pub async fn cursor(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        SqliteSyncState::new(db.connection()).cursor()
    }

    pub async fn set_cursor(&self, cursor: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncState::new(db.connection()).set_cursor(cursor)
    }
}
