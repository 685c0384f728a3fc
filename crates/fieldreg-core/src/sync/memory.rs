//! In-process remote store.
//!
//! Used by tests and by the CLI's file-backed loopback remote. Pushes are
//! idempotent per key and every accepted write advances a sequence number
//! that serves as the pull cursor.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::remote::{PullResponse, PushEntry, PushOutcome, RemoteEndpoint, RemoteError};
use crate::models::{Document, DocumentId, Revision, SyncStatus};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RemoteState {
    seq: u64,
    documents: BTreeMap<String, StoredDocument>,
    /// Idempotency key to the revision it produced
    applied: BTreeMap<String, Revision>,
    #[serde(skip)]
    received: Vec<String>,
    #[serde(skip)]
    accept_budget: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    seq: u64,
    document: Document,
}

impl RemoteState {
    fn store(&mut self, mut document: Document) -> Revision {
        self.seq += 1;
        document.sync_status = SyncStatus::Synced;
        document.synced_revision.clone_from(&document.revision);
        let revision = document.revision.clone().unwrap_or_else(Revision::initial);
        self.documents.insert(
            document.id.as_str(),
            StoredDocument {
                seq: self.seq,
                document,
            },
        );
        revision
    }

    fn apply(&mut self, entry: PushEntry) -> PushOutcome {
        self.received.push(entry.idempotency_key.clone());
        if let Some(revision) = self.applied.get(&entry.idempotency_key) {
            return PushOutcome::Accepted {
                revision: revision.clone(),
            };
        }

        let key = entry.document.id.as_str();
        if let Some(stored) = self.documents.get(&key) {
            let current = &stored.document;
            if current.revision != entry.base_revision && current.revision != entry.document.revision {
                return PushOutcome::Conflict(Box::new(current.clone()));
            }
        }

        let revision = self.store(entry.document);
        self.applied.insert(entry.idempotency_key, revision.clone());
        PushOutcome::Accepted { revision }
    }
}

/// Remote store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    offline: AtomicBool,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a remote saved with [`MemoryRemote::save`]; a missing file is empty.
    pub fn load(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)?;
        let state: RemoteState = serde_json::from_str(&raw)?;
        Ok(Self {
            state: Mutex::new(state),
            offline: AtomicBool::new(false),
        })
    }

    /// Write the remote state next to `path` and rename it into place.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(&*self.lock())?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Process `entries` more pushed entries, then drop offline mid-request.
    pub fn disconnect_after(&self, entries: usize) {
        self.lock().accept_budget = Some(entries);
    }

    /// Write a document directly, as another replica would.
    pub fn write(&self, document: Document) -> Revision {
        self.lock().store(document)
    }

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.lock()
            .documents
            .get(&id.as_str())
            .map(|stored| stored.document.clone())
    }

    pub fn documents(&self) -> Vec<Document> {
        let state = self.lock();
        let mut stored: Vec<&StoredDocument> = state.documents.values().collect();
        stored.sort_by_key(|stored| stored.seq);
        stored.into_iter().map(|stored| stored.document.clone()).collect()
    }

    /// Idempotency keys processed since this remote was created, replays included.
    pub fn received_keys(&self) -> Vec<String> {
        self.lock().received.clone()
    }

    /// Number of distinct changes applied.
    pub fn applied_count(&self) -> usize {
        self.lock().applied.len()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RemoteEndpoint for MemoryRemote {
    async fn push(&self, entries: Vec<PushEntry>) -> Result<Vec<PushOutcome>, RemoteError> {
        if !self.is_online() {
            return Err(RemoteError::Disconnected);
        }

        let mut state = self.lock();
        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            if state.accept_budget == Some(0) {
                state.accept_budget = None;
                self.set_online(false);
                tracing::debug!("Memory remote dropped after {} entries", outcomes.len());
                break;
            }
            outcomes.push(state.apply(entry));
            if let Some(budget) = state.accept_budget.as_mut() {
                *budget -= 1;
            }
        }
        Ok(outcomes)
    }

    async fn pull(&self, since: Option<String>) -> Result<PullResponse, RemoteError> {
        if !self.is_online() {
            return Err(RemoteError::Disconnected);
        }

        let since = since
            .as_deref()
            .map(str::parse::<u64>)
            .transpose()
            .map_err(|_| RemoteError::Rejected(format!("invalid cursor {since:?}")))?
            .unwrap_or(0);

        let state = self.lock();
        let mut changed: Vec<&StoredDocument> = state
            .documents
            .values()
            .filter(|stored| stored.seq > since)
            .collect();
        changed.sort_by_key(|stored| stored.seq);

        Ok(PullResponse {
            documents: changed
                .into_iter()
                .map(|stored| stored.document.clone())
                .collect(),
            next_cursor: Some(state.seq.to_string()),
        })
    }
}
