//! End-to-end sync cycles between a local store and an in-memory remote.

use std::sync::{Arc, Mutex};

use fieldreg_core::config::SyncSettings;
use fieldreg_core::conflict::{ConflictResolver, FieldMergeResolver, Resolution};
use fieldreg_core::db::{Database, RecordStore, SqliteRecordStore};
use fieldreg_core::models::{ConflictStrategy, CustomerField, Revision};
use fieldreg_core::services::{IdentityResolution, StoreService};
use fieldreg_core::sync::{
    AbortReason, CycleOutcome, MemoryRemote, PullResponse, PushEntry, PushOutcome,
    RemoteEndpoint, RemoteError, SyncEngine,
};
use fieldreg_core::{Customer, Document, DocumentId, SyncStatus};
use pretty_assertions::assert_eq;
use tokio::sync::watch;

fn acme() -> Customer {
    Customer::new("Acme", "Jane", "0700 000 000", "12 Kimathi St")
}

fn engine<R: RemoteEndpoint>(
    store: &StoreService,
    remote: R,
    online: bool,
) -> (watch::Sender<bool>, SyncEngine<R>) {
    let (signal, connectivity) = watch::channel(online);
    let engine = SyncEngine::new(store.clone(), remote, connectivity, SyncSettings::default());
    (signal, engine)
}

async fn edit(store: &StoreService, id: &DocumentId, change: impl FnOnce(&mut Customer)) {
    let mut doc = store.get(id).await.unwrap();
    change(&mut doc.customer);
    store.put(&doc).await.unwrap();
}

/// Write a remote-side edit of `id` stamped well after any local edit.
fn remote_edit(remote: &MemoryRemote, id: &DocumentId, change: impl FnOnce(&mut Customer)) {
    let mut doc = remote.get(id).unwrap();
    let later = doc.updated_at + 60_000;
    change(&mut doc.customer);
    doc.revision = Some(doc.revision.as_ref().unwrap().next());
    doc.stamps.set(CustomerField::Phone, later);
    doc.updated_at = later;
    remote.write(doc);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_edits_collapse_into_one_push() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (online, engine) = engine(&store, Arc::clone(&remote), false);

    let doc = store.create(acme()).await.unwrap();
    edit(&store, &doc.id, |c| c.phone = "0711 111 111".to_string()).await;
    edit(&store, &doc.id, |c| c.address = "1 Market St".to_string()).await;
    assert_eq!(store.changes_for(&doc.id).await.unwrap().len(), 1);

    let offline = engine.sync_now().await.unwrap();
    assert_eq!(offline.outcome, CycleOutcome::Aborted(AbortReason::Offline));

    online.send_replace(true);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.acknowledged, 1);

    let local = store.get(&doc.id).await.unwrap();
    let held = remote.get(&doc.id).unwrap();
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(held.revision, local.revision);
    assert_eq!(held.customer.phone, "0711 111 111");
    assert_eq!(held.customer.address, "1 Market St");
    assert_eq!(remote.applied_count(), 1);
    assert_eq!(store.summary().await.unwrap().queued_changes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_field_edits_merge() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);

    let doc = store.create(acme()).await.unwrap();
    engine.sync_now().await.unwrap();
    let base = store.get(&doc.id).await.unwrap().revision.unwrap();

    edit(&store, &doc.id, |c| c.address = "2 Harbour Rd".to_string()).await;
    remote_edit(&remote, &doc.id, |c| c.phone = "0722 222 222".to_string());

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.merged, 1);
    assert_eq!(report.cycles, 2);

    let local = store.get(&doc.id).await.unwrap();
    assert_eq!(local.customer.phone, "0722 222 222");
    assert_eq!(local.customer.address, "2 Harbour Rd");
    assert_eq!(local.revision.as_ref().unwrap().generation(), base.generation() + 2);
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(remote.get(&doc.id).unwrap().customer, local.customer);

    let ledger = store.conflicts(10).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].strategy, ConflictStrategy::FieldLww);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_connection_leaves_only_unacknowledged_entry() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);

    let mut ids = Vec::new();
    for name in ["Acme", "Birch & Co", "Cobalt"] {
        let customer = Customer::new(name, "Jane", "0700", "12 Kimathi St");
        ids.push(store.create(customer).await.unwrap().id);
    }
    remote.disconnect_after(2);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Aborted(AbortReason::Interrupted {
            processed: 2,
            sent: 3
        })
    );
    assert_eq!(report.acknowledged, 2);
    assert_eq!(engine.phase(), fieldreg_core::sync::SyncPhase::Idle);

    let remaining = store.drain(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].document_id, ids[2]);
    let pending_key = remaining[0].idempotency_key();

    remote.set_online(true);
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.outcome, CycleOutcome::Completed);

    let received = remote.received_keys();
    assert_eq!(received.len(), 3);
    assert_eq!(received.last(), Some(&pending_key));
    for id in &ids {
        assert_eq!(store.get(id).await.unwrap().sync_status, SyncStatus::Synced);
    }
}

/// Applies pushes but loses the first response.
struct LostAckRemote {
    inner: Arc<MemoryRemote>,
    lose_next: Mutex<bool>,
}

impl RemoteEndpoint for LostAckRemote {
    async fn push(&self, entries: Vec<PushEntry>) -> Result<Vec<PushOutcome>, RemoteError> {
        let outcomes = self.inner.push(entries).await?;
        let lose = std::mem::replace(&mut *self.lose_next.lock().unwrap(), false);
        if lose {
            return Err(RemoteError::Disconnected);
        }
        Ok(outcomes)
    }

    async fn pull(&self, since: Option<String>) -> Result<PullResponse, RemoteError> {
        self.inner.pull(since).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn replayed_entry_does_not_change_remote() {
    let store = StoreService::open_in_memory().await.unwrap();
    let inner = Arc::new(MemoryRemote::new());
    let lossy = LostAckRemote {
        inner: Arc::clone(&inner),
        lose_next: Mutex::new(true),
    };
    let (_online, engine) = engine(&store, lossy, true);
    let doc = store.create(acme()).await.unwrap();

    let first = engine.sync_now().await.unwrap();
    assert_eq!(first.outcome, CycleOutcome::Aborted(AbortReason::Offline));
    assert_eq!(store.get(&doc.id).await.unwrap().sync_status, SyncStatus::Pending);
    let after_first = inner.documents();

    let second = engine.sync_now().await.unwrap();
    assert_eq!(second.acknowledged, 1);
    assert_eq!(inner.documents(), after_first);
    assert_eq!(inner.applied_count(), 1);

    let keys = inner.received_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], keys[1]);
    assert_eq!(store.get(&doc.id).await.unwrap().sync_status, SyncStatus::Synced);
}

/// Edits the local document through a second connection while resolving,
/// the way a user edit can land between a resolver read and its write.
struct EditDuringResolve {
    db: Mutex<Option<Database>>,
}

impl ConflictResolver for EditDuringResolve {
    fn resolve(&self, local: &Document, remote: &Document) -> fieldreg_core::Result<Resolution> {
        if let Some(db) = self.db.lock().unwrap().take() {
            let mut edited = local.clone();
            edited.customer.email = Some("jane@acme.test".to_string());
            SqliteRecordStore::new(db.connection()).put(&edited)?;
        }
        FieldMergeResolver.resolve(local, remote)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_resolution_is_requeued_and_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("fieldreg.db");
    let store = StoreService::open_path(&path).await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (signal, connectivity) = watch::channel(true);
    let engine = SyncEngine::new(
        store.clone(),
        Arc::clone(&remote),
        connectivity,
        SyncSettings::default(),
    )
    .with_resolver(EditDuringResolve {
        db: Mutex::new(Some(Database::open(&path).unwrap())),
    });

    let doc = store.create(acme()).await.unwrap();
    engine.sync_now().await.unwrap();
    let cursor = store.cursor().await.unwrap();

    edit(&store, &doc.id, |c| c.address = "2 Harbour Rd".to_string()).await;
    remote_edit(&remote, &doc.id, |c| c.phone = "0722 222 222".to_string());

    let first = engine.sync_now().await.unwrap();
    assert_eq!(first.requeued, 1);
    assert_eq!(first.merged, 0);
    assert_eq!(engine.requeued_count(), 1);
    assert_eq!(store.cursor().await.unwrap(), cursor);

    let second = engine.sync_now().await.unwrap();
    assert_eq!(second.merged, 1);
    assert_eq!(engine.requeued_count(), 0);

    let local = store.get(&doc.id).await.unwrap();
    assert_eq!(local.customer.email.as_deref(), Some("jane@acme.test"));
    assert_eq!(local.customer.address, "2 Harbour Rd");
    assert_eq!(local.customer.phone, "0722 222 222");
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(remote.get(&doc.id).unwrap().customer, local.customer);
    assert_ne!(store.cursor().await.unwrap(), cursor);
    drop(signal);
}

#[tokio::test(flavor = "multi_thread")]
async fn independent_creation_is_an_identity_conflict() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);

    let local = store.create(acme()).await.unwrap();
    let mut foreign =
        Document::new_customer(Customer::new("Other Ltd", "Omar", "0799", "12 Kimathi St"));
    foreign.id = local.id;
    let origin = Revision::initial();
    foreign.revision = Some(origin.clone());
    foreign.origin = Some(origin);
    remote.write(foreign);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.identity_conflicts, 1);
    assert_eq!(report.merged, 0);
    assert_eq!(store.get(&local.id).await.unwrap().sync_status, SyncStatus::Conflict);
    assert_eq!(remote.get(&local.id).unwrap().customer.business_name, "Other Ltd");

    // Parked until a decision is made
    let idle = engine.sync_now().await.unwrap();
    assert_eq!(idle.pushed, 0);
    assert_eq!(idle.identity_conflicts, 0);

    let outcome = store
        .resolve_identity_conflict(&local.id, IdentityResolution::KeepBoth)
        .await
        .unwrap();
    let relocated = outcome.relocated.unwrap();
    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.acknowledged, 1);
    assert_eq!(remote.get(&relocated).unwrap().customer.business_name, "Acme");
    assert_eq!(store.get(&local.id).await.unwrap().customer.business_name, "Other Ltd");
    assert_eq!(store.get(&local.id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn identity_decision_uses_latest_remote_copy() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);

    let local = store.create(acme()).await.unwrap();
    let mut foreign =
        Document::new_customer(Customer::new("Other Ltd", "Omar", "0799", "3 Dock Rd"));
    foreign.id = local.id;
    let origin = Revision::initial();
    foreign.revision = Some(origin.clone());
    foreign.origin = Some(origin);
    remote.write(foreign);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.identity_conflicts, 1);

    // The other replica keeps editing while the conflict waits for a decision
    let mut newer = remote.get(&local.id).unwrap();
    newer.customer.business_name = "Other Ltd v2".to_string();
    newer.revision = Some(newer.revision.as_ref().unwrap().next());
    remote.write(newer);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.pulled, 1);
    assert_eq!(store.get(&local.id).await.unwrap().sync_status, SyncStatus::Conflict);
    let held = remote.get(&local.id).unwrap();
    let open = store.conflicts(1).await.unwrap().remove(0);
    assert!(!open.is_resolved());
    assert_eq!(open.remote_revision, held.revision.as_ref().unwrap().to_string());

    store
        .resolve_identity_conflict(&local.id, IdentityResolution::KeepRemote)
        .await
        .unwrap();
    engine.sync_now().await.unwrap();

    let adopted = store.get(&local.id).await.unwrap();
    assert_eq!(adopted.customer.business_name, "Other Ltd v2");
    assert_eq!(adopted.revision, held.revision);
    assert_eq!(adopted.sync_status, SyncStatus::Synced);
}

/// Fails its first `failures` resolutions, then merges normally.
struct FlakyResolver {
    failures: Mutex<usize>,
}

impl ConflictResolver for FlakyResolver {
    fn resolve(&self, local: &Document, remote: &Document) -> fieldreg_core::Result<Resolution> {
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(fieldreg_core::Error::Database("resolver unavailable".to_string()));
        }
        FieldMergeResolver.resolve(local, remote)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_document_keeps_pull_cursor() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, connectivity) = watch::channel(true);
    let engine = SyncEngine::new(
        store.clone(),
        Arc::clone(&remote),
        connectivity,
        SyncSettings::default(),
    )
    .with_resolver(FlakyResolver {
        failures: Mutex::new(2),
    });

    let doc = store.create(acme()).await.unwrap();
    engine.sync_now().await.unwrap();
    let cursor = store.cursor().await.unwrap();
    assert!(cursor.is_some());

    edit(&store, &doc.id, |c| c.address = "2 Harbour Rd".to_string()).await;
    remote_edit(&remote, &doc.id, |c| c.phone = "0722 222 222".to_string());

    let failed = engine.sync_now().await.unwrap();
    assert_eq!(failed.failed, 2);
    assert_eq!(failed.merged, 0);
    assert_eq!(store.cursor().await.unwrap(), cursor);
    assert_eq!(store.summary().await.unwrap().queued_changes, 1);

    let retried = engine.sync_now().await.unwrap();
    assert_eq!(retried.failed, 0);
    assert_eq!(retried.merged, 1);
    assert_ne!(store.cursor().await.unwrap(), cursor);

    let local = store.get(&doc.id).await.unwrap();
    assert_eq!(local.customer.phone, "0722 222 222");
    assert_eq!(local.customer.address, "2 Harbour Rd");
    assert_eq!(local.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_changes_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("fieldreg.db");
    let remote = Arc::new(MemoryRemote::new());

    let id = {
        let store = StoreService::open_path(&path).await.unwrap();
        let doc = store.create(acme()).await.unwrap();
        edit(&store, &doc.id, |c| c.phone = "0733 333 333".to_string()).await;
        doc.id
    };

    let store = StoreService::open_path(&path).await.unwrap();
    assert_eq!(store.summary().await.unwrap().queued_changes, 1);
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);
    engine.sync_now().await.unwrap();

    assert_eq!(remote.get(&id).unwrap().customer.phone, "0733 333 333");
    assert_eq!(store.get(&id).await.unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_deletion_removes_synced_document() {
    let store = StoreService::open_in_memory().await.unwrap();
    let remote = Arc::new(MemoryRemote::new());
    let (_online, engine) = engine(&store, Arc::clone(&remote), true);

    let doc = store.create(acme()).await.unwrap();
    engine.sync_now().await.unwrap();

    let mut tombstone = remote.get(&doc.id).unwrap();
    tombstone.revision = Some(tombstone.revision.as_ref().unwrap().next());
    tombstone.deleted = true;
    tombstone.stamps.deleted = tombstone.updated_at + 1;
    remote.write(tombstone);

    let report = engine.sync_now().await.unwrap();
    assert_eq!(report.adopted, 1);
    assert!(store.find(&doc.id).await.unwrap().is_none());
}
