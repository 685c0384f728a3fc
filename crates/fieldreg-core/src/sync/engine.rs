//! Push, pull and reconcile cycles against a remote endpoint.
//!
//! One cycle walks `Connecting -> Pushing -> Pulling -> Reconciling` and
//! returns to `Idle`. Connectivity loss or a request timeout at any step ends
//! the cycle early; everything acknowledged before that point stays
//! acknowledged and the rest is retried on the next trigger.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::Serialize;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;

use super::remote::{PushEntry, PushOutcome, RemoteEndpoint, RemoteError};
use crate::config::SyncSettings;
use crate::conflict::{ConflictResolver, FieldMergeResolver, Resolution};
use crate::models::{Document, DocumentId, Revision, SyncStatus};
use crate::services::StoreService;
use crate::util::compact_text;
use crate::{Error, Result};

/// Step of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Connecting,
    Pushing,
    Pulling,
    Reconciling,
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
            Self::Reconciling => "reconciling",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle stopped before finishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    Offline,
    Timeout,
    /// The remote answered only part of a push request
    Interrupted { processed: usize, sent: usize },
    Remote { message: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("connectivity lost"),
            Self::Timeout => f.write_str("remote request timed out"),
            Self::Interrupted { processed, sent } => {
                write!(f, "remote processed {processed} of {sent} pushed entries")
            }
            Self::Remote { message } => write!(f, "remote error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The cycle ran to the end and moved data
    Completed,
    /// The cycle ran to the end with nothing to push or pull
    #[default]
    NothingToSync,
    Aborted(AbortReason),
    /// Another cycle was running; this request was folded into it
    Coalesced,
}

/// Counters for one sync request, possibly spanning several cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub cycles: usize,
    pub pushed: usize,
    pub acknowledged: usize,
    pub pulled: usize,
    pub adopted: usize,
    pub merged: usize,
    pub identity_conflicts: usize,
    pub requeued: usize,
    pub failed: usize,
}

impl CycleReport {
    fn coalesced() -> Self {
        Self {
            outcome: CycleOutcome::Coalesced,
            ..Self::default()
        }
    }

    pub const fn is_aborted(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Aborted(_))
    }

    const fn has_activity(&self) -> bool {
        self.acknowledged + self.adopted + self.merged + self.identity_conflicts > 0
    }

    fn absorb(&mut self, next: Self) {
        self.outcome = match (&self.outcome, next.outcome) {
            (_, aborted @ CycleOutcome::Aborted(_)) => aborted,
            (CycleOutcome::Completed, _) => CycleOutcome::Completed,
            (_, other) => other,
        };
        self.cycles += next.cycles;
        self.pushed += next.pushed;
        self.acknowledged += next.acknowledged;
        self.pulled += next.pulled;
        self.adopted += next.adopted;
        self.merged += next.merged;
        self.identity_conflicts += next.identity_conflicts;
        self.requeued += next.requeued;
        self.failed += next.failed;
    }
}

/// What reconciling one remote document did locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Unchanged,
    Adopted,
    Merged,
    IdentityConflict,
}

/// Reasons a cycle stops early.
enum Interrupt {
    Abort(AbortReason),
    Store(Error),
}

impl From<Error> for Interrupt {
    fn from(error: Error) -> Self {
        Self::Store(error)
    }
}

/// Drives sync cycles between a [`StoreService`] and a remote.
pub struct SyncEngine<R> {
    store: StoreService,
    remote: R,
    resolver: Arc<dyn ConflictResolver>,
    settings: SyncSettings,
    connectivity: watch::Receiver<bool>,
    phase: watch::Sender<SyncPhase>,
    cycle: Mutex<()>,
    rerun: AtomicBool,
    trigger: Notify,
    /// Remote copies whose resolution went stale, retried first next cycle
    requeued: StdMutex<BTreeMap<DocumentId, Document>>,
}

impl<R: RemoteEndpoint> SyncEngine<R> {
    pub fn new(
        store: StoreService,
        remote: R,
        connectivity: watch::Receiver<bool>,
        settings: SyncSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            remote,
            resolver: Arc::new(FieldMergeResolver),
            settings,
            connectivity,
            phase,
            cycle: Mutex::new(()),
            rerun: AtomicBool::new(false),
            trigger: Notify::new(),
            requeued: StdMutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub const fn store(&self) -> &StoreService {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Documents waiting to be reconciled again.
    pub fn requeued_count(&self) -> usize {
        self.requeued_lock().len()
    }

    /// Ask the background loop for a cycle.
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    /// Run a cycle now.
    ///
    /// While another cycle is running the call returns `Coalesced` at once and
    /// the running cycle is followed by one more.
    pub async fn sync_now(&self) -> Result<CycleReport> {
        let mut guard = if let Ok(guard) = self.cycle.try_lock() {
            guard
        } else {
            self.rerun.store(true, Ordering::SeqCst);
            // The running cycle may have released the lock before seeing the flag
            let Ok(guard) = self.cycle.try_lock() else {
                tracing::debug!("Sync cycle already running; request coalesced");
                return Ok(CycleReport::coalesced());
            };
            guard
        };

        self.rerun.store(false, Ordering::SeqCst);
        let mut report = self.run_cycle().await?;
        loop {
            while !report.is_aborted() && self.rerun.swap(false, Ordering::SeqCst) {
                tracing::debug!("Running follow-up sync cycle");
                let next = self.run_cycle().await?;
                report.absorb(next);
            }
            drop(guard);

            // A request can land between the last check and the unlock
            if report.is_aborted() || !self.rerun.load(Ordering::SeqCst) {
                return Ok(report);
            }
            match self.cycle.try_lock() {
                Ok(next) => guard = next,
                Err(_) => return Ok(report),
            }
        }
    }

    /// Background trigger loop.
    ///
    /// Starts a cycle when connectivity goes from offline to online, on every
    /// interval tick while online, and on [`SyncEngine::request_sync`]. Stops
    /// when `shutdown` turns true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.connectivity.clone();
        let mut online = *connectivity.borrow_and_update();
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        tracing::info!("Sync engine started (online: {online})");
        if online {
            self.request_sync();
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Connectivity signal closed");
                        break;
                    }
                    let now_online = *connectivity.borrow_and_update();
                    let came_online = now_online && !online;
                    online = now_online;
                    if !came_online {
                        continue;
                    }
                    tracing::info!("Connectivity restored; starting sync");
                }
                _ = ticker.tick() => {
                    if !online {
                        continue;
                    }
                }
                () = self.trigger.notified() => {}
            }

            match self.sync_now().await {
                Ok(report) => tracing::debug!("Sync request finished: {:?}", report.outcome),
                Err(error) => tracing::error!("Sync cycle failed: {error}"),
            }
        }

        tracing::info!("Sync engine stopped");
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport {
            cycles: 1,
            ..CycleReport::default()
        };
        let result = self.cycle_steps(&mut report).await;
        self.set_phase(SyncPhase::Idle);

        match result {
            Ok(()) => {
                report.outcome = if report.has_activity() {
                    CycleOutcome::Completed
                } else {
                    CycleOutcome::NothingToSync
                };
                tracing::info!(
                    "Sync cycle finished: pushed {}, acknowledged {}, pulled {}, merged {}, identity conflicts {}, requeued {}",
                    report.pushed,
                    report.acknowledged,
                    report.pulled,
                    report.merged,
                    report.identity_conflicts,
                    report.requeued
                );
            }
            Err(Interrupt::Abort(reason)) => {
                tracing::warn!("Sync cycle aborted: {reason}");
                self.store.reset_syncing().await?;
                report.outcome = CycleOutcome::Aborted(reason);
            }
            Err(Interrupt::Store(error)) => {
                // Best effort; the next cycle resets leftovers again
                if let Err(reset) = self.store.reset_syncing().await {
                    tracing::warn!("Failed to reset syncing documents: {reset}");
                }
                return Err(error);
            }
        }
        Ok(report)
    }

    async fn cycle_steps(&self, report: &mut CycleReport) -> std::result::Result<(), Interrupt> {
        self.set_phase(SyncPhase::Connecting);
        if !*self.connectivity.borrow() {
            return Err(Interrupt::Abort(AbortReason::Offline));
        }
        let reset = self.store.reset_syncing().await?;
        if reset > 0 {
            tracing::debug!("Reset {reset} interrupted document(s) to pending");
        }

        let retry = self.take_requeued();
        if !retry.is_empty() {
            self.set_phase(SyncPhase::Reconciling);
            tracing::debug!("Retrying {} requeued document(s)", retry.len());
            for remote in retry {
                self.reconcile(remote, report).await;
            }
        }

        self.set_phase(SyncPhase::Pushing);
        let conflicts = self.push_pending(report).await?;

        self.set_phase(SyncPhase::Pulling);
        let cursor = self.store.cursor().await?;
        let pulled = self.remote_call(self.remote.pull(cursor)).await?;
        report.pulled += pulled.documents.len();

        self.set_phase(SyncPhase::Reconciling);
        for remote in conflicts.into_iter().chain(pulled.documents) {
            self.reconcile(remote, report).await;
        }
        self.store.reset_syncing().await?;

        if self.requeued_count() > 0 || report.failed > 0 {
            tracing::debug!("Keeping pull cursor until every pulled document settles");
        } else if let Some(next) = pulled.next_cursor {
            self.store.set_cursor(&next).await?;
        }

        if report.merged > 0 {
            // Merge results still have to be pushed
            self.rerun.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Push one drained batch; returns remote copies that conflicted.
    async fn push_pending(
        &self,
        report: &mut CycleReport,
    ) -> std::result::Result<Vec<Document>, Interrupt> {
        let batch = self.store.drain(self.settings.batch_size).await?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.store.mark_syncing(&batch).await?;

        let mut conflicts = Vec::new();
        for chunk in batch.chunks(self.settings.push_chunk_size) {
            let request: Vec<PushEntry> = chunk.iter().map(PushEntry::from).collect();
            report.pushed += request.len();
            let outcomes = self.remote_call(self.remote.push(request)).await?;

            for (entry, outcome) in chunk.iter().zip(&outcomes) {
                match outcome {
                    PushOutcome::Accepted { revision } => {
                        let confirmation = self.store.confirm_push(entry).await?;
                        tracing::debug!(
                            "Remote accepted {} at {revision} ({confirmation:?})",
                            entry.document_id
                        );
                        report.acknowledged += 1;
                    }
                    PushOutcome::Conflict(remote) => {
                        tracing::debug!("Remote holds a diverged copy of {}", entry.document_id);
                        conflicts.push(remote.as_ref().clone());
                    }
                }
            }

            if outcomes.len() < chunk.len() {
                return Err(Interrupt::Abort(AbortReason::Interrupted {
                    processed: outcomes.len(),
                    sent: chunk.len(),
                }));
            }
        }
        Ok(conflicts)
    }

    /// Reconcile one remote document; failures stay with that document.
    async fn reconcile(&self, remote: Document, report: &mut CycleReport) {
        let id = remote.id;
        if self.requeued_lock().contains_key(&id) {
            tracing::debug!("Skipping {id} until its requeued copy is retried");
            return;
        }
        match self.reconcile_one(&remote).await {
            Ok(Reconciled::Unchanged) => {}
            Ok(Reconciled::Adopted) => report.adopted += 1,
            Ok(Reconciled::Merged) => report.merged += 1,
            Ok(Reconciled::IdentityConflict) => report.identity_conflicts += 1,
            Err(error) if error.is_stale_resolution() => {
                tracing::debug!("{error}; requeued");
                self.requeued_lock().insert(id, remote);
                report.requeued += 1;
            }
            Err(error) => {
                tracing::warn!("Failed to reconcile {id}: {error}");
                report.failed += 1;
            }
        }
    }

    async fn reconcile_one(&self, remote: &Document) -> Result<Reconciled> {
        let remote_rev = remote.require_revision()?.clone();

        let Some(local) = self.store.find(&remote.id).await? else {
            if remote.deleted {
                return Ok(Reconciled::Unchanged);
            }
            self.store
                .apply_resolved(&remote.id, &as_synced(remote, &remote_rev), None)
                .await?;
            return Ok(Reconciled::Adopted);
        };
        let local_rev = local.require_revision()?.clone();

        if local.sync_status == SyncStatus::Conflict {
            // The pending decision has to see what the remote holds now
            if self.store.refresh_identity_conflict(remote).await? {
                tracing::info!("Remote copy of {} changed while awaiting a decision", remote.id);
            }
            return Ok(Reconciled::Unchanged);
        }
        if local_rev == remote_rev {
            if local.synced_revision.as_ref() == Some(&remote_rev) {
                return Ok(Reconciled::Unchanged);
            }
            self.store
                .apply_resolved(&remote.id, &as_synced(remote, &remote_rev), Some(&local_rev))
                .await?;
            return Ok(Reconciled::Adopted);
        }
        if local.synced_revision.as_ref() == Some(&remote_rev) || local.descends_from(&remote_rev) {
            // Local is ahead; its pending entry carries the change
            return Ok(Reconciled::Unchanged);
        }

        let same_origin = local.origin.is_some() && local.origin == remote.origin;
        if same_origin && (!local.has_unsynced_changes() || remote.descends_from(&local_rev)) {
            self.store
                .apply_resolved(&remote.id, &as_synced(remote, &remote_rev), Some(&local_rev))
                .await?;
            return Ok(Reconciled::Adopted);
        }

        match self.resolver.resolve(&local, remote)? {
            Resolution::Merged(merged) => {
                let mut merged = *merged;
                merged.synced_revision = Some(remote_rev);
                let applied = self
                    .store
                    .apply_resolved(&remote.id, &merged, Some(&local_rev))
                    .await?;
                self.store.record_merge(&local_rev, remote).await?;
                tracing::info!(
                    "Merged {} into {}",
                    remote.id,
                    applied
                        .revision
                        .as_ref()
                        .map_or_else(String::new, ToString::to_string)
                );
                Ok(Reconciled::Merged)
            }
            Resolution::Unmergeable { .. } => {
                self.store.mark_identity_conflict(&local_rev, remote).await?;
                tracing::warn!("{}", Error::IdentityConflict { id: remote.id });
                Ok(Reconciled::IdentityConflict)
            }
        }
    }

    /// Await a remote request, bounded by the timeout and the connectivity signal.
    async fn remote_call<T>(
        &self,
        request: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, Interrupt> {
        let mut connectivity = self.connectivity.clone();
        tokio::select! {
            biased;
            Ok(_) = connectivity.wait_for(|online| !*online) => {
                Err(Interrupt::Abort(AbortReason::Offline))
            }
            result = tokio::time::timeout(self.settings.request_timeout, request) => match result {
                Err(_) | Ok(Err(RemoteError::Timeout(_))) => {
                    Err(Interrupt::Abort(AbortReason::Timeout))
                }
                Ok(Err(RemoteError::Disconnected)) => Err(Interrupt::Abort(AbortReason::Offline)),
                Ok(Err(error)) => Err(Interrupt::Abort(AbortReason::Remote {
                    message: compact_text(&error.to_string()),
                })),
                Ok(Ok(value)) => Ok(value),
            },
        }
    }

    fn set_phase(&self, phase: SyncPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!("Sync phase {previous} -> {phase}");
        }
    }

    fn take_requeued(&self) -> Vec<Document> {
        std::mem::take(&mut *self.requeued_lock())
            .into_values()
            .collect()
    }

    fn requeued_lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<DocumentId, Document>> {
        self.requeued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The remote copy as it is stored once known to be held by the remote.
fn as_synced(remote: &Document, revision: &Revision) -> Document {
    let mut document = remote.clone();
    document.synced_revision = Some(revision.clone());
    document
}
