//! Contract between the sync engine and a remote document store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ChangeEntry, Document, Revision};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote is unreachable")]
    Disconnected,
    #[error("Remote request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Remote rejected the request: {0}")]
    Rejected(String),
    #[error("Remote transport failed: {0}")]
    Transport(String),
}

/// One change sent to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEntry {
    /// Replaying an already applied key has no further effect
    pub idempotency_key: String,
    pub document: Document,
    /// Revision the remote must currently hold for the change to apply
    pub base_revision: Option<Revision>,
}

impl From<&ChangeEntry> for PushEntry {
    fn from(entry: &ChangeEntry) -> Self {
        Self {
            idempotency_key: entry.idempotency_key(),
            document: entry.snapshot.clone(),
            base_revision: entry.base_revision.clone(),
        }
    }
}

/// Remote verdict for one pushed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Accepted { revision: Revision },
    /// The remote holds a different revision; carries the remote copy
    Conflict(Box<Document>),
}

/// Documents changed on the remote since a cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub documents: Vec<Document>,
    pub next_cursor: Option<String>,
}

/// A remote document store the engine can push to and pull from.
///
/// `push` answers entries in request order. A response shorter than the
/// request means the remaining entries were not processed.
pub trait RemoteEndpoint: Send + Sync {
    fn push(
        &self,
        entries: Vec<PushEntry>,
    ) -> impl Future<Output = Result<Vec<PushOutcome>, RemoteError>> + Send;

    fn pull(
        &self,
        since: Option<String>,
    ) -> impl Future<Output = Result<PullResponse, RemoteError>> + Send;
}

impl<T: RemoteEndpoint> RemoteEndpoint for Arc<T> {
    fn push(
        &self,
        entries: Vec<PushEntry>,
    ) -> impl Future<Output = Result<Vec<PushOutcome>, RemoteError>> + Send {
        (**self).push(entries)
    }

    fn pull(
        &self,
        since: Option<String>,
    ) -> impl Future<Output = Result<PullResponse, RemoteError>> + Send {
        (**self).pull(since)
    }
}
