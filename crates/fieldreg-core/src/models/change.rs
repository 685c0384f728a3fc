//! Change log entry model

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Document, DocumentId, Revision};

/// Position of an entry in the change log (creation order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(pub i64);

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A local mutation waiting for remote acknowledgment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Entry identifier
    pub id: ChangeId,
    /// Document the change belongs to
    pub document_id: DocumentId,
    /// Revision produced by the change
    pub revision: Revision,
    /// Revision the remote is expected to hold (`None` for a first push)
    pub base_revision: Option<Revision>,
    /// Full document at `revision`
    pub snapshot: Document,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl ChangeEntry {
    /// Idempotency key sent with the push, equal to the entry's revision token
    pub fn idempotency_key(&self) -> String {
        self.revision.idempotency_key()
    }
}
