//! Error types for fieldreg-core

use thiserror::Error;

use crate::models::{Document, DocumentId, Revision};

/// Result type alias using fieldreg-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldreg-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local write carried a revision that is no longer current.
    ///
    /// Holds the stored document so the caller can re-derive its edit.
    #[error("Revision conflict on {}: store is at {}", .current.id, display_revision(.current.revision.as_ref()))]
    RevisionConflict { current: Box<Document> },

    /// The document changed locally while the sync engine was resolving it.
    #[error("Stale resolution for {id}: expected {}, found {}", display_revision(.expected.as_ref()), display_revision(.found.as_ref()))]
    StaleResolution {
        id: DocumentId,
        expected: Option<Revision>,
        found: Option<Revision>,
    },

    /// Two independently created documents share an id.
    #[error("Identity conflict on {id}: local and remote documents have no common ancestor")]
    IdentityConflict { id: DocumentId },
}

impl Error {
    /// Whether the sync engine should retry the affected document next cycle.
    pub const fn is_stale_resolution(&self) -> bool {
        matches!(self, Self::StaleResolution { .. })
    }
}

fn display_revision(revision: Option<&Revision>) -> String {
    revision.map_or_else(|| "none".to_string(), ToString::to_string)
}
