//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a recorded conflict was (or must be) handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Merged automatically with field-level last-writer-wins
    FieldLww,
    /// Id collision without a common ancestor, waiting for a manual decision
    Identity,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FieldLww => "field_lww",
            Self::Identity => "identity",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "field_lww" => Ok(Self::FieldLww),
            "identity" => Ok(Self::Identity),
            other => Err(format!("unknown conflict strategy '{other}'")),
        }
    }
}

/// Recorded divergence between a local and a remote revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Document involved in the conflict
    pub document_id: String,
    /// Local revision token at detection
    pub local_revision: String,
    /// Remote revision token at detection
    pub remote_revision: String,
    /// Remote document JSON, kept for identity conflicts
    pub remote_snapshot: Option<String>,
    /// Resolution strategy
    pub strategy: ConflictStrategy,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Resolution timestamp (unix ms), `None` while unresolved
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}
