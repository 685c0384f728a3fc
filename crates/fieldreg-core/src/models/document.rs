//! Document model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Customer, CustomerField, Revision};
use crate::error::{Error, Result};

/// A unique identifier for a document, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Create a new unique document ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Document type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Customer,
}

impl DocumentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
        }
    }
}

/// Per-document synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes not yet acknowledged by the remote
    #[default]
    Pending,
    /// Included in a push that is in flight
    Syncing,
    /// Local revision is held by the remote
    Synced,
    /// Unresolved identity conflict
    Conflict,
}

impl SyncStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Syncing, Self::Synced, Self::Conflict];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown sync status '{other}'")),
        }
    }
}

/// Last-modified timestamps (Unix ms) for each independently merged field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStamps {
    pub business_name: i64,
    pub contact_person: i64,
    pub phone: i64,
    pub email: i64,
    pub address: i64,
    pub geolocation: i64,
    pub deleted: i64,
}

impl FieldStamps {
    /// Every field stamped at `at`
    pub const fn uniform(at: i64) -> Self {
        Self {
            business_name: at,
            contact_person: at,
            phone: at,
            email: at,
            address: at,
            geolocation: at,
            deleted: at,
        }
    }

    pub const fn get(&self, field: CustomerField) -> i64 {
        match field {
            CustomerField::BusinessName => self.business_name,
            CustomerField::ContactPerson => self.contact_person,
            CustomerField::Phone => self.phone,
            CustomerField::Email => self.email,
            CustomerField::Address => self.address,
        }
    }

    pub fn set(&mut self, field: CustomerField, at: i64) {
        match field {
            CustomerField::BusinessName => self.business_name = at,
            CustomerField::ContactPerson => self.contact_person = at,
            CustomerField::Phone => self.phone = at,
            CustomerField::Email => self.email = at,
            CustomerField::Address => self.address = at,
        }
    }

    /// Latest stamp across all fields
    pub fn latest(&self) -> i64 {
        [
            self.business_name,
            self.contact_person,
            self.phone,
            self.email,
            self.address,
            self.geolocation,
            self.deleted,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }
}

/// A customer record with identity, revision, payload and sync state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier
    pub id: DocumentId,
    /// Type discriminator
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    /// Current revision (`None` for an unsaved draft)
    pub revision: Option<Revision>,
    /// Revision assigned at first save
    #[serde(default)]
    pub origin: Option<Revision>,
    /// Parent revisions when this revision is a merge
    #[serde(default)]
    pub merged_from: Vec<Revision>,
    /// Last revision known to be held by the remote
    #[serde(default)]
    pub synced_revision: Option<Revision>,
    /// Record payload
    pub customer: Customer,
    /// Per-field modification stamps
    #[serde(default)]
    pub stamps: FieldStamps,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    /// Synchronization state
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Document {
    /// Create an unsaved customer document with a fresh id
    #[must_use]
    pub fn new_customer(customer: Customer) -> Self {
        let now = crate::util::now_millis();
        Self {
            id: DocumentId::new(),
            kind: DocumentKind::Customer,
            revision: None,
            origin: None,
            merged_from: Vec::new(),
            synced_revision: None,
            customer,
            stamps: FieldStamps::uniform(now),
            created_at: now,
            updated_at: now,
            deleted: false,
            sync_status: SyncStatus::Pending,
        }
    }

    /// The stored revision, or an error for an unsaved draft
    pub fn require_revision(&self) -> Result<&Revision> {
        self.revision
            .as_ref()
            .ok_or_else(|| Error::InvalidInput(format!("document {} has no revision", self.id)))
    }

    /// Whether the current revision still has to reach the remote
    pub fn has_unsynced_changes(&self) -> bool {
        self.revision != self.synced_revision
    }

    /// Whether `revision` is one of the parents of this document's merge
    pub fn descends_from(&self, revision: &Revision) -> bool {
        self.merged_from.contains(revision)
    }

    /// Refresh stamps for every field that differs from `previous`.
    ///
    /// Unchanged fields keep the stamps they had in `previous`, so a later
    /// merge only lets this write win the fields it actually touched.
    pub fn stamp_changes_since(&mut self, previous: &Self, at: i64) {
        let mut stamps = previous.stamps;
        for field in CustomerField::ALL {
            if self.customer.field(field) != previous.customer.field(field) {
                stamps.set(field, at);
            }
        }
        if self.customer.geolocation != previous.customer.geolocation {
            stamps.geolocation = at;
        }
        if self.deleted != previous.deleted {
            stamps.deleted = at;
        }
        self.stamps = stamps;
        self.created_at = previous.created_at;
        self.updated_at = at;
    }
}
