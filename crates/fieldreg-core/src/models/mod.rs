//! Data models for fieldreg

mod change;
mod customer;
mod document;
mod geolocation;
mod revision;
mod sync_conflict;

pub use change::{ChangeEntry, ChangeId};
pub use customer::{Customer, CustomerField};
pub use document::{Document, DocumentId, DocumentKind, FieldStamps, SyncStatus};
pub use geolocation::{Geolocation, LocationError, LocationProvider};
pub use revision::Revision;
pub use sync_conflict::{ConflictStrategy, SyncConflict};
