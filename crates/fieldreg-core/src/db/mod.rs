//! Database layer for fieldreg

mod change_log;
mod conflicts;
mod connection;
mod migrations;
mod record_store;
mod sync_state;

pub use change_log::{ChangeLog, Entries, SqliteChangeLog};
pub use conflicts::{ConflictLog, SqliteConflictLog};
pub use connection::Database;
pub use record_store::{
    DocumentFilter, Documents, PushConfirmation, RecordStore, SqliteRecordStore, StoreSummary,
};
pub use sync_state::{SqliteSyncState, SyncState};
