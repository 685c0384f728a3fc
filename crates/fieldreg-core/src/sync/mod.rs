//! Synchronization with a remote document store.

mod engine;
mod memory;
mod remote;

pub use engine::{AbortReason, CycleOutcome, CycleReport, SyncEngine, SyncPhase};
pub use memory::MemoryRemote;
pub use remote::{PullResponse, PushEntry, PushOutcome, RemoteEndpoint, RemoteError};
