//! Service layer shared by clients and the sync engine.

mod store;

pub use store::{IdentityOutcome, IdentityResolution, StoreService};
