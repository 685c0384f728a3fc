//! fieldreg-core - Core library for fieldreg
//!
//! This crate contains the document model, the `SQLite` record store and
//! change log, the field-level conflict resolver and the sync engine shared
//! by fieldreg clients.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Customer, Document, DocumentId, Revision, SyncStatus};
