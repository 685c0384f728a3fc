use std::path::Path;

use fieldreg_core::Error;

use crate::commands::common::{open_store, resolve_document};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let document = resolve_document(id, &store).await?;
    if document.deleted {
        return Err(CliError::Core(Error::NotFound(document.id.to_string())));
    }

    let revision = document.require_revision()?;
    store.delete(&document.id, revision).await?;
    println!("{}", document.id);
    Ok(())
}
