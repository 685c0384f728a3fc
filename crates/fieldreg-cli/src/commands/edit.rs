use std::path::Path;

use crate::cli::{CustomerArgs, LocationArgs};
use crate::commands::common::{apply_customer_edits, open_store, resolve_document};
use crate::error::CliError;

pub async fn run_edit(
    id: &str,
    fields: &CustomerArgs,
    location: LocationArgs,
    clear_location: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut document = resolve_document(id, &store).await?;

    if !apply_customer_edits(&mut document.customer, fields, location, clear_location)? {
        println!("{}", document.id);
        return Ok(());
    }

    // Fails with a revision conflict if the record changed since it was read
    let revision = store.put(&document).await?;
    println!("{} {revision}", document.id);
    Ok(())
}
