use std::path::Path;

use fieldreg_core::services::IdentityResolution;

use crate::commands::common::{open_store, resolve_document};
use crate::error::CliError;

pub async fn run_resolve(
    id: &str,
    choice: IdentityResolution,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let document = resolve_document(id, &store).await?;

    let outcome = store.resolve_identity_conflict(&document.id, choice).await?;
    println!("{}", outcome.adopted.id);
    if let Some(relocated) = outcome.relocated {
        println!("{relocated}");
    }
    Ok(())
}
