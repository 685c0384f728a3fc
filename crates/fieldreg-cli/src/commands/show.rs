use std::path::Path;

use crate::commands::common::{format_document_detail, open_store, resolve_document};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let document = resolve_document(id, &store).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        for line in format_document_detail(&document) {
            println!("{line}");
        }
    }
    Ok(())
}
