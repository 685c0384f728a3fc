use std::path::Path;

use fieldreg_core::db::DocumentFilter;
use fieldreg_core::SyncStatus;

use crate::commands::common::{
    document_to_list_item, format_document_lines, open_store, DocumentListItem,
};
use crate::error::CliError;

pub async fn run_list(
    status: Option<SyncStatus>,
    include_deleted: bool,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut filter = DocumentFilter::default();
    if let Some(status) = status {
        filter = filter.with_status(status);
    }
    if include_deleted {
        filter = filter.including_deleted();
    }

    let store = open_store(db_path).await?;
    let documents = store.list(filter).await?;

    if as_json {
        let json_items = documents
            .iter()
            .map(document_to_list_item)
            .collect::<Vec<DocumentListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if documents.is_empty() {
        println!("No customers yet.");
    } else {
        for line in format_document_lines(&documents) {
            println!("{line}");
        }
    }

    Ok(())
}
