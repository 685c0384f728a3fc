use std::path::Path;

use serde::Serialize;

use crate::commands::common::open_store;
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusReport {
    database: String,
    pending: usize,
    syncing: usize,
    synced: usize,
    conflict: usize,
    queued_changes: usize,
    pull_cursor: Option<String>,
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let summary = store.summary().await?;
    let report = StatusReport {
        database: db_path.display().to_string(),
        pending: summary.pending,
        syncing: summary.syncing,
        synced: summary.synced,
        conflict: summary.conflict,
        queued_changes: summary.queued_changes,
        pull_cursor: store.cursor().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("database:        {}", report.database);
    println!("pending:         {}", report.pending);
    println!("syncing:         {}", report.syncing);
    println!("synced:          {}", report.synced);
    println!("conflict:        {}", report.conflict);
    println!("queued changes:  {}", report.queued_changes);
    println!(
        "pull cursor:     {}",
        report.pull_cursor.as_deref().unwrap_or("(none)")
    );
    Ok(())
}
