use std::path::Path;
use std::sync::Arc;

use fieldreg_core::config::SyncSettings;
use fieldreg_core::sync::{CycleOutcome, CycleReport, MemoryRemote, SyncEngine};
use tokio::sync::watch;

use crate::commands::common::open_store;
use crate::error::CliError;

/// Run one sync request against the remote stored at `remote_path`.
pub async fn run_sync(
    remote_path: &Path,
    settings: SyncSettings,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let remote = Arc::new(MemoryRemote::load(remote_path)?);
    tracing::debug!(
        "Loaded remote with {} document(s) from {}",
        remote.documents().len(),
        remote_path.display()
    );
    let (_online, connectivity) = watch::channel(true);
    let engine = SyncEngine::new(store, Arc::clone(&remote), connectivity, settings);

    let report = engine.sync_now().await?;
    remote.save(remote_path)?;
    tracing::info!("Saved remote to {}", remote_path.display());

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_cycle_report(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn describe_outcome(outcome: &CycleOutcome) -> String {
    match outcome {
        CycleOutcome::Completed => "Sync completed".to_string(),
        CycleOutcome::NothingToSync => "Nothing to sync".to_string(),
        CycleOutcome::Aborted(reason) => format!("Sync aborted: {reason}"),
        CycleOutcome::Coalesced => "Sync already running".to_string(),
    }
}

pub fn format_cycle_report(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![describe_outcome(&report.outcome)];
    let counts = [
        ("pushed", report.pushed),
        ("acknowledged", report.acknowledged),
        ("pulled", report.pulled),
        ("adopted", report.adopted),
        ("merged", report.merged),
        ("identity conflicts", report.identity_conflicts),
        ("requeued", report.requeued),
        ("failed", report.failed),
    ];
    lines.extend(
        counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(label, count)| format!("  {label}: {count}")),
    );
    lines
}
