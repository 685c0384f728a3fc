//! fieldreg CLI - capture and sync customer records from the terminal
//!
//! Records are stored in a local `SQLite` database and synced on demand
//! against a file-backed remote.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::commands::add::run_add;
use crate::commands::common::{env_db_path, load_config, resolve_config_path, resolve_db_path};
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_set, run_config_show, ConfigUpdate};
use crate::commands::conflicts::run_conflicts;
use crate::commands::delete::run_delete;
use crate::commands::edit::run_edit;
use crate::commands::list::run_list;
use crate::commands::resolve::run_resolve;
use crate::commands::show::run_show;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "fieldreg=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config)?;

    // These never touch the database
    match cli.command {
        Commands::Completions { shell, output } => {
            return run_completions(shell, output.as_deref());
        }
        Commands::Config { command } => {
            return match command {
                ConfigCommands::Show => run_config_show(&config_path),
                ConfigCommands::Set {
                    db_path,
                    remote_path,
                    batch_size,
                    push_chunk,
                    timeout_secs,
                } => run_config_set(
                    &config_path,
                    ConfigUpdate {
                        db_path,
                        remote_path,
                        batch_size,
                        push_chunk,
                        timeout_secs,
                    },
                ),
            };
        }
        command => {
            let config = load_config(&config_path)?;
            let db_path = resolve_db_path(cli.db_path, env_db_path(), &config)?;

            match command {
                Commands::Add { fields, location } => run_add(&fields, location, &db_path).await?,
                Commands::List {
                    status,
                    deleted,
                    json,
                } => run_list(status.map(Into::into), deleted, json, &db_path).await?,
                Commands::Show { id, json } => run_show(&id, json, &db_path).await?,
                Commands::Edit {
                    id,
                    fields,
                    location,
                    clear_location,
                } => run_edit(&id, &fields, location, clear_location, &db_path).await?,
                Commands::Delete { id } => run_delete(&id, &db_path).await?,
                Commands::Status { json } => run_status(json, &db_path).await?,
                Commands::Conflicts { limit, json } => {
                    run_conflicts(limit, json, &db_path).await?;
                }
                Commands::Resolve { id, keep } => run_resolve(&id, keep.into(), &db_path).await?,
                Commands::Sync { remote, json } => {
                    let remote_path = remote
                        .or_else(|| config.remote_path())
                        .ok_or(CliError::RemoteNotConfigured)?;
                    let settings = config
                        .sync
                        .with_lookup(|name| std::env::var(name).ok())?;
                    run_sync(&remote_path, settings, json, &db_path).await?;
                }
                Commands::Completions { .. } | Commands::Config { .. } => {}
            }
        }
    }

    Ok(())
}
