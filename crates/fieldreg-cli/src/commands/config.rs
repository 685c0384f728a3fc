use std::path::Path;
use std::time::Duration;

use fieldreg_core::config::RegistryConfig;

use crate::commands::common::load_config;
use crate::error::CliError;

/// Values accepted by `config set`.
#[derive(Debug, Default, Clone)]
pub struct ConfigUpdate {
    pub db_path: Option<String>,
    pub remote_path: Option<String>,
    pub batch_size: Option<usize>,
    pub push_chunk: Option<usize>,
    pub timeout_secs: Option<u64>,
}

pub fn run_config_show(config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    println!("# {}", config_path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub fn run_config_set(config_path: &Path, update: ConfigUpdate) -> Result<(), CliError> {
    let mut config = load_config(config_path)?;
    apply_config_update(&mut config, update)?;
    config.save_to_path(config_path)?;
    println!("{}", config_path.display());
    Ok(())
}

/// Merge `update` into `config`; an empty path clears the stored value.
pub fn apply_config_update(
    config: &mut RegistryConfig,
    update: ConfigUpdate,
) -> Result<(), CliError> {
    if let Some(db_path) = update.db_path {
        config.db_path = Some(db_path);
    }
    if let Some(remote_path) = update.remote_path {
        config.remote_path = Some(remote_path);
    }
    if let Some(batch_size) = update.batch_size {
        config.sync.batch_size = batch_size;
    }
    if let Some(push_chunk) = update.push_chunk {
        config.sync.push_chunk_size = push_chunk;
    }
    if let Some(timeout_secs) = update.timeout_secs {
        config.sync.request_timeout = Duration::from_secs(timeout_secs);
    }
    config.sync.validate()?;
    Ok(())
}
