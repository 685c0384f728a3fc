use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldreg_core::Error),
    #[error(transparent)]
    Config(#[from] fieldreg_core::config::ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Customer ID cannot be empty")]
    EmptyDocumentId,
    #[error("Customer not found for id/prefix: {0}")]
    DocumentNotFound(String),
    #[error("{0}")]
    AmbiguousDocumentId(String),
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
    #[error("Missing required field: --{0}")]
    MissingField(&'static str),
    #[error("Failed to resolve the platform {0} directory")]
    MissingPlatformDir(&'static str),
    #[error(
        "No remote configured. Pass `--remote PATH` or run `fieldreg config set --remote-path PATH`."
    )]
    RemoteNotConfigured,
}
