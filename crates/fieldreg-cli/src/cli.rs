use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fieldreg_core::services::IdentityResolution;
use fieldreg_core::SyncStatus;

#[derive(Parser)]
#[command(name = "fieldreg")]
#[command(about = "Capture and sync customer records from the field")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new customer
    #[command(alias = "new")]
    Add {
        #[command(flatten)]
        fields: CustomerArgs,
        #[command(flatten)]
        location: LocationArgs,
    },
    /// List customers
    List {
        /// Only show customers in this sync state
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Include deleted customers that have not synced yet
        #[arg(long)]
        deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one customer
    Show {
        /// Customer ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing customer
    Edit {
        /// Customer ID or unique ID prefix
        id: String,
        #[command(flatten)]
        fields: CustomerArgs,
        #[command(flatten)]
        location: LocationArgs,
        /// Remove the stored location
        #[arg(long, conflicts_with = "lat")]
        clear_location: bool,
    },
    /// Delete an existing customer
    Delete {
        /// Customer ID or unique ID prefix
        id: String,
    },
    /// Show sync state counts and the pull cursor
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle an identity conflict
    Resolve {
        /// Customer ID or unique ID prefix
        id: String,
        /// Which copy to keep
        #[arg(long, value_enum)]
        keep: KeepArg,
    },
    /// Run one sync cycle against a file-backed remote
    Sync {
        /// Remote file (defaults to `remote_path` from the config file)
        #[arg(long, value_name = "PATH")]
        remote: Option<PathBuf>,
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or update the config file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

/// Customer text fields; all optional so `edit` can change a subset.
#[derive(Args, Debug, Default, Clone)]
pub struct CustomerArgs {
    /// Business name
    #[arg(long, value_name = "NAME")]
    pub business: Option<String>,
    /// Contact person
    #[arg(long, value_name = "NAME")]
    pub contact: Option<String>,
    /// Phone number
    #[arg(long)]
    pub phone: Option<String>,
    /// Email address (pass an empty value to clear it)
    #[arg(long)]
    pub email: Option<String>,
    /// Street address
    #[arg(long)]
    pub address: Option<String>,
}

#[derive(Args, Debug, Default, Clone, Copy)]
pub struct LocationArgs {
    /// Latitude in degrees
    #[arg(long, requires_all = ["lon", "accuracy"], allow_hyphen_values = true)]
    pub lat: Option<f64>,
    /// Longitude in degrees
    #[arg(long, requires_all = ["lat", "accuracy"], allow_hyphen_values = true)]
    pub lon: Option<f64>,
    /// Accuracy radius in meters
    #[arg(long, requires_all = ["lat", "lon"])]
    pub accuracy: Option<f64>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective config file
    Show,
    /// Update config values
    Set {
        /// Default database path
        #[arg(long, value_name = "PATH")]
        db_path: Option<String>,
        /// Default remote file for `sync`
        #[arg(long, value_name = "PATH")]
        remote_path: Option<String>,
        /// Change log entries drained per cycle
        #[arg(long)]
        batch_size: Option<usize>,
        /// Entries sent per push request
        #[arg(long)]
        push_chunk: Option<usize>,
        /// Remote request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Syncing,
    Synced,
    Conflict,
}

impl From<StatusArg> for SyncStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Syncing => Self::Syncing,
            StatusArg::Synced => Self::Synced,
            StatusArg::Conflict => Self::Conflict,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepArg {
    /// Adopt the remote copy and discard the local one
    Remote,
    /// Adopt the remote copy and keep the local one under a new id
    Both,
}

impl From<KeepArg> for IdentityResolution {
    fn from(value: KeepArg) -> Self {
        match value {
            KeepArg::Remote => Self::KeepRemote,
            KeepArg::Both => Self::KeepBoth,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

impl From<CompletionShell> for clap_complete::Shell {
    fn from(value: CompletionShell) -> Self {
        match value {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
            CompletionShell::PowerShell => Self::PowerShell,
        }
    }
}
