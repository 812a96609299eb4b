use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Work with an offline-first record store from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or replace a record
    Put {
        /// `<collection>` to create a record, `<collection>/<id>` to write one
        target: String,
        /// JSON object payload (read from stdin when omitted)
        payload: Option<String>,
    },
    /// Show one record
    Get {
        /// Record key as `<collection>/<id>`
        key: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List records of a collection, most recently updated first
    List {
        collection: String,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a record
    Delete {
        /// Record key as `<collection>/<id>`
        key: String,
    },
    /// Show pending, failed and conflicted state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued changes and pull remote changes
    Sync {
        /// Re-arm failed operations, ignore backoff and pull from the beginning
        #[arg(long)]
        full: bool,
        /// Output the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect and resolve sync conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// List operations the remote refused, or put them back in line
    Retry {
        /// Operation to re-arm (all failed operations with `--all`)
        operation_id: Option<String>,
        /// Re-arm every failed operation
        #[arg(long, conflicts_with = "operation_id")]
        all: bool,
    },
    /// Keep syncing in the foreground until interrupted
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "5", value_name = "SECS")]
        probe_interval: u64,
    },
    /// Configure the remote used by `sync` and `watch`
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

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List open conflicts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve one or more conflicts
    Resolve {
        /// Decisions as `<collection>/<id>=<local|remote|both>`
        #[arg(required = true, value_name = "KEY=DECISION")]
        decisions: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update the CLI config file
    Init {
        /// Remote API base URL
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Bearer token for the remote API
        #[arg(long, value_name = "TOKEN")]
        auth_token: Option<String>,
        /// Collections to pull, comma separated
        #[arg(long, value_delimiter = ',', value_name = "NAMES")]
        collections: Vec<String>,
        /// Periodic sync interval for `watch` (0 disables it)
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
    },
    /// Print the effective configuration
    Show,
}
