//! fieldsync CLI - Command-line access to an offline-first record store
//!
//! Edits land in the local database immediately; `sync` and `watch` carry
//! them to the remote.

mod cli;
mod commands;
mod config;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::records::{run_delete, run_get, run_list, run_put};
use crate::commands::sync::{run_retry, run_status, run_sync, run_watch};
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
    if let Ok(directive) = "fieldsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path)?;

    match cli.command {
        Commands::Put { target, payload } => run_put(&target, payload.as_deref(), &db_path).await,
        Commands::Get { key, json } => run_get(&key, json, &db_path).await,
        Commands::List {
            collection,
            limit,
            json,
        } => run_list(&collection, limit, json, &db_path).await,
        Commands::Delete { key } => run_delete(&key, &db_path).await,
        Commands::Status { json } => run_status(json, &db_path).await,
        Commands::Sync { full, json } => run_sync(full, json, &db_path).await,
        Commands::Conflicts { command } => run_conflicts(command, &db_path).await,
        Commands::Retry { operation_id, all } => {
            run_retry(operation_id.as_deref(), all, &db_path).await
        }
        Commands::Watch { probe_interval } => run_watch(probe_interval, &db_path).await,
        Commands::Config { command } => run_config(command),
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
