use std::path::Path;

use fieldsync_core::{Decision, RecordKey, ResolutionBatch};

use crate::cli::ConflictCommands;
use crate::commands::common::{conflict_to_item, format_conflict_lines, open_store, ConflictItem};
use crate::error::CliError;

pub async fn run_conflicts(command: ConflictCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { json } => run_conflicts_list(json, db_path).await,
        ConflictCommands::Resolve { decisions } => run_conflicts_resolve(&decisions, db_path).await,
    }
}

pub async fn run_conflicts_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let conflicts = store.conflicts().await?;

    if as_json {
        let items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No open conflicts.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(decisions: &[String], db_path: &Path) -> Result<(), CliError> {
    let batch = parse_decisions(decisions)?;
    let store = open_store(db_path).await?;
    let report = store.resolve(batch).await?;

    for outcome in &report.resolved {
        match outcome.duplicate.as_ref() {
            Some(duplicate) => println!(
                "{}: {} (local copy saved as {})",
                outcome.key,
                outcome.decision,
                duplicate.key()
            ),
            None => println!("{}: {}", outcome.key, outcome.decision),
        }
    }
    if !report.is_complete() {
        println!("{} conflict(s) still open", report.unresolved.len());
    }
    Ok(())
}

/// Parse `<collection>/<id>=<decision>` arguments into one batch.
pub fn parse_decisions(raw: &[String]) -> Result<ResolutionBatch, CliError> {
    let mut batch = ResolutionBatch::new();
    for entry in raw {
        let (key, decision) = entry
            .rsplit_once('=')
            .ok_or_else(|| CliError::InvalidDecision(entry.clone()))?;
        let key = key
            .parse::<RecordKey>()
            .map_err(|_| CliError::InvalidDecision(entry.clone()))?;
        let decision = decision
            .parse::<Decision>()
            .map_err(|_| CliError::InvalidDecision(entry.clone()))?;
        batch.decide(key, decision)?;
    }
    Ok(batch)
}
