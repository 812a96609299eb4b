use std::path::Path;
use std::time::Duration;

use fieldsync_core::{
    LoopState, OperationId, ProbeTrigger, StoreEvent, SyncHandle, SyncReport, Trigger,
};
use serde::Serialize;

use crate::commands::common::{
    format_operation_line, format_sync_timestamp, load_sync_config, open_engine, open_store,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct StatusOutput {
    db_path: String,
    remote_url: Option<String>,
    #[serde(flatten)]
    status: fieldsync_core::StoreStatus,
}

pub async fn run_sync(full: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let report = if full {
        engine.force_full_sync().await?
    } else {
        engine.run_pass().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let label = if report.full { "Full sync" } else { "Sync" };
    let mut lines = vec![format!(
        "{label} completed: pushed {}, pulled {}, conflicts {}",
        report.push.acknowledged,
        report.pull.merged.adopted,
        report.conflicts(),
    )];
    if report.push.retrying > 0 {
        lines.push(format!(
            "{} operation(s) will be retried",
            report.push.retrying
        ));
    }
    if report.push.failed > 0 {
        lines.push(format!(
            "{} operation(s) were refused; see `fieldsync retry`",
            report.push.failed
        ));
    }
    if !report.pull.failed_collections.is_empty() {
        lines.push(format!(
            "Pull failed for: {}",
            report.pull.failed_collections.join(", ")
        ));
    }
    if report.conflicts() > 0 {
        lines.push("Resolve conflicts with `fieldsync conflicts list`".to_string());
    }
    lines
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let config = load_sync_config()?;
    let store = open_store(db_path).await?;
    let status = store.status().await?;

    if as_json {
        let output = StatusOutput {
            db_path: db_path.display().to_string(),
            remote_url: config.remote_url,
            status,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:   {}", db_path.display());
    println!(
        "Remote:     {}",
        config.remote_url.as_deref().unwrap_or("(not configured)")
    );
    println!("Records:    {}", status.live_records);
    println!("Unsynced:   {}", status.unsynced_records);
    println!("Pending:    {}", status.pending_operations);
    println!("Failed:     {}", status.failed_operations);
    println!("Conflicts:  {}", status.open_conflicts);
    println!(
        "Last pull:  {}",
        status
            .last_pull_at
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    for (collection, cursor) in &status.cursors {
        println!("  {collection:<16} cursor {cursor}");
    }
    Ok(())
}

pub async fn run_retry(
    operation_id: Option<&str>,
    all: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    if operation_id.is_none() && !all {
        let items = store.needs_attention().await?;
        if items.is_empty() {
            println!("No refused operations.");
        }
        for item in items {
            println!("{}", format_operation_line(&item.operation));
        }
        return Ok(());
    }

    let operation_id = operation_id
        .map(|raw| {
            raw.trim()
                .parse::<OperationId>()
                .map_err(|_| CliError::InvalidOperationId(raw.to_string()))
        })
        .transpose()?;
    let rearmed = store.retry_failed(operation_id.as_ref()).await?;
    println!("Re-armed {rearmed} operation(s); they go out on the next sync");
    Ok(())
}

/// Run the trigger loop until Ctrl-C, printing state changes and pass results.
pub async fn run_watch(probe_interval: u64, db_path: &Path) -> Result<(), CliError> {
    let engine = open_engine(db_path).await?;
    let probe = ProbeTrigger::new(
        engine.remote(),
        Duration::from_secs(probe_interval.max(1)),
        engine.config().request_timeout,
    );
    let mut events = engine.store().subscribe();
    let handle = SyncHandle::spawn(engine.clone());
    let prober = handle.attach(probe);
    let mut states = handle.watch_state();
    let mut reports = handle.watch_reports();

    if engine.config().sync_interval.is_none() {
        handle.trigger(Trigger::Manual);
    }
    println!("Watching (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if let LoopState::Backoff { retry_at } = state {
                    println!("backoff until {}", format_sync_timestamp(retry_at));
                } else {
                    println!("{}", state.label());
                }
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = reports.borrow_and_update().clone();
                if let Some(report) = report {
                    for line in format_report_lines(&report) {
                        println!("  {line}");
                    }
                }
            }
            event = events.recv() => {
                if let Ok(StoreEvent::ConflictDetected { conflict }) = event {
                    println!("  conflict on {}", conflict.key());
                }
            }
        }
    }

    prober.abort();
    handle.shutdown().await;
    println!("Stopped");
    Ok(())
}
