use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use fieldsync_core::{
    Conflict, HttpRemote, LocalStore, Operation, Record, RecordKey, RemoteStore, SyncConfig,
    SyncEngine,
};
use serde::Serialize;
use serde_json::Value;

use crate::config::CliConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub key: String,
    pub preview: String,
    pub payload: Value,
    pub updated_at: i64,
    pub relative_time: String,
    pub pending: bool,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub key: String,
    pub fields: Vec<String>,
    pub local: Value,
    pub remote: Value,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub detected_at: i64,
    pub detected_at_iso: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    cli_db_path
        .or_else(|| env::var_os("FIELDSYNC_DB_PATH").map(PathBuf::from))
        .map_or_else(default_db_path, Ok)
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("fieldsync").join("fieldsync.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalStore::open(path).await?)
}

pub fn load_sync_config() -> Result<SyncConfig, CliError> {
    let file = CliConfig::load().map_err(CliError::Config)?;
    Ok(file.sync_config(|name| env::var(name).ok())?)
}

/// Store plus an engine for the configured remote.
pub async fn open_engine(path: &Path) -> Result<SyncEngine, CliError> {
    let config = load_sync_config()?;
    let Some(remote_url) = config.remote_url.clone() else {
        return Err(CliError::SyncNotConfigured);
    };

    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemote::new(
        remote_url,
        config.auth_token.clone(),
        config.request_timeout,
    )?);
    let store = open_store(path).await?;
    tracing::debug!(?config, "Opened sync engine");
    Ok(SyncEngine::new(store, remote, config))
}

pub fn parse_key(raw: &str) -> Result<RecordKey, CliError> {
    Ok(raw.parse::<RecordKey>()?)
}

/// Parse a payload argument, falling back to piped stdin.
pub fn resolve_payload(argument: Option<&str>) -> Result<Value, CliError> {
    let raw = match argument.and_then(normalize_content) {
        Some(raw) => raw,
        None => read_piped_stdin()?.ok_or(CliError::EmptyPayload)?,
    };
    parse_payload(&raw)
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    let value = serde_json::from_str::<Value>(raw)
        .map_err(|error| CliError::InvalidPayload(error.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ))
    }
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let collapsed = payload.to_string();
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let preview = payload_preview(&record.payload, 48);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let marker = if record.has_pending_changes() { "*" } else { " " };
            format!("{marker} {short_id:<13}  {preview:<48}  {relative_time}")
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        key: record.key().to_string(),
        preview: payload_preview(&record.payload, 80),
        payload: record.payload.clone(),
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        pending: record.has_pending_changes(),
        deleted: record.deleted,
    }
}

pub fn conflict_to_item(conflict: &Conflict) -> ConflictItem {
    ConflictItem {
        key: conflict.key().to_string(),
        fields: conflict.differing_fields(),
        local: conflict.local.payload.clone(),
        remote: conflict.remote.payload.clone(),
        local_updated_at: conflict.local.updated_at,
        remote_updated_at: conflict.remote.updated_at,
        detected_at: conflict.detected_at,
        detected_at_iso: format_sync_timestamp(conflict.detected_at),
    }
}

pub fn format_conflict_lines(conflicts: &[Conflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let local = if conflict.local.deleted {
                "<deleted>".to_string()
            } else {
                payload_preview(&conflict.local.payload, 32)
            };
            format!(
                "{}  {}  fields={}  local={}  remote={}",
                format_sync_timestamp(conflict.detected_at),
                conflict.key(),
                conflict.differing_fields().join(","),
                local,
                payload_preview(&conflict.remote.payload, 32),
            )
        })
        .collect()
}

pub fn format_operation_line(operation: &Operation) -> String {
    format!(
        "{}  {:<6}  {}  {}",
        operation.operation_id,
        operation.kind.as_str(),
        operation.record_key(),
        operation.last_error.as_deref().unwrap_or("-"),
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
