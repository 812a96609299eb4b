use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided (pass a JSON object or pipe one on stdin)")]
    EmptyPayload,
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Invalid decision '{0}' (expected <collection>/<id>=<local|remote|both>)")]
    InvalidDecision(String),
    #[error("Invalid operation id: {0}")]
    InvalidOperationId(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `fieldsync config init --remote-url <URL>` or set FIELDSYNC_REMOTE_URL."
    )]
    SyncNotConfigured,
}
