//! Change notifications published by the local store

use serde::Serialize;

use crate::models::{Conflict, Decision, OperationId, Record, RecordKey, SyncCursor};

/// A notification about local state, delivered to subscribers after the
/// change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A record's visible value changed, locally or by a pull
    RecordChanged { record: Record },
    OperationQueued {
        operation_id: OperationId,
        key: RecordKey,
    },
    /// The remote confirmed an operation
    OperationAcknowledged {
        operation_id: OperationId,
        key: RecordKey,
        updated_at: i64,
    },
    /// The remote rejected an operation; it needs attention
    OperationFailed {
        operation_id: OperationId,
        key: RecordKey,
        error: String,
    },
    ConflictDetected { conflict: Conflict },
    ConflictResolved {
        key: RecordKey,
        decision: Decision,
        /// Record created by a keep-both decision
        duplicate: Option<RecordKey>,
    },
    /// An open conflict was dropped because the remote reached the local value
    ConflictCleared { key: RecordKey },
    CursorAdvanced {
        collection: String,
        cursor: SyncCursor,
    },
}

impl StoreEvent {
    /// Record the event is about, if any
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            Self::RecordChanged { record } => Some(record.key()),
            Self::OperationQueued { key, .. }
            | Self::OperationAcknowledged { key, .. }
            | Self::OperationFailed { key, .. }
            | Self::ConflictResolved { key, .. }
            | Self::ConflictCleared { key } => Some(key.clone()),
            Self::ConflictDetected { conflict } => Some(conflict.key()),
            Self::CursorAdvanced { .. } => None,
        }
    }
}
