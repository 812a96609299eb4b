//! Remote replica interface and wire types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{OperationId, Record, RecordId, RecordKey, SyncCursor};

/// A record as the remote holds it. `updated_at` is the canonical version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub collection: String,
    pub id: RecordId,
    pub payload: Value,
    pub updated_at: i64,
    #[serde(default)]
    pub deleted: bool,
    /// Operation that produced this version, when it came from a client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
}

impl StoredRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.id.clone())
    }

    /// Local form of this record, fully synced.
    pub fn to_record(&self) -> Record {
        Record {
            id: self.id.clone(),
            collection: self.collection.clone(),
            payload: self.payload.clone(),
            updated_at: self.updated_at,
            base_version: self.updated_at,
            deleted: self.deleted,
            duplicate_of: None,
        }
    }
}

/// Conditional upsert of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertRequest {
    pub collection: String,
    pub record_id: RecordId,
    pub operation_id: OperationId,
    pub payload: Value,
    pub client_updated_at: i64,
    /// Version the client last saw; the write fails if the remote moved past it
    pub base_version: i64,
}

/// Conditional delete of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub collection: String,
    pub record_id: RecordId,
    pub operation_id: OperationId,
    pub base_version: i64,
}

/// One page of remote changes, ordered by change sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPage {
    pub records: Vec<StoredRecord>,
    pub next_cursor: Option<SyncCursor>,
    #[serde(default)]
    pub has_more: bool,
}

/// Request body for `PUT /v1/collections/{collection}/records/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertBody {
    pub operation_id: OperationId,
    pub payload: Value,
    pub client_updated_at: i64,
    #[serde(default)]
    pub base_version: i64,
}

/// Request body for `DELETE /v1/collections/{collection}/records/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBody {
    pub operation_id: OperationId,
    #[serde(default)]
    pub base_version: i64,
}

/// Query string for `GET /v1/collections/{collection}/changes`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesQuery {
    pub since: Option<String>,
    pub limit: Option<usize>,
}

/// Error body returned by the remote API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Current remote version, present on version conflicts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<StoredRecord>,
}

/// Failure reported by a remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure or server-side trouble; safe to retry
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The call did not finish in time. It may or may not have been applied.
    #[error("remote request timed out")]
    Timeout,

    /// The remote refused the credentials. Operations wait for a fixed token
    /// instead of being flagged.
    #[error("remote refused credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// The remote refused the operation; retrying will not help
    #[error("remote rejected the operation ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote holds a newer version than the request's base version
    #[error("remote holds a newer version of {}", .0.key())]
    Conflict(Box<StoredRecord>),
}

impl RemoteError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout | Self::Unauthorized { .. }
        )
    }
}

/// The remote replica.
///
/// Upserts and deletes are idempotent by `operation_id`: replaying an
/// operation the remote already applied returns the stored result again.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert(&self, request: UpsertRequest) -> Result<StoredRecord, RemoteError>;

    async fn delete(&self, request: DeleteRequest) -> Result<StoredRecord, RemoteError>;

    /// Records of `collection` changed after `since`, at most `limit` of them
    async fn changes(
        &self,
        collection: &str,
        since: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<ChangesPage, RemoteError>;

    /// Cheap reachability check
    async fn health(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Transient("reset".to_string()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Unauthorized {
            status: 401,
            message: "Invalid API token".to_string()
        }
        .is_retryable());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_stored_record_wire_format() {
        let raw = json!({
            "collection": "jobs",
            "id": "A",
            "payload": { "price": 80 },
            "updated_at": 130
        });
        let stored: StoredRecord = serde_json::from_value(raw).unwrap();
        assert!(!stored.deleted);
        assert!(stored.operation_id.is_none());

        let local = stored.to_record();
        assert_eq!(local.base_version, 130);
        assert!(!local.has_pending_changes());
    }
}
