//! Queued operation model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

use super::record::{RecordId, RecordKey};

/// A unique identifier for an operation, using UUID v7 (time-sortable).
///
/// The remote uses it to recognise replays, so it must stay stable across
/// retries of the same operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a queued operation does to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Upsert,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Database(format!("Unknown operation kind: {other}"))),
        }
    }
}

/// Delivery state of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to be pushed (possibly after a backoff delay)
    Pending,
    /// Rejected by the remote; needs attention before it is retried
    Failed,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Database(format!(
                "Unknown operation status: {other}"
            ))),
        }
    }
}

/// A queued local mutation awaiting delivery to the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub collection: String,
    pub record_id: RecordId,
    pub kind: OperationKind,
    /// Full record payload for upserts, `None` for deletes
    pub payload: Option<Value>,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Queue position; strictly increasing in enqueue order
    #[serde(default)]
    pub sequence: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub status: OperationStatus,
    /// Earliest time the next delivery attempt may happen (Unix ms)
    pub next_attempt_at: Option<i64>,
}

impl Operation {
    pub fn upsert(collection: impl Into<String>, record_id: RecordId, payload: Value) -> Self {
        Self::new(collection, record_id, OperationKind::Upsert, Some(payload))
    }

    pub fn delete(collection: impl Into<String>, record_id: RecordId) -> Self {
        Self::new(collection, record_id, OperationKind::Delete, None)
    }

    fn new(
        collection: impl Into<String>,
        record_id: RecordId,
        kind: OperationKind,
        payload: Option<Value>,
    ) -> Self {
        Self {
            operation_id: OperationId::new(),
            collection: collection.into(),
            record_id,
            kind,
            payload,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            sequence: 0,
            retry_count: 0,
            last_error: None,
            status: OperationStatus::Pending,
            next_attempt_at: None,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.record_id.clone())
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == OperationStatus::Failed
    }

    /// Whether the backoff delay for this operation has elapsed.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_new_operation_is_pending_and_due() {
        let op = Operation::upsert("jobs", RecordId::from("A"), json!({"price": 75}));
        assert_eq!(op.kind, OperationKind::Upsert);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.is_due(0));
    }

    #[test]
    fn test_backoff_gate() {
        let mut op = Operation::delete("jobs", RecordId::from("A"));
        op.next_attempt_at = Some(1_000);
        assert!(!op.is_due(999));
        assert!(op.is_due(1_000));
    }

    #[test]
    fn test_kind_and_status_strings() {
        for kind in [OperationKind::Upsert, OperationKind::Delete] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        for status in [OperationStatus::Pending, OperationStatus::Failed] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!("merge".parse::<OperationKind>().is_err());
    }
}
