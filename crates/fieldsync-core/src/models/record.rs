//! Record model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::is_valid_collection_name;

/// A stable record identifier.
///
/// Records created on this device get a UUID v7; records pulled from the
/// remote keep whatever identifier the remote assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Record id cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifies a record across collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub collection: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(collection: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl FromStr for RecordKey {
    type Err = Error;

    /// Parses `collection/id`.
    fn from_str(s: &str) -> Result<Self> {
        let (collection, id) = s.trim().split_once('/').ok_or_else(|| {
            Error::InvalidInput(format!("Expected <collection>/<id>, got '{s}'"))
        })?;
        validate_collection(collection)?;
        Ok(Self {
            collection: collection.to_string(),
            id: id.parse()?,
        })
    }
}

/// A domain record as held by the local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier
    pub id: RecordId,
    /// Collection the record belongs to (e.g. `jobs`, `leads`)
    pub collection: String,
    /// Arbitrary payload fields
    pub payload: Value,
    /// Timestamp of the last mutation (Unix ms)
    pub updated_at: i64,
    /// Last `updated_at` confirmed as synced with the remote
    pub base_version: i64,
    /// Soft delete flag
    pub deleted: bool,
    /// Origin record when this record was created by a keep-both resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<RecordId>,
}

impl Record {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.collection.clone(), self.id.clone())
    }

    /// A record with `updated_at > base_version` carries unsynced local edits.
    #[must_use]
    pub const fn has_pending_changes(&self) -> bool {
        self.updated_at > self.base_version
    }

    /// Whether both replicas hold the same content, ignoring version metadata.
    #[must_use]
    pub fn same_content(&self, payload: &Value, deleted: bool) -> bool {
        self.deleted == deleted && &self.payload == payload
    }

    /// Timestamp for the next local mutation of this record.
    ///
    /// Always strictly newer than both the previous mutation and the base
    /// version, whatever the local clock says.
    #[must_use]
    pub fn next_local_timestamp(&self, now: i64) -> i64 {
        now.max(self.updated_at + 1).max(self.base_version + 1)
    }
}

/// A change requested by application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create or replace a record. A missing id creates a new record.
    Upsert {
        collection: String,
        id: Option<RecordId>,
        payload: Value,
    },
    /// Soft-delete an existing record.
    Delete { collection: String, id: RecordId },
}

impl Mutation {
    pub fn upsert(collection: impl Into<String>, id: impl Into<RecordId>, payload: Value) -> Self {
        Self::Upsert {
            collection: collection.into(),
            id: Some(id.into()),
            payload,
        }
    }

    pub fn create(collection: impl Into<String>, payload: Value) -> Self {
        Self::Upsert {
            collection: collection.into(),
            id: None,
            payload,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<RecordId>) -> Self {
        Self::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Upsert { collection, .. } | Self::Delete { collection, .. } => collection,
        }
    }

    /// Reject malformed mutations before they reach storage.
    pub fn validate(&self) -> Result<()> {
        validate_collection(self.collection())?;
        match self {
            Self::Upsert { id, payload, .. } => {
                if let Some(id) = id {
                    validate_record_id(id)?;
                }
                validate_payload(payload)
            }
            Self::Delete { id, .. } => validate_record_id(id),
        }
    }
}

pub(crate) fn validate_collection(collection: &str) -> Result<()> {
    if is_valid_collection_name(collection) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Collection name '{collection}' must match [a-z0-9_-]+"
        )))
    }
}

fn validate_record_id(id: &RecordId) -> Result<()> {
    if id.as_str().trim().is_empty() {
        Err(Error::InvalidInput("Record id cannot be empty".to_string()))
    } else {
        Ok(())
    }
}

pub(crate) fn validate_payload(payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(Error::InvalidInput(
            "Record payload must be a JSON object".to_string(),
        ))
    }
}
