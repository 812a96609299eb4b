//! In-process authoritative store implementing the remote contract.
//!
//! Backs the reference HTTP server and the engine tests. Change cursors are
//! store-wide sequence numbers; canonical timestamps are strictly monotonic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::remote::{
    ChangesPage, DeleteRequest, RemoteError, RemoteStore, StoredRecord, UpsertRequest,
};
use crate::models::{validate_collection, validate_payload, OperationId, RecordKey, SyncCursor};
use crate::util::now_millis;

#[derive(Debug, Default)]
struct RemoteState {
    /// Latest version of every record with the sequence that produced it
    records: HashMap<RecordKey, (u64, StoredRecord)>,
    /// Change feed: sequence -> record key
    feed: BTreeMap<u64, RecordKey>,
    /// Results of applied operations, for idempotent replay
    applied: HashMap<OperationId, StoredRecord>,
    sequence: u64,
    clock: i64,
}

impl RemoteState {
    fn next_timestamp(&mut self, floor: i64) -> i64 {
        let timestamp = floor.max(self.clock + 1).max(now_millis());
        self.clock = timestamp;
        timestamp
    }

    fn store(&mut self, record: StoredRecord) -> StoredRecord {
        self.sequence += 1;
        let key = record.key();
        if let Some((previous, _)) = self.records.get(&key) {
            self.feed.remove(previous);
        }
        self.feed.insert(self.sequence, key.clone());
        self.records.insert(key, (self.sequence, record.clone()));
        if let Some(operation_id) = record.operation_id {
            self.applied.insert(operation_id, record.clone());
        }
        record
    }

    fn check_base(&self, key: &RecordKey, base_version: i64) -> Result<i64, RemoteError> {
        match self.records.get(key) {
            Some((_, current)) if current.updated_at > base_version => {
                Err(RemoteError::Conflict(Box::new(current.clone())))
            }
            Some((_, current)) => Ok(current.updated_at),
            None => Ok(0),
        }
    }
}

/// Thread-safe in-memory remote replica.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a record, tombstones included
    pub async fn get(&self, collection: &str, id: &str) -> Option<StoredRecord> {
        let state = self.state.lock().await;
        state
            .records
            .get(&RecordKey::new(collection, id))
            .map(|(_, record)| record.clone())
    }

    /// Number of operations the store has applied
    pub async fn applied_count(&self) -> usize {
        self.state.lock().await.applied.len()
    }

    /// Write a version directly, bypassing the base-version check.
    ///
    /// Models an edit made by another client. `updated_at` is taken as given
    /// and advances the store clock.
    pub async fn write_external(
        &self,
        collection: &str,
        id: &str,
        payload: Value,
        updated_at: i64,
    ) -> StoredRecord {
        let mut state = self.state.lock().await;
        state.clock = state.clock.max(updated_at);
        state.store(StoredRecord {
            collection: collection.to_string(),
            id: id.into(),
            payload,
            updated_at,
            deleted: false,
            operation_id: None,
        })
    }

    fn validate(collection: &str, id: &str, payload: Option<&Value>) -> Result<(), RemoteError> {
        let rejected = |message: String| RemoteError::Rejected {
            status: 422,
            message,
        };
        validate_collection(collection).map_err(|error| rejected(error.to_string()))?;
        if id.trim().is_empty() {
            return Err(rejected("Record id cannot be empty".to_string()));
        }
        if let Some(payload) = payload {
            validate_payload(payload).map_err(|error| rejected(error.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn upsert(&self, request: UpsertRequest) -> Result<StoredRecord, RemoteError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.applied.get(&request.operation_id) {
            tracing::debug!(operation_id = %request.operation_id, "Replayed upsert");
            return Ok(stored.clone());
        }

        Self::validate(
            &request.collection,
            request.record_id.as_str(),
            Some(&request.payload),
        )?;
        let key = RecordKey::new(request.collection.clone(), request.record_id.clone());
        let current = state.check_base(&key, request.base_version)?;
        let updated_at = state.next_timestamp(request.client_updated_at.max(current + 1));

        Ok(state.store(StoredRecord {
            collection: request.collection,
            id: request.record_id,
            payload: request.payload,
            updated_at,
            deleted: false,
            operation_id: Some(request.operation_id),
        }))
    }

    async fn delete(&self, request: DeleteRequest) -> Result<StoredRecord, RemoteError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.applied.get(&request.operation_id) {
            tracing::debug!(operation_id = %request.operation_id, "Replayed delete");
            return Ok(stored.clone());
        }

        Self::validate(&request.collection, request.record_id.as_str(), None)?;
        let key = RecordKey::new(request.collection.clone(), request.record_id.clone());
        let current = state.check_base(&key, request.base_version)?;
        let payload = state
            .records
            .get(&key)
            .map_or_else(|| Value::Object(serde_json::Map::new()), |(_, r)| r.payload.clone());
        let updated_at = state.next_timestamp(current + 1);

        Ok(state.store(StoredRecord {
            collection: request.collection,
            id: request.record_id,
            payload,
            updated_at,
            deleted: true,
            operation_id: Some(request.operation_id),
        }))
    }

    async fn changes(
        &self,
        collection: &str,
        since: Option<&SyncCursor>,
        limit: usize,
    ) -> Result<ChangesPage, RemoteError> {
        let since = match since {
            Some(cursor) => cursor.as_str().parse::<u64>().map_err(|_| RemoteError::Rejected {
                status: 400,
                message: format!("Invalid cursor '{cursor}'"),
            })?,
            None => 0,
        };
        let limit = limit.max(1);

        let state = self.state.lock().await;
        let mut records = Vec::new();
        let mut last_sequence = None;
        let mut has_more = false;

        for (sequence, key) in state.feed.range(since + 1..) {
            if key.collection != collection {
                continue;
            }
            if records.len() == limit {
                has_more = true;
                break;
            }
            if let Some((_, record)) = state.records.get(key) {
                records.push(record.clone());
                last_sequence = Some(*sequence);
            }
        }

        let next_cursor = last_sequence
            .or((since > 0).then_some(since))
            .map(|sequence| SyncCursor::new(sequence.to_string()));

        Ok(ChangesPage {
            records,
            next_cursor,
            has_more,
        })
    }

    async fn health(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn upsert(id: &str, operation_id: OperationId, price: i64, base: i64) -> UpsertRequest {
        UpsertRequest {
            collection: "jobs".to_string(),
            record_id: RecordId::from(id),
            operation_id,
            payload: json!({ "price": price }),
            client_updated_at: 0,
            base_version: base,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replayed_upsert_is_applied_once() {
        let remote = InMemoryRemote::new();
        let operation_id = OperationId::new();

        let first = remote.upsert(upsert("A", operation_id, 75, 0)).await.unwrap();
        let second = remote.upsert(upsert("A", operation_id, 75, 0)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.applied_count().await, 1);
        let page = remote.changes("jobs", None, 10).await.unwrap();
        assert_eq!(page.records, vec![first]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_base_version_conflicts() {
        let remote = InMemoryRemote::new();
        let current = remote.write_external("jobs", "A", json!({ "price": 60 }), 105).await;

        let result = remote.upsert(upsert("A", OperationId::new(), 75, 100)).await;
        assert_eq!(result, Err(RemoteError::Conflict(Box::new(current))));

        let accepted = remote
            .upsert(upsert("A", OperationId::new(), 75, 105))
            .await
            .unwrap();
        assert!(accepted.updated_at > 105);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_payload_is_rejected() {
        let remote = InMemoryRemote::new();
        let mut request = upsert("A", OperationId::new(), 1, 0);
        request.payload = json!("not an object");

        let result = remote.upsert(request).await;
        assert!(matches!(
            result,
            Err(RemoteError::Rejected { status: 422, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_creates_tombstone() {
        let remote = InMemoryRemote::new();
        let stored = remote
            .upsert(upsert("A", OperationId::new(), 50, 0))
            .await
            .unwrap();

        let tombstone = remote
            .delete(DeleteRequest {
                collection: "jobs".to_string(),
                record_id: RecordId::from("A"),
                operation_id: OperationId::new(),
                base_version: stored.updated_at,
            })
            .await
            .unwrap();

        assert!(tombstone.deleted);
        assert_eq!(tombstone.payload, json!({ "price": 50 }));
        assert!(tombstone.updated_at > stored.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_changes_paginate_latest_versions() {
        let remote = InMemoryRemote::new();
        remote.write_external("jobs", "A", json!({ "v": 1 }), 10).await;
        remote.write_external("jobs", "B", json!({ "v": 1 }), 11).await;
        remote.write_external("leads", "L", json!({ "v": 1 }), 12).await;
        remote.write_external("jobs", "A", json!({ "v": 2 }), 13).await;

        let first = remote.changes("jobs", None, 1).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].id.as_str(), "B");
        assert!(first.has_more);

        let second = remote
            .changes("jobs", first.next_cursor.as_ref(), 1)
            .await
            .unwrap();
        assert_eq!(second.records[0].payload, json!({ "v": 2 }));
        assert!(!second.has_more);

        let empty = remote
            .changes("jobs", second.next_cursor.as_ref(), 10)
            .await
            .unwrap();
        assert!(empty.records.is_empty());
        assert_eq!(empty.next_cursor, second.next_cursor);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timestamps_are_strictly_monotonic() {
        let remote = InMemoryRemote::new();
        let mut last = 0;
        for price in 0..5 {
            let stored = remote
                .upsert(upsert("A", OperationId::new(), price, last))
                .await
                .unwrap();
            assert!(stored.updated_at > last);
            last = stored.updated_at;
        }
    }
}
