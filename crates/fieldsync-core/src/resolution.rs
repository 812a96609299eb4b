//! Human resolution of open conflicts and of operations the remote refused.
//!
//! A [`ResolutionBatch`] collects one decision per conflict. Applying it
//! runs one transaction per conflict: the conflict row, the record and any
//! follow-up operation commit together, so an interrupted batch leaves every
//! undecided or unapplied conflict open.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::db::{
    LibSqlConflictRepository, LibSqlOperationQueue, LibSqlRecordRepository, OperationQueue,
    RecordRepository,
};
use crate::error::{Error, Result};
use crate::models::{Conflict, Decision, Operation, OperationId, Record, RecordId, RecordKey};
use crate::store::{LocalStore, StoreEvent};
use crate::util::now_millis;

/// Decisions for a set of open conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionBatch {
    decisions: BTreeMap<RecordKey, Decision>,
}

impl ResolutionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the decision for one conflict.
    ///
    /// A conflict takes exactly one decision; deciding the same record twice
    /// is rejected.
    pub fn decide(&mut self, key: RecordKey, decision: Decision) -> Result<&mut Self> {
        if let Some(previous) = self.decisions.get(&key) {
            return Err(Error::InvalidInput(format!(
                "{key} already has decision {previous}"
            )));
        }
        self.decisions.insert(key, decision);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// Follow-up state of one resolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub key: RecordKey,
    pub decision: Decision,
    /// The original record after the decision
    pub record: Record,
    /// Operation queued to carry the decision to the remote
    pub operation_id: Option<OperationId>,
    /// Copy of the local version created by keep-both
    pub duplicate: Option<Record>,
}

/// Result of applying a [`ResolutionBatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub resolved: Vec<ResolutionOutcome>,
    /// Open conflicts the batch did not decide; left untouched
    pub unresolved: Vec<RecordKey>,
}

impl ResolutionReport {
    /// Whether every open conflict received a decision.
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// An operation the remote refused, with the record it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeedsAttention {
    pub operation: Operation,
    pub record: Option<Record>,
}

impl LocalStore {
    /// Apply a batch of decisions.
    ///
    /// Every decision must name an open conflict, otherwise nothing is
    /// applied and [`Error::UnknownConflict`] is returned.
    pub async fn resolve(&self, batch: ResolutionBatch) -> Result<ResolutionReport> {
        let mut report = ResolutionReport::default();
        let mut events = Vec::new();

        {
            let db = self.lock().await;
            let conn = db.connection();
            let open = LibSqlConflictRepository::new(conn).list().await?;
            let open_keys = open.iter().map(Conflict::key).collect::<HashSet<_>>();

            if let Some(unknown) = batch.decisions.keys().find(|key| !open_keys.contains(*key)) {
                return Err(Error::UnknownConflict(unknown.to_string()));
            }

            for conflict in open {
                let key = conflict.key();
                let Some(decision) = batch.decisions.get(&key).copied() else {
                    report.unresolved.push(key);
                    continue;
                };
                let outcome = apply_decision(conn, &conflict, decision).await?;
                tracing::info!(
                    key = %key,
                    decision = decision.as_str(),
                    duplicate = outcome.duplicate.as_ref().map(|record| record.id.to_string()),
                    "Resolved conflict"
                );
                events.extend(outcome_events(&outcome));
                report.resolved.push(outcome);
            }
        }

        self.emit_all(events);
        Ok(report)
    }

    /// Operations the remote refused, oldest first.
    pub async fn needs_attention(&self) -> Result<Vec<NeedsAttention>> {
        let db = self.lock().await;
        let conn = db.connection();
        let records = LibSqlRecordRepository::new(conn);

        let mut items = Vec::new();
        for operation in LibSqlOperationQueue::new(conn).list_failed().await? {
            let record = records.get(&operation.record_key()).await?;
            items.push(NeedsAttention { operation, record });
        }
        Ok(items)
    }

    /// Put refused operations back in line for the next push.
    pub async fn retry_failed(&self, operation_id: Option<&OperationId>) -> Result<u64> {
        let rearmed = self.rearm_failed(operation_id).await?;
        if rearmed > 0 {
            tracing::info!("Re-armed {rearmed} failed operations");
        }
        Ok(rearmed)
    }
}

async fn apply_decision(
    conn: &libsql::Connection,
    conflict: &Conflict,
    decision: Decision,
) -> Result<ResolutionOutcome> {
    let key = conflict.key();
    let tx = conn.transaction().await?;
    let records = LibSqlRecordRepository::new(&tx);
    let queue = LibSqlOperationQueue::new(&tx);

    LibSqlConflictRepository::new(&tx).remove(&key).await?;
    queue.remove_for_record(&key).await?;

    // Edits made while the conflict was open are part of the local side
    let local = records
        .get(&key)
        .await?
        .unwrap_or_else(|| conflict.local.clone());
    let remote_version = conflict.remote.updated_at;
    // The record synced past the conflicting version after it was detected
    let stale = local.base_version > remote_version;

    let outcome = match decision {
        Decision::KeepLocal => {
            let base_version = local.base_version.max(remote_version);
            let record = Record {
                base_version,
                updated_at: local.updated_at.max(base_version + 1),
                ..local
            };
            records.upsert(&record).await?;
            let operation = if record.deleted {
                Operation::delete(key.collection.clone(), key.id.clone())
            } else {
                Operation::upsert(key.collection.clone(), key.id.clone(), record.payload.clone())
            };
            let operation = queue.enqueue(&operation).await?;
            ResolutionOutcome {
                key,
                decision,
                record,
                operation_id: Some(operation.operation_id),
                duplicate: None,
            }
        }
        Decision::KeepRemote | Decision::KeepBoth => {
            let record = if stale {
                local.clone()
            } else {
                adopt_remote(conflict, &local)
            };
            records.upsert(&record).await?;
            let mut outcome = ResolutionOutcome {
                key,
                decision,
                record,
                operation_id: None,
                duplicate: None,
            };

            // A deletion, or a side the remote already overtook, has nothing to copy
            if decision == Decision::KeepBoth && !local.deleted && !stale {
                let duplicate = Record {
                    id: RecordId::generate(),
                    collection: outcome.key.collection.clone(),
                    payload: local.payload.clone(),
                    updated_at: now_millis(),
                    base_version: 0,
                    deleted: false,
                    duplicate_of: Some(outcome.key.id.clone()),
                };
                records.upsert(&duplicate).await?;
                let operation = queue
                    .enqueue(&Operation::upsert(
                        duplicate.collection.clone(),
                        duplicate.id.clone(),
                        duplicate.payload.clone(),
                    ))
                    .await?;
                outcome.operation_id = Some(operation.operation_id);
                outcome.duplicate = Some(duplicate);
            }
            outcome
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

fn adopt_remote(conflict: &Conflict, local: &Record) -> Record {
    Record {
        duplicate_of: local.duplicate_of.clone(),
        ..conflict.remote.clone()
    }
}

fn outcome_events(outcome: &ResolutionOutcome) -> Vec<StoreEvent> {
    let mut events = vec![StoreEvent::RecordChanged {
        record: outcome.record.clone(),
    }];
    if let Some(duplicate) = &outcome.duplicate {
        events.push(StoreEvent::RecordChanged {
            record: duplicate.clone(),
        });
    }
    if let Some(operation_id) = outcome.operation_id {
        let key = outcome
            .duplicate
            .as_ref()
            .map_or_else(|| outcome.key.clone(), Record::key);
        events.push(StoreEvent::OperationQueued { operation_id, key });
    }
    events.push(StoreEvent::ConflictResolved {
        key: outcome.key.clone(),
        decision: outcome.decision,
        duplicate: outcome.duplicate.as_ref().map(Record::key),
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mutation, OperationKind};
    use crate::sync::StoredRecord;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn remote(id: &str, price: i64, updated_at: i64) -> StoredRecord {
        StoredRecord {
            collection: "jobs".to_string(),
            id: RecordId::from(id),
            payload: json!({ "price": price }),
            updated_at,
            deleted: false,
            operation_id: None,
        }
    }

    /// A synced record edited locally, then overtaken by a remote edit.
    async fn conflicted_store(ids: &[&str]) -> LocalStore {
        let store = LocalStore::open_in_memory().await.unwrap();
        let synced = ids.iter().map(|id| remote(id, 50, 100)).collect::<Vec<_>>();
        store.merge_from_remote("jobs", &synced, None).await.unwrap();
        for id in ids {
            store
                .apply(Mutation::upsert("jobs", *id, json!({ "price": 75 })))
                .await
                .unwrap();
        }
        let diverged = ids.iter().map(|id| remote(id, 60, 105)).collect::<Vec<_>>();
        let merged = store.merge_from_remote("jobs", &diverged, None).await.unwrap();
        assert_eq!(merged.conflicts, ids.len());
        store
    }

    fn key(id: &str) -> RecordKey {
        RecordKey::new("jobs", id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_local_queues_overwrite_on_top_of_remote() {
        let store = conflicted_store(&["A"]).await;
        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepLocal).unwrap();

        let report = store.resolve(batch).await.unwrap();
        assert!(report.is_complete());

        let record = store.get(&key("A")).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({ "price": 75 }));
        assert_eq!(record.base_version, 105);
        assert!(record.updated_at > 105);

        let queued = store.pending_operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, OperationKind::Upsert);
        assert_eq!(queued[0].payload, Some(json!({ "price": 75 })));
        assert_eq!(Some(queued[0].operation_id), report.resolved[0].operation_id);
        assert!(store.conflicts().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_remote_discards_local_edit() {
        let store = conflicted_store(&["A"]).await;
        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepRemote).unwrap();

        store.resolve(batch).await.unwrap();

        let record = store.get(&key("A")).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({ "price": 60 }));
        assert_eq!((record.updated_at, record.base_version), (105, 105));
        assert!(store.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_both_creates_linked_duplicate() {
        let store = conflicted_store(&["A"]).await;
        let mut events = store.subscribe();
        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepBoth).unwrap();

        let report = store.resolve(batch).await.unwrap();
        let duplicate = report.resolved[0].duplicate.clone().unwrap();

        assert_eq!(duplicate.payload, json!({ "price": 75 }));
        assert_eq!(duplicate.duplicate_of, Some(RecordId::from("A")));
        assert_ne!(duplicate.id, RecordId::from("A"));
        assert!(duplicate.has_pending_changes());

        let original = store.get(&key("A")).await.unwrap().unwrap();
        assert_eq!(original.payload, json!({ "price": 60 }));

        let queued = store.pending_operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].record_id, duplicate.id);

        let mut resolved = None;
        while let Ok(event) = events.try_recv() {
            if let StoreEvent::ConflictResolved { duplicate, .. } = event {
                resolved = duplicate;
            }
        }
        assert_eq!(resolved, Some(duplicate.key()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keep_both_on_local_delete_keeps_remote_without_duplicate() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .merge_from_remote("jobs", &[remote("A", 50, 100)], None)
            .await
            .unwrap();
        store.apply(Mutation::delete("jobs", "A")).await.unwrap();
        let merged = store
            .merge_from_remote("jobs", &[remote("A", 60, 105)], None)
            .await
            .unwrap();
        assert_eq!(merged.conflicts, 1);

        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepBoth).unwrap();
        let report = store.resolve(batch).await.unwrap();

        let outcome = &report.resolved[0];
        assert_eq!(outcome.duplicate, None);
        assert_eq!(outcome.operation_id, None);

        let records = store.list("jobs").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, json!({ "price": 60 }));
        assert!(!records[0].deleted);
        assert!(store.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn converged_pull_closes_conflict_and_keeps_newer_version() {
        let store = conflicted_store(&["A"]).await;

        // The remote later takes the same value as the local edit
        let merged = store
            .merge_from_remote("jobs", &[remote("A", 75, 110)], None)
            .await
            .unwrap();
        assert_eq!(merged.converged, 1);
        assert_eq!(merged.cleared, 1);
        assert!(store.conflicts().await.unwrap().is_empty());

        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepRemote).unwrap();
        let err = store.resolve(batch).await.unwrap_err();
        assert!(matches!(err, Error::UnknownConflict(_)));

        let record = store.get(&key("A")).await.unwrap().unwrap();
        assert_eq!(record.payload, json!({ "price": 75 }));
        assert_eq!(record.base_version, 110);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn decisions_never_roll_back_a_newer_synced_version() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .merge_from_remote("jobs", &[remote("A", 75, 110)], None)
            .await
            .unwrap();
        let current = store.get(&key("A")).await.unwrap().unwrap();
        let outdated = Conflict {
            collection: "jobs".to_string(),
            record_id: RecordId::from("A"),
            local: current.clone(),
            remote: remote("A", 60, 105).to_record(),
            detected_at: 0,
        };

        let db = store.lock().await;
        for decision in [Decision::KeepRemote, Decision::KeepBoth] {
            let outcome = apply_decision(db.connection(), &outdated, decision)
                .await
                .unwrap();
            assert_eq!(outcome.record, current);
            assert_eq!(outcome.duplicate, None);
        }

        let outcome = apply_decision(db.connection(), &outdated, Decision::KeepLocal)
            .await
            .unwrap();
        assert_eq!(outcome.record.base_version, 110);
        assert!(outcome.record.updated_at > 110);
        assert_eq!(outcome.record.payload, json!({ "price": 75 }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partial_batch_leaves_undecided_conflicts_open() {
        let store = conflicted_store(&["A", "B", "C"]).await;
        let mut batch = ResolutionBatch::new();
        batch.decide(key("B"), Decision::KeepRemote).unwrap();

        let report = store.resolve(batch).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.unresolved, vec![key("A"), key("C")]);

        let open = store.conflicted_keys().await.unwrap();
        assert_eq!(open, [key("A"), key("C")].into_iter().collect());
        // Undecided records keep their local edit
        let a = store.get(&key("A")).await.unwrap().unwrap();
        assert_eq!(a.payload, json!({ "price": 75 }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_conflict_rejects_whole_batch() {
        let store = conflicted_store(&["A"]).await;
        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepRemote).unwrap();
        batch.decide(key("missing"), Decision::KeepLocal).unwrap();

        let err = store.resolve(batch).await.unwrap_err();
        assert!(matches!(err, Error::UnknownConflict(_)));
        assert_eq!(store.conflicts().await.unwrap().len(), 1);
    }

    #[test]
    fn batch_accepts_one_decision_per_conflict() {
        let mut batch = ResolutionBatch::new();
        batch.decide(key("A"), Decision::KeepLocal).unwrap();
        assert!(batch.decide(key("A"), Decision::KeepRemote).is_err());
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn needs_attention_lists_failed_operations_with_records() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = store
            .apply(Mutation::create("jobs", json!({ "price": 1 })))
            .await
            .unwrap();
        let operation = store.pending_operations().await.unwrap().remove(0);
        store.mark_failed(&operation, "payload rejected").await.unwrap();

        let items = store.needs_attention().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].operation.last_error.as_deref(), Some("payload rejected"));
        assert_eq!(items[0].record.as_ref(), Some(&record));

        assert_eq!(store.retry_failed(Some(&operation.operation_id)).await.unwrap(), 1);
        assert!(store.needs_attention().await.unwrap().is_empty());
    }
}
