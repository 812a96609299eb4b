//! Local read model.
//!
//! `LocalStore` is the only writer of the local database. Every
//! read-modify-write runs inside one transaction while holding the database
//! lock, so application mutations, pull merges, push acknowledgements and
//! resolutions never interleave on the same record.

mod events;

pub use events::StoreEvent;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};

use crate::db::{
    Database, LibSqlConflictRepository, LibSqlCursorRepository, LibSqlOperationQueue,
    LibSqlRecordRepository, OperationQueue, RecordRepository,
};
use crate::detector::{detect, Verdict};
use crate::error::{Error, Result};
use crate::models::{
    Conflict, Mutation, Operation, OperationId, OperationStatus, Record, RecordId, RecordKey,
    SyncCursor,
};
use crate::sync::StoredRecord;
use crate::util::now_millis;

const EVENT_CAPACITY: usize = 256;

/// Outcome of merging one page of remote records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub adopted: usize,
    pub skipped: usize,
    /// Queued operations confirmed by their echo in the change feed
    pub acknowledged: usize,
    pub converged: usize,
    pub conflicts: usize,
    /// Open conflicts dropped because the remote reached the local value
    pub cleared: usize,
}

impl MergeReport {
    pub fn absorb(&mut self, other: Self) {
        self.adopted += other.adopted;
        self.skipped += other.skipped;
        self.acknowledged += other.acknowledged;
        self.converged += other.converged;
        self.conflicts += other.conflicts;
        self.cleared += other.cleared;
    }
}

/// Point-in-time view of local sync state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub pending_operations: usize,
    pub failed_operations: usize,
    pub open_conflicts: usize,
    pub unsynced_records: usize,
    pub live_records: usize,
    pub cursors: BTreeMap<String, SyncCursor>,
    /// When a pull last advanced a cursor (Unix ms)
    pub last_pull_at: Option<i64>,
}

/// Thread-safe handle to the local replica.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalStore {
    /// Open the local replica at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and replaced by a fresh
    /// replica; the next pull then starts from scratch.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };

        Ok(Self::with_database(db, Some(db_path)))
    }

    /// Open an in-memory replica (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self::with_database(db, None))
    }

    fn with_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            events,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Receive change notifications committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().await
    }

    pub(crate) fn emit_all(&self, events: impl IntoIterator<Item = StoreEvent>) {
        for event in events {
            // No subscribers is fine
            self.events.send(event).ok();
        }
    }

    /// Fetch a record, tombstones included.
    pub async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let db = self.lock().await;
        LibSqlRecordRepository::new(db.connection()).get(key).await
    }

    /// Live records of a collection, most recently updated first.
    pub async fn list(&self, collection: &str) -> Result<Vec<Record>> {
        let db = self.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(collection, None)
            .await
    }

    /// Collections that hold at least one local record.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let db = self.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .collections()
            .await
    }

    /// Apply an application mutation.
    ///
    /// The record and its queue entry commit together; on return the new
    /// value is visible to `get`. An error means nothing was registered.
    pub async fn apply(&self, mutation: Mutation) -> Result<Record> {
        mutation.validate()?;

        let (record, operation) = {
            let db = self.lock().await;
            apply_mutation(db.connection(), mutation)
                .await
                .map_err(storage_failure)?
        };

        let mut events = vec![StoreEvent::RecordChanged {
            record: record.clone(),
        }];
        if let Some(operation) = operation {
            tracing::debug!(
                operation_id = %operation.operation_id,
                key = %record.key(),
                kind = operation.kind.as_str(),
                "Queued local mutation"
            );
            events.push(StoreEvent::OperationQueued {
                operation_id: operation.operation_id,
                key: record.key(),
            });
        }
        self.emit_all(events);

        Ok(record)
    }

    /// Merge one page of remote records and advance the collection cursor.
    ///
    /// The page, the conflicts it raises and the cursor commit in one
    /// transaction. Records with unsynced local edits are only touched
    /// through the conflict detector.
    pub async fn merge_from_remote(
        &self,
        collection: &str,
        records: &[StoredRecord],
        next_cursor: Option<&SyncCursor>,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        let mut events = Vec::new();
        let now = now_millis();

        {
            let db = self.lock().await;
            let tx = db.connection().transaction().await?;
            let repo = LibSqlRecordRepository::new(&tx);
            let queue = LibSqlOperationQueue::new(&tx);
            let conflicts = LibSqlConflictRepository::new(&tx);

            for remote in records {
                let key = remote.key();
                let local = repo.get(&key).await?;
                let pending = queue.list_for_record(&key).await?;

                let settled = match detect(local.as_ref(), remote, &pending) {
                    Verdict::Adopt => {
                        let record = adopt(local.as_ref(), remote);
                        repo.upsert(&record).await?;
                        events.push(StoreEvent::RecordChanged { record });
                        report.adopted += 1;
                        true
                    }
                    Verdict::Skip => {
                        report.skipped += 1;
                        false
                    }
                    Verdict::Echo { through } => {
                        let confirmed = pending
                            .iter()
                            .filter(|op| op.sequence <= through)
                            .collect::<Vec<_>>();
                        queue.remove_through(&key, through).await?;
                        let record = settle(&tx, local, remote).await?;
                        for op in &confirmed {
                            events.push(StoreEvent::OperationAcknowledged {
                                operation_id: op.operation_id,
                                key: key.clone(),
                                updated_at: remote.updated_at,
                            });
                        }
                        events.push(StoreEvent::RecordChanged { record });
                        report.acknowledged += confirmed.len();
                        true
                    }
                    Verdict::Converged => {
                        queue.remove_for_record(&key).await?;
                        let record = adopt(local.as_ref(), remote);
                        repo.upsert(&record).await?;
                        events.push(StoreEvent::RecordChanged { record });
                        report.converged += 1;
                        true
                    }
                    Verdict::Conflict => {
                        let Some(local) = local else {
                            continue;
                        };
                        let open = conflicts.get(&key).await?;
                        if open.is_some_and(|open| open.remote.updated_at >= remote.updated_at) {
                            // Already waiting on a decision for this remote version
                            report.skipped += 1;
                            continue;
                        }
                        let conflict = Conflict {
                            collection: key.collection.clone(),
                            record_id: key.id.clone(),
                            local,
                            remote: remote.to_record(),
                            detected_at: now,
                        };
                        // Queued operations are superseded by the conflict
                        queue.remove_for_record(&key).await?;
                        conflicts.upsert(&conflict).await?;
                        tracing::info!(
                            key = %key,
                            fields = ?conflict.differing_fields(),
                            "Detected conflict"
                        );
                        events.push(StoreEvent::ConflictDetected { conflict });
                        report.conflicts += 1;
                        false
                    }
                };

                // An open conflict is moot once the remote caught up with the record
                if settled && conflicts.remove(&key).await? {
                    tracing::info!(key = %key, "Cleared conflict settled by the remote");
                    events.push(StoreEvent::ConflictCleared { key });
                    report.cleared += 1;
                }
            }

            if let Some(cursor) = next_cursor {
                LibSqlCursorRepository::new(&tx)
                    .set(collection, cursor, now)
                    .await?;
                events.push(StoreEvent::CursorAdvanced {
                    collection: collection.to_string(),
                    cursor: cursor.clone(),
                });
            }

            tx.commit().await?;
        }

        self.emit_all(events);
        Ok(report)
    }

    /// Settle a queued operation the remote has confirmed.
    ///
    /// Returns `false` if the operation had already left the queue (echoed
    /// by a pull or turned into a conflict).
    pub async fn acknowledge(&self, operation: &Operation, stored: &StoredRecord) -> Result<bool> {
        let key = operation.record_key();
        let record = {
            let db = self.lock().await;
            let tx = db.connection().transaction().await?;
            if !LibSqlOperationQueue::new(&tx)
                .remove(&operation.operation_id)
                .await?
            {
                return Ok(false);
            }
            let local = LibSqlRecordRepository::new(&tx).get(&key).await?;
            let record = settle(&tx, local, stored).await?;
            tx.commit().await?;
            record
        };

        self.emit_all([
            StoreEvent::OperationAcknowledged {
                operation_id: operation.operation_id,
                key,
                updated_at: stored.updated_at,
            },
            StoreEvent::RecordChanged { record },
        ]);
        Ok(true)
    }

    /// Record a retryable delivery failure.
    pub async fn record_retry(
        &self,
        operation_id: &OperationId,
        error: &str,
        next_attempt_at: i64,
    ) -> Result<()> {
        let db = self.lock().await;
        match LibSqlOperationQueue::new(db.connection())
            .record_retry(operation_id, error, next_attempt_at)
            .await
        {
            Err(Error::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// Flag an operation the remote refused; it waits for `retry_failed`.
    pub async fn mark_failed(&self, operation: &Operation, error: &str) -> Result<()> {
        {
            let db = self.lock().await;
            match LibSqlOperationQueue::new(db.connection())
                .mark_failed(&operation.operation_id, error)
                .await
            {
                Err(Error::NotFound(_)) => return Ok(()),
                other => other?,
            }
        }

        self.emit_all([StoreEvent::OperationFailed {
            operation_id: operation.operation_id,
            key: operation.record_key(),
            error: error.to_string(),
        }]);
        Ok(())
    }

    /// All queued operations in FIFO order.
    pub async fn pending_operations(&self) -> Result<Vec<Operation>> {
        let db = self.lock().await;
        LibSqlOperationQueue::new(db.connection()).list_all().await
    }

    pub async fn failed_operations(&self) -> Result<Vec<Operation>> {
        let db = self.lock().await;
        LibSqlOperationQueue::new(db.connection())
            .list_failed()
            .await
    }

    /// Return failed operations to the queue. `None` re-arms all of them.
    pub async fn rearm_failed(&self, operation_id: Option<&OperationId>) -> Result<u64> {
        let db = self.lock().await;
        let queue = LibSqlOperationQueue::new(db.connection());
        match operation_id {
            Some(operation_id) => {
                let operation = queue
                    .get(operation_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("operation {operation_id}")))?;
                if operation.status != OperationStatus::Failed {
                    return Ok(0);
                }
                queue.rearm(operation_id).await?;
                Ok(1)
            }
            None => queue.rearm_all_failed().await,
        }
    }

    pub async fn conflicts(&self) -> Result<Vec<Conflict>> {
        let db = self.lock().await;
        LibSqlConflictRepository::new(db.connection()).list().await
    }

    pub async fn conflict(&self, key: &RecordKey) -> Result<Option<Conflict>> {
        let db = self.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .get(key)
            .await
    }

    /// Records that are blocked on an open conflict.
    pub async fn conflicted_keys(&self) -> Result<HashSet<RecordKey>> {
        Ok(self
            .conflicts()
            .await?
            .iter()
            .map(Conflict::key)
            .collect())
    }

    pub async fn cursor(&self, collection: &str) -> Result<Option<SyncCursor>> {
        let db = self.lock().await;
        LibSqlCursorRepository::new(db.connection())
            .get(collection)
            .await
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        let db = self.lock().await;
        let conn = db.connection();
        let queue = LibSqlOperationQueue::new(conn);
        let records = LibSqlRecordRepository::new(conn);
        let cursors = LibSqlCursorRepository::new(conn);

        Ok(StoreStatus {
            pending_operations: queue.count(Some(OperationStatus::Pending)).await?,
            failed_operations: queue.count(Some(OperationStatus::Failed)).await?,
            open_conflicts: LibSqlConflictRepository::new(conn).count().await?,
            unsynced_records: records.count_unsynced().await?,
            live_records: records.count_live().await?,
            cursors: cursors.list().await?.into_iter().collect(),
            last_pull_at: cursors.last_updated().await?,
        })
    }

    /// Physically remove tombstones the remote confirmed before `cutoff`.
    pub async fn prune_tombstones(&self, cutoff: i64) -> Result<u64> {
        let db = self.lock().await;
        let removed = LibSqlRecordRepository::new(db.connection())
            .prune_tombstones(cutoff)
            .await?;
        if removed > 0 {
            tracing::debug!("Pruned {removed} confirmed tombstones");
        }
        Ok(removed)
    }
}

async fn apply_mutation(
    conn: &libsql::Connection,
    mutation: Mutation,
) -> Result<(Record, Option<Operation>)> {
    let tx = conn.transaction().await?;
    let repo = LibSqlRecordRepository::new(&tx);
    let now = now_millis();

    let (record, operation) = match mutation {
        Mutation::Upsert {
            collection,
            id,
            payload,
        } => {
            let id = id.unwrap_or_else(RecordId::generate);
            let key = RecordKey::new(collection.clone(), id.clone());
            let record = match repo.get(&key).await? {
                Some(existing) => Record {
                    payload: payload.clone(),
                    updated_at: existing.next_local_timestamp(now),
                    deleted: false,
                    ..existing
                },
                None => Record {
                    id: id.clone(),
                    collection: collection.clone(),
                    payload: payload.clone(),
                    updated_at: now,
                    base_version: 0,
                    deleted: false,
                    duplicate_of: None,
                },
            };
            (record, Operation::upsert(collection, id, payload))
        }
        Mutation::Delete { collection, id } => {
            let key = RecordKey::new(collection.clone(), id.clone());
            let existing = repo
                .get(&key)
                .await?
                .ok_or_else(|| Error::NotFound(format!("record {key}")))?;
            if existing.deleted {
                return Ok((existing, None));
            }
            let record = Record {
                updated_at: existing.next_local_timestamp(now),
                deleted: true,
                ..existing
            };
            (record, Operation::delete(collection, id))
        }
    };

    repo.upsert(&record).await?;
    let operation = LibSqlOperationQueue::new(&tx).enqueue(&operation).await?;
    tx.commit().await?;
    Ok((record, Some(operation)))
}

/// Local form of a remote version that replaces local state entirely.
fn adopt(local: Option<&Record>, remote: &StoredRecord) -> Record {
    Record {
        duplicate_of: local.and_then(|local| local.duplicate_of.clone()),
        ..remote.to_record()
    }
}

/// Fold a confirmed remote version into the local record.
///
/// With no operations left the record becomes fully synced. Otherwise the
/// base advances and the later local edits stay pending on top of it.
async fn settle(
    conn: &libsql::Connection,
    local: Option<Record>,
    stored: &StoredRecord,
) -> Result<Record> {
    let key = stored.key();
    let remaining = LibSqlOperationQueue::new(conn)
        .list_for_record(&key)
        .await?;

    let record = match local {
        Some(local) if !remaining.is_empty() => {
            let base_version = stored.updated_at.max(local.base_version);
            Record {
                base_version,
                updated_at: local.updated_at.max(base_version + 1),
                ..local
            }
        }
        local => adopt(local.as_ref(), stored),
    };

    LibSqlRecordRepository::new(conn).upsert(&record).await?;
    Ok(record)
}

/// Failures of the local database surface as storage errors to callers of `apply`.
fn storage_failure(error: Error) -> Error {
    match error {
        Error::LibSql(error) => Error::Storage(error.to_string()),
        Error::Io(error) => Error::Storage(error.to_string()),
        other => other,
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    error
        .to_string()
        .to_ascii_lowercase()
        .contains("file is not a database")
}

fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };

    if db_path.exists() {
        let timestamp = now_millis();
        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));
        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted local DB file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    let sidecar_prefix = format!("{base_name}-");

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&sidecar_prefix) {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale local DB file {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn stored(id: &str, payload: serde_json::Value, updated_at: i64) -> StoredRecord {
        StoredRecord {
            collection: "jobs".to_string(),
            id: RecordId::from(id),
            payload,
            updated_at,
            deleted: false,
            operation_id: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_is_visible_immediately_and_queued() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let record = store
            .apply(Mutation::create("jobs", json!({ "price": 50 })))
            .await
            .unwrap();

        let fetched = store.get(&record.key()).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert!(fetched.has_pending_changes());
        assert_eq!(fetched.base_version, 0);

        let queued = store.pending_operations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].record_id, record.id);
        assert_eq!(queued[0].kind, OperationKind::Upsert);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_rejects_invalid_mutations_without_side_effects() {
        let store = LocalStore::open_in_memory().await.unwrap();

        assert!(store
            .apply(Mutation::create("jobs", json!(["not", "an", "object"])))
            .await
            .is_err());
        assert!(matches!(
            store.apply(Mutation::delete("jobs", "missing")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store
                .apply(Mutation::upsert("jobs", " ", json!({ "price": 1 })))
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(store.list("jobs").await.unwrap().is_empty());
        assert!(store.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_keeps_tombstone_and_is_idempotent() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let record = store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 50 })))
            .await
            .unwrap();

        let deleted = store.apply(Mutation::delete("jobs", "A")).await.unwrap();
        assert!(deleted.deleted);
        assert!(deleted.updated_at > record.updated_at);
        assert!(store.list("jobs").await.unwrap().is_empty());

        store.apply(Mutation::delete("jobs", "A")).await.unwrap();
        assert_eq!(store.pending_operations().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clean_merge_adopts_remote_and_advances_cursor() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let cursor = SyncCursor::new("3");

        let report = store
            .merge_from_remote("jobs", &[stored("A", json!({ "price": 60 }), 105)], Some(&cursor))
            .await
            .unwrap();

        assert_eq!(report.adopted, 1);
        let record = store.get(&RecordKey::new("jobs", "A")).await.unwrap().unwrap();
        assert_eq!(record.updated_at, 105);
        assert_eq!(record.base_version, 105);
        assert_eq!(store.cursor("jobs").await.unwrap(), Some(cursor));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn divergent_merge_opens_conflict_and_keeps_local() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .merge_from_remote("jobs", &[stored("A", json!({ "price": 50 }), 100)], None)
            .await
            .unwrap();
        store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 75 })))
            .await
            .unwrap();

        let report = store
            .merge_from_remote("jobs", &[stored("A", json!({ "price": 60 }), 105)], None)
            .await
            .unwrap();

        assert_eq!(report.conflicts, 1);
        let key = RecordKey::new("jobs", "A");
        let local = store.get(&key).await.unwrap().unwrap();
        assert_eq!(local.payload, json!({ "price": 75 }));
        assert_eq!(local.base_version, 100);

        let conflict = store.conflict(&key).await.unwrap().unwrap();
        assert_eq!(conflict.remote.payload, json!({ "price": 60 }));
        assert_eq!(conflict.remote.updated_at, 105);
        assert!(store.pending_operations().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn acknowledge_keeps_later_edits_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 50 })))
            .await
            .unwrap();
        store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 75 })))
            .await
            .unwrap();

        let queued = store.pending_operations().await.unwrap();
        let mut confirmed = stored("A", json!({ "price": 50 }), 200);
        confirmed.operation_id = Some(queued[0].operation_id);
        assert!(store.acknowledge(&queued[0], &confirmed).await.unwrap());

        let key = RecordKey::new("jobs", "A");
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.base_version, 200);
        assert!(record.has_pending_changes());
        assert_eq!(record.payload, json!({ "price": 75 }));

        let mut last = stored("A", json!({ "price": 75 }), 210);
        last.operation_id = Some(queued[1].operation_id);
        assert!(store.acknowledge(&queued[1], &last).await.unwrap());
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!((record.updated_at, record.base_version), (210, 210));

        // A second acknowledgement of the same operation is a no-op
        assert!(!store.acknowledge(&queued[1], &last).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn events_follow_commits() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let mut events = store.subscribe();

        let record = store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 50 })))
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::RecordChanged {
                record: record.clone()
            }
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            StoreEvent::OperationQueued { key, .. } if key == record.key()
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_operations_can_be_rearmed() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store
            .apply(Mutation::upsert("jobs", "A", json!({ "price": 50 })))
            .await
            .unwrap();
        let op = store.pending_operations().await.unwrap().remove(0);

        store.mark_failed(&op, "payload rejected").await.unwrap();
        let status = store.status().await.unwrap();
        assert_eq!(status.failed_operations, 1);
        assert_eq!(status.pending_operations, 0);

        assert_eq!(store.rearm_failed(Some(&op.operation_id)).await.unwrap(), 1);
        assert_eq!(store.rearm_failed(None).await.unwrap(), 0);
        assert_eq!(store.status().await.unwrap().pending_operations, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreadable_database_is_moved_aside() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("fieldsync.db");
        std::fs::write(&db_path, vec![b'x'; 4096]).unwrap();

        let store = LocalStore::open(&db_path).await.unwrap();
        assert!(store.pending_operations().await.unwrap().is_empty());

        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("fieldsync.db.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn quarantine_moves_db_and_removes_sidecars() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("fieldsync.db");
        let wal_path = tmp.path().join("fieldsync.db-wal");
        let shm_path = tmp.path().join("fieldsync.db-shm");
        let unrelated = tmp.path().join("other.db");

        std::fs::write(&db_path, b"bad-db").unwrap();
        std::fs::write(&wal_path, b"wal").unwrap();
        std::fs::write(&shm_path, b"shm").unwrap();
        std::fs::write(&unrelated, b"keep").unwrap();

        quarantine_corrupted_db_files(&db_path).unwrap();

        assert!(!db_path.exists());
        assert!(!wal_path.exists());
        assert!(!shm_path.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn detects_corrupted_db_errors() {
        assert!(is_corrupted_db_error(&Error::Database(
            "SQLite failure: file is not a database".to_string()
        )));
        assert!(!is_corrupted_db_error(&Error::InvalidInput(
            "payload must be an object".to_string()
        )));
    }
}
