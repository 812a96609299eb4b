//! Push/pull reconciliation between the local store and the remote.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::slice;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;

use super::backoff::{next_attempt_at, retry_delay};
use super::remote::{DeleteRequest, RemoteError, RemoteStore, UpsertRequest};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{Operation, OperationKind, RecordKey, SyncCursor};
use crate::store::{LocalStore, MergeReport};
use crate::util::now_millis;

/// Outcome of one push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub acknowledged: usize,
    /// Transient failures scheduled for retry
    pub retrying: usize,
    /// Non-retryable rejections, now awaiting attention
    pub failed: usize,
    /// Records turned into conflicts by the remote's version check
    pub conflicts: usize,
    /// Operations held back by backoff, an earlier failure or an open conflict
    pub deferred: usize,
}

impl PushReport {
    fn absorb(&mut self, other: Self) {
        self.acknowledged += other.acknowledged;
        self.retrying += other.retrying;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.deferred += other.deferred;
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    pub pages: usize,
    pub merged: MergeReport,
    /// Collections whose pull failed; their cursors did not move
    pub failed_collections: Vec<String>,
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
    pub pruned_tombstones: u64,
    pub full: bool,
    pub started_at: i64,
    pub finished_at: i64,
}

impl SyncReport {
    /// Whether part of the pass failed in a way a later pass can fix
    pub fn needs_retry(&self) -> bool {
        self.push.retrying > 0 || !self.pull.failed_collections.is_empty()
    }

    pub fn conflicts(&self) -> usize {
        self.push.conflicts + self.pull.merged.conflicts
    }
}

/// Drives push and pull for one local store.
#[derive(Clone)]
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self {
            store,
            remote,
            config,
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        Arc::clone(&self.remote)
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Push queued operations, then pull remote changes.
    pub async fn run_pass(&self) -> Result<SyncReport> {
        self.pass(false).await
    }

    /// Recovery pass: re-arm failed operations, push everything regardless
    /// of backoff, then pull every collection from the beginning.
    pub async fn force_full_sync(&self) -> Result<SyncReport> {
        let rearmed = self.store.rearm_failed(None).await?;
        if rearmed > 0 {
            tracing::warn!("Re-armed {rearmed} failed operations for a full sync");
        }
        self.pass(true).await
    }

    async fn pass(&self, full: bool) -> Result<SyncReport> {
        let started_at = now_millis();
        let push = self.push(full).await?;
        let pull = self.pull(full).await?;

        let cutoff = now_millis().saturating_sub(
            i64::try_from(self.config.tombstone_retention.as_millis()).unwrap_or(i64::MAX),
        );
        let pruned_tombstones = self.store.prune_tombstones(cutoff).await?;

        let report = SyncReport {
            push,
            pull,
            pruned_tombstones,
            full,
            started_at,
            finished_at: now_millis(),
        };
        tracing::info!(
            full,
            pushed = report.push.acknowledged,
            retrying = report.push.retrying,
            failed = report.push.failed,
            pulled = report.pull.merged.adopted,
            conflicts = report.conflicts(),
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Replay queued operations to the remote.
    ///
    /// Operations of one record go out strictly in queue order, one at a
    /// time; different records are pushed concurrently up to `max_in_flight`.
    /// `force` ignores backoff delays and the failed flag.
    pub async fn push(&self, force: bool) -> Result<PushReport> {
        let operations = self.store.pending_operations().await?;
        if operations.is_empty() {
            return Ok(PushReport::default());
        }
        let blocked = self.store.conflicted_keys().await?;

        let mut report = PushReport::default();
        let mut order = Vec::new();
        let mut groups: HashMap<RecordKey, Vec<Operation>> = HashMap::new();
        for operation in operations {
            let key = operation.record_key();
            if blocked.contains(&key) {
                report.deferred += 1;
                continue;
            }
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(operation);
        }

        let outcomes = stream::iter(
            order
                .into_iter()
                .filter_map(|key| groups.remove(&key))
                .map(|group| self.push_record(group, force)),
        )
        .buffer_unordered(self.config.max_in_flight.max(1))
        .collect::<Vec<_>>()
        .await;

        for outcome in outcomes {
            report.absorb(outcome?);
        }
        Ok(report)
    }

    /// Push one record's operations until the first one that does not succeed.
    async fn push_record(&self, operations: Vec<Operation>, force: bool) -> Result<PushReport> {
        let mut report = PushReport::default();
        let now = now_millis();
        let total = operations.len();

        for (index, operation) in operations.into_iter().enumerate() {
            if !force && (operation.is_failed() || !operation.is_due(now)) {
                report.deferred += total - index;
                break;
            }

            let key = operation.record_key();
            let Some(local) = self.store.get(&key).await? else {
                self.store
                    .mark_failed(&operation, "Local record is missing")
                    .await?;
                report.failed += 1;
                break;
            };

            match self.send(&operation, local.base_version).await {
                Ok(stored) => {
                    self.store.acknowledge(&operation, &stored).await?;
                    tracing::debug!(
                        operation_id = %operation.operation_id,
                        key = %key,
                        updated_at = stored.updated_at,
                        "Operation acknowledged"
                    );
                    report.acknowledged += 1;
                }
                Err(RemoteError::Conflict(current)) => {
                    let merged = self
                        .store
                        .merge_from_remote(&key.collection, slice::from_ref(current.as_ref()), None)
                        .await?;
                    report.conflicts += merged.conflicts;
                    report.acknowledged += merged.acknowledged;
                    break;
                }
                Err(error) if error.is_retryable() => {
                    let delay = retry_delay(
                        self.config.backoff_base,
                        self.config.backoff_max,
                        operation.retry_count,
                    );
                    tracing::warn!(
                        operation_id = %operation.operation_id,
                        key = %key,
                        retry_count = operation.retry_count + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Push failed, will retry: {error}"
                    );
                    self.store
                        .record_retry(
                            &operation.operation_id,
                            &error.to_string(),
                            next_attempt_at(now_millis(), delay),
                        )
                        .await?;
                    report.retrying += 1;
                    break;
                }
                Err(error) => {
                    tracing::error!(
                        operation_id = %operation.operation_id,
                        key = %key,
                        "Remote rejected operation: {error}"
                    );
                    self.store
                        .mark_failed(&operation, &error.to_string())
                        .await?;
                    report.failed += 1;
                    break;
                }
            }
        }

        Ok(report)
    }

    async fn send(
        &self,
        operation: &Operation,
        base_version: i64,
    ) -> std::result::Result<crate::sync::StoredRecord, RemoteError> {
        match operation.kind {
            OperationKind::Upsert => {
                let request = UpsertRequest {
                    collection: operation.collection.clone(),
                    record_id: operation.record_id.clone(),
                    operation_id: operation.operation_id,
                    // A missing payload is rejected by the remote rather than sent as empty
                    payload: operation.payload.clone().unwrap_or(Value::Null),
                    client_updated_at: operation.enqueued_at,
                    base_version,
                };
                self.timed(self.remote.upsert(request)).await
            }
            OperationKind::Delete => {
                let request = DeleteRequest {
                    collection: operation.collection.clone(),
                    record_id: operation.record_id.clone(),
                    operation_id: operation.operation_id,
                    base_version,
                };
                self.timed(self.remote.delete(request)).await
            }
        }
    }

    /// Bound a remote call by the request timeout.
    ///
    /// The call is dropped on timeout; replay by `operation_id` makes the
    /// unknown outcome safe to retry.
    async fn timed<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        tokio::time::timeout(self.config.request_timeout, call)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    /// Pull remote changes for every tracked collection.
    ///
    /// `full` ignores stored cursors and walks each feed from the beginning.
    pub async fn pull(&self, full: bool) -> Result<PullReport> {
        let mut report = PullReport::default();

        for collection in self.collections().await? {
            match self.pull_collection(&collection, full).await {
                Ok((pages, merged)) => {
                    report.pages += pages;
                    report.merged.absorb(merged);
                }
                Err(Error::Remote(error)) => {
                    tracing::warn!(collection = %collection, "Pull failed: {error}");
                    report.failed_collections.push(collection);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(report)
    }

    async fn pull_collection(&self, collection: &str, full: bool) -> Result<(usize, MergeReport)> {
        let mut cursor: Option<SyncCursor> = if full {
            None
        } else {
            self.store.cursor(collection).await?
        };
        let mut pages = 0;
        let mut merged = MergeReport::default();

        loop {
            let page = self
                .timed(
                    self.remote
                        .changes(collection, cursor.as_ref(), self.config.pull_page_size),
                )
                .await?;

            // Page and cursor commit together
            let report = self
                .store
                .merge_from_remote(collection, &page.records, page.next_cursor.as_ref())
                .await?;
            pages += 1;
            merged.absorb(report);

            if page.records.is_empty() || !page.has_more {
                break;
            }
            match page.next_cursor {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(collection, pages, adopted = merged.adopted, "Pulled collection");
        Ok((pages, merged))
    }

    /// Configured collections plus every collection present locally.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let mut collections = self
            .config
            .collections
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>();
        collections.extend(self.store.collections().await?);
        Ok(collections.into_iter().collect())
    }

    /// Earliest future moment a backed-off operation becomes due again.
    pub async fn next_retry_at(&self) -> Result<Option<i64>> {
        let now = now_millis();
        let blocked = self.store.conflicted_keys().await?;
        Ok(self
            .store
            .pending_operations()
            .await?
            .iter()
            .filter(|op| !op.is_failed() && !blocked.contains(&op.record_key()))
            .filter_map(|op| op.next_attempt_at)
            .filter(|at| *at > now)
            .min())
    }
}
