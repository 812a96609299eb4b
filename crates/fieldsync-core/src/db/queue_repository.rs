//! Durable operation queue backed by libSQL

use crate::error::{Error, Result};
use crate::models::{Operation, OperationId, OperationStatus, RecordKey};
use libsql::{Connection, Row};

use super::{opt_integer, opt_text};

const OPERATION_COLUMNS: &str = "seq, operation_id, collection, record_id, kind, payload, \
     enqueued_at, retry_count, last_error, status, next_attempt_at";

/// Durable, ordered store of pending mutations (async)
///
/// Every successful `enqueue` must be visible to `list_all` after a process
/// restart. Failures surface as errors; an operation is never dropped silently.
#[allow(async_fn_in_trait)]
pub trait OperationQueue {
    /// Append an operation and persist it
    async fn enqueue(&self, operation: &Operation) -> Result<Operation>;

    /// All queued operations in FIFO order
    async fn list_all(&self) -> Result<Vec<Operation>>;

    /// Delete one entry; returns whether it existed
    async fn remove(&self, operation_id: &OperationId) -> Result<bool>;

    /// Empty the queue
    async fn clear(&self) -> Result<()>;
}

/// libSQL implementation of `OperationQueue`
pub struct LibSqlOperationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOperationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an operation from a database row
    fn parse_operation(row: &Row) -> Result<Operation> {
        let operation_id: String = row.get(1)?;
        let kind: String = row.get(4)?;
        let payload: Option<String> = row.get(5)?;
        let retry_count: i64 = row.get(7)?;
        let status: String = row.get(9)?;

        Ok(Operation {
            sequence: row.get(0)?,
            operation_id: operation_id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid operation id: {operation_id}")))?,
            collection: row.get(2)?,
            record_id: row.get::<String>(3)?.parse()?,
            kind: kind.parse()?,
            payload: payload
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            enqueued_at: row.get(6)?,
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            last_error: row.get(8)?,
            status: status.parse()?,
            next_attempt_at: row.get(10)?,
        })
    }

    async fn query_operations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Operation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    /// Fetch one operation by id
    pub async fn get(&self, operation_id: &OperationId) -> Result<Option<Operation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE operation_id = ?");
        Ok(self
            .query_operations(&sql, [operation_id.as_str()])
            .await?
            .into_iter()
            .next())
    }

    /// Queued operations for one record, oldest first
    pub async fn list_for_record(&self, key: &RecordKey) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations
             WHERE collection = ? AND record_id = ?
             ORDER BY seq ASC"
        );
        self.query_operations(&sql, [key.collection.as_str(), key.id.as_str()])
            .await
    }

    /// Operations rejected by the remote
    pub async fn list_failed(&self) -> Result<Vec<Operation>> {
        let sql = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE status = 'failed' ORDER BY seq ASC"
        );
        self.query_operations(&sql, ()).await
    }

    /// Number of queued operations, optionally restricted to one status
    pub async fn count(&self, status: Option<OperationStatus>) -> Result<usize> {
        let mut rows = match status {
            Some(status) => {
                self.conn
                    .query(
                        "SELECT COUNT(*) FROM operations WHERE status = ?",
                        [status.as_str()],
                    )
                    .await?
            }
            None => self.conn.query("SELECT COUNT(*) FROM operations", ()).await?,
        };
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Record a retryable delivery failure and schedule the next attempt
    pub async fn record_retry(
        &self,
        operation_id: &OperationId,
        error: &str,
        next_attempt_at: i64,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations
                 SET retry_count = retry_count + 1, last_error = ?, next_attempt_at = ?
                 WHERE operation_id = ?",
                libsql::params![error, next_attempt_at, operation_id.as_str()],
            )
            .await?;
        Self::expect_one(rows, operation_id)
    }

    /// Flag an operation as rejected; it stays queued until re-armed
    pub async fn mark_failed(&self, operation_id: &OperationId, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations
                 SET status = 'failed', last_error = ?, next_attempt_at = NULL
                 WHERE operation_id = ?",
                libsql::params![error, operation_id.as_str()],
            )
            .await?;
        Self::expect_one(rows, operation_id)
    }

    /// Return a failed operation to the pending state with a fresh backoff
    pub async fn rearm(&self, operation_id: &OperationId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations
                 SET status = 'pending', retry_count = 0, next_attempt_at = NULL
                 WHERE operation_id = ?",
                [operation_id.as_str()],
            )
            .await?;
        Self::expect_one(rows, operation_id)
    }

    /// Re-arm every failed operation; returns how many were re-armed
    pub async fn rearm_all_failed(&self) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "UPDATE operations
                 SET status = 'pending', retry_count = 0, next_attempt_at = NULL
                 WHERE status = 'failed'",
                (),
            )
            .await?)
    }

    /// Remove all operations for a record
    pub async fn remove_for_record(&self, key: &RecordKey) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM operations WHERE collection = ? AND record_id = ?",
                [key.collection.as_str(), key.id.as_str()],
            )
            .await?)
    }

    /// Remove a record's operations up to and including `sequence`
    pub async fn remove_through(&self, key: &RecordKey, sequence: i64) -> Result<u64> {
        Ok(self
            .conn
            .execute(
                "DELETE FROM operations WHERE collection = ? AND record_id = ? AND seq <= ?",
                libsql::params![key.collection.as_str(), key.id.as_str(), sequence],
            )
            .await?)
    }

    fn expect_one(rows: u64, operation_id: &OperationId) -> Result<()> {
        if rows == 0 {
            Err(Error::NotFound(format!("operation {operation_id}")))
        } else {
            Ok(())
        }
    }
}

impl OperationQueue for LibSqlOperationQueue<'_> {
    async fn enqueue(&self, operation: &Operation) -> Result<Operation> {
        let payload = operation
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                "INSERT INTO operations (
                    operation_id, collection, record_id, kind, payload, enqueued_at,
                    retry_count, last_error, status, next_attempt_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                libsql::params![
                    operation.operation_id.as_str(),
                    operation.collection.as_str(),
                    operation.record_id.as_str(),
                    operation.kind.as_str(),
                    opt_text(payload),
                    operation.enqueued_at,
                    i64::from(operation.retry_count),
                    opt_text(operation.last_error.clone()),
                    operation.status.as_str(),
                    opt_integer(operation.next_attempt_at),
                ],
            )
            .await?;

        let mut stored = operation.clone();
        stored.sequence = self.conn.last_insert_rowid();
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<Operation>> {
        let sql = format!("SELECT {OPERATION_COLUMNS} FROM operations ORDER BY seq ASC");
        self.query_operations(&sql, ()).await
    }

    async fn remove(&self, operation_id: &OperationId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM operations WHERE operation_id = ?",
                [operation_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM operations", ()).await?;
        Ok(())
    }
}
