//! Local read model repository

use crate::error::Result;
use crate::models::{Record, RecordKey};
use libsql::{Connection, Row};

use super::opt_text;

const RECORD_COLUMNS: &str =
    "collection, id, payload, updated_at, base_version, is_deleted, duplicate_of";

/// Trait for record storage operations
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Get a record by key, tombstones included
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>>;

    /// Live records of a collection, most recently updated first
    async fn list(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Record>>;

    /// Insert or fully replace a record
    async fn upsert(&self, record: &Record) -> Result<()>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_record(row: &Row) -> Result<Record> {
        let payload: String = row.get(2)?;
        let duplicate_of: Option<String> = row.get(6)?;
        Ok(Record {
            collection: row.get(0)?,
            id: row.get::<String>(1)?.parse()?,
            payload: serde_json::from_str(&payload)?,
            updated_at: row.get(3)?,
            base_version: row.get(4)?,
            deleted: row.get::<i32>(5)? != 0,
            duplicate_of: duplicate_of.map(|id| id.as_str().into()),
        })
    }

    /// Collections that hold at least one record
    pub async fn collections(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT collection FROM records ORDER BY collection",
                (),
            )
            .await?;
        let mut collections = Vec::new();
        while let Some(row) = rows.next().await? {
            collections.push(row.get(0)?);
        }
        Ok(collections)
    }

    /// Number of live records across collections
    pub async fn count_live(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM records WHERE is_deleted = 0", ())
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Number of records carrying edits the remote has not confirmed
    pub async fn count_unsynced(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM records WHERE updated_at > base_version",
                (),
            )
            .await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Delete synced tombstones older than `cutoff`.
    ///
    /// Tombstones that still have queued operations or an open conflict are kept.
    pub async fn prune_tombstones(&self, cutoff: i64) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM records
                 WHERE is_deleted = 1
                   AND updated_at = base_version
                   AND updated_at < ?
                   AND NOT EXISTS (
                       SELECT 1 FROM operations o
                       WHERE o.collection = records.collection AND o.record_id = records.id
                   )
                   AND NOT EXISTS (
                       SELECT 1 FROM conflicts c
                       WHERE c.collection = records.collection AND c.record_id = records.id
                   )",
                [cutoff],
            )
            .await?;
        Ok(removed)
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn get(&self, key: &RecordKey) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?");
        let mut rows = self
            .conn
            .query(&sql, [key.collection.as_str(), key.id.as_str()])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, collection: &str, limit: Option<usize>) -> Result<Vec<Record>> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE collection = ? AND is_deleted = 0
             ORDER BY updated_at DESC, id ASC
             LIMIT ?"
        );
        let mut rows = self
            .conn
            .query(&sql, libsql::params![collection, limit])
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }

    async fn upsert(&self, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        self.conn
            .execute(
                "INSERT INTO records (
                    collection, id, payload, updated_at, base_version, is_deleted, duplicate_of
                 ) VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    payload = excluded.payload,
                    updated_at = excluded.updated_at,
                    base_version = excluded.base_version,
                    is_deleted = excluded.is_deleted,
                    duplicate_of = excluded.duplicate_of",
                libsql::params![
                    record.collection.as_str(),
                    record.id.as_str(),
                    payload,
                    record.updated_at,
                    record.base_version,
                    i64::from(record.deleted),
                    opt_text(record.duplicate_of.as_ref().map(|id| id.to_string())),
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::RecordId;
    use serde_json::json;

    fn record(id: &str, updated_at: i64, base_version: i64) -> Record {
        Record {
            id: RecordId::from(id),
            collection: "jobs".to_string(),
            payload: json!({ "price": 50 }),
            updated_at,
            base_version,
            deleted: false,
            duplicate_of: None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upsert_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut rec = record("A", 100, 100);
        repo.upsert(&rec).await.unwrap();
        assert_eq!(repo.get(&rec.key()).await.unwrap(), Some(rec.clone()));

        rec.payload = json!({ "price": 75 });
        rec.updated_at = 120;
        rec.duplicate_of = Some(RecordId::from("Z"));
        repo.upsert(&rec).await.unwrap();
        assert_eq!(repo.get(&rec.key()).await.unwrap(), Some(rec));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_missing_returns_none() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let result = repo.get(&RecordKey::new("jobs", "nope")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_hides_tombstones_and_orders_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        repo.upsert(&record("A", 100, 100)).await.unwrap();
        repo.upsert(&record("B", 300, 300)).await.unwrap();
        let mut gone = record("C", 200, 200);
        gone.deleted = true;
        repo.upsert(&gone).await.unwrap();

        let listed = repo.list("jobs", None).await.unwrap();
        let ids = listed.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B", "A"]);
        assert_eq!(repo.count_live().await.unwrap(), 2);
        assert!(repo.list("leads", Some(10)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prune_only_synced_old_tombstones() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut synced = record("A", 100, 100);
        synced.deleted = true;
        repo.upsert(&synced).await.unwrap();

        let mut unsynced = record("B", 110, 100);
        unsynced.deleted = true;
        repo.upsert(&unsynced).await.unwrap();

        let mut recent = record("C", 900, 900);
        recent.deleted = true;
        repo.upsert(&recent).await.unwrap();

        assert_eq!(repo.prune_tombstones(500).await.unwrap(), 1);
        assert!(repo.get(&synced.key()).await.unwrap().is_none());
        assert!(repo.get(&unsynced.key()).await.unwrap().is_some());
        assert!(repo.get(&recent.key()).await.unwrap().is_some());
        assert_eq!(repo.count_unsynced().await.unwrap(), 1);
    }
}
