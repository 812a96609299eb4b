//! Open conflict and pull cursor storage

use crate::error::Result;
use crate::models::{Conflict, RecordKey, SyncCursor};
use libsql::{Connection, Row};

/// libSQL storage for open conflicts, at most one per record
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<Conflict> {
        let local: String = row.get(2)?;
        let remote: String = row.get(3)?;
        Ok(Conflict {
            collection: row.get(0)?,
            record_id: row.get::<String>(1)?.parse()?,
            local: serde_json::from_str(&local)?,
            remote: serde_json::from_str(&remote)?,
            detected_at: row.get(4)?,
        })
    }

    pub async fn get(&self, key: &RecordKey) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, record_id, local, remote, detected_at
                 FROM conflicts WHERE collection = ? AND record_id = ?",
                [key.collection.as_str(), key.id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    /// Open conflicts, oldest detection first
    pub async fn list(&self) -> Result<Vec<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, record_id, local, remote, detected_at
                 FROM conflicts ORDER BY detected_at ASC, collection ASC, record_id ASC",
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    /// Store a conflict, replacing any open conflict for the same record
    pub async fn upsert(&self, conflict: &Conflict) -> Result<()> {
        let local = serde_json::to_string(&conflict.local)?;
        let remote = serde_json::to_string(&conflict.remote)?;
        self.conn
            .execute(
                "INSERT INTO conflicts (collection, record_id, local, remote, detected_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(collection, record_id) DO UPDATE SET
                    local = excluded.local,
                    remote = excluded.remote,
                    detected_at = excluded.detected_at",
                libsql::params![
                    conflict.collection.as_str(),
                    conflict.record_id.as_str(),
                    local,
                    remote,
                    conflict.detected_at,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &RecordKey) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM conflicts WHERE collection = ? AND record_id = ?",
                [key.collection.as_str(), key.id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    pub async fn count(&self) -> Result<usize> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM conflicts", ()).await?;
        let count = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Per-collection pull cursors
pub struct LibSqlCursorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCursorRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, collection: &str) -> Result<Option<SyncCursor>> {
        let mut rows = self
            .conn
            .query(
                "SELECT cursor FROM sync_cursors WHERE collection = ?",
                [collection],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(SyncCursor::new(row.get::<String>(0)?))),
            None => Ok(None),
        }
    }

    pub async fn set(&self, collection: &str, cursor: &SyncCursor, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_cursors (collection, cursor, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(collection) DO UPDATE SET
                    cursor = excluded.cursor,
                    updated_at = excluded.updated_at",
                libsql::params![collection, cursor.as_str(), now],
            )
            .await?;
        Ok(())
    }

    /// All stored cursors, by collection name
    pub async fn list(&self) -> Result<Vec<(String, SyncCursor)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT collection, cursor FROM sync_cursors ORDER BY collection",
                (),
            )
            .await?;
        let mut cursors = Vec::new();
        while let Some(row) = rows.next().await? {
            cursors.push((row.get(0)?, SyncCursor::new(row.get::<String>(1)?)));
        }
        Ok(cursors)
    }

    /// Newest cursor write time, used as the last successful pull
    pub async fn last_updated(&self) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query("SELECT MAX(updated_at) FROM sync_cursors", ())
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Record, RecordId};
    use serde_json::json;

    fn conflict(id: &str, detected_at: i64) -> Conflict {
        let local = Record {
            id: RecordId::from(id),
            collection: "jobs".to_string(),
            payload: json!({ "price": 75 }),
            updated_at: 120,
            base_version: 100,
            deleted: false,
            duplicate_of: None,
        };
        let remote = Record {
            payload: json!({ "price": 80 }),
            updated_at: 130,
            base_version: 130,
            ..local.clone()
        };
        Conflict {
            collection: "jobs".to_string(),
            record_id: RecordId::from(id),
            local,
            remote,
            detected_at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_roundtrip_and_replace() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let first = conflict("A", 10);
        repo.upsert(&first).await.unwrap();
        assert_eq!(repo.get(&first.key()).await.unwrap(), Some(first.clone()));

        let mut newer = first.clone();
        newer.remote.payload = json!({ "price": 90 });
        newer.detected_at = 20;
        repo.upsert(&newer).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.list().await.unwrap(), vec![newer]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_remove() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        let open = conflict("A", 10);
        repo.upsert(&open).await.unwrap();
        assert!(repo.remove(&open.key()).await.unwrap());
        assert!(!repo.remove(&open.key()).await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cursor_set_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlCursorRepository::new(db.connection());

        assert!(repo.get("jobs").await.unwrap().is_none());
        assert!(repo.last_updated().await.unwrap().is_none());

        repo.set("jobs", &SyncCursor::new("4"), 100).await.unwrap();
        repo.set("jobs", &SyncCursor::new("9"), 200).await.unwrap();
        assert_eq!(repo.get("jobs").await.unwrap(), Some(SyncCursor::new("9")));
        assert_eq!(repo.last_updated().await.unwrap(), Some(200));

        repo.set("leads", &SyncCursor::new("2"), 150).await.unwrap();
        assert_eq!(
            repo.list().await.unwrap(),
            vec![
                ("jobs".to_string(), SyncCursor::new("9")),
                ("leads".to_string(), SyncCursor::new("2")),
            ]
        );
    }
}
