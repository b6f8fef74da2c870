//! SQLite-backed key/value store mirrored in memory

use crate::database::mirror::Mirror;
use crate::errors::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

type StoreResult<T> = std::result::Result<T, StorageError>;

/// SQL statements for one bucket table
#[derive(Debug, Clone)]
struct BucketQueries {
    create: String,
    select_all: String,
    upsert: String,
    delete: String,
}

impl BucketQueries {
    fn new(bucket: &str) -> Self {
        let table = format!("\"{}\"", bucket.replace('"', "\"\""));
        Self {
            create: format!(
                r#"CREATE TABLE IF NOT EXISTS {table} ("key" TEXT PRIMARY KEY NOT NULL, "value" BLOB NOT NULL)"#
            ),
            select_all: format!(r#"SELECT "key", "value" FROM {table}"#),
            upsert: format!(
                r#"INSERT INTO {table} ("key", "value") VALUES (?1, ?2)
                   ON CONFLICT("key") DO UPDATE SET "value" = excluded."value""#
            ),
            delete: format!(r#"DELETE FROM {table} WHERE "key" = ?1"#),
        }
    }
}

/// State shared with in-flight write tasks
#[derive(Debug)]
struct Shared {
    pool: SqlitePool,
    queries: BucketQueries,
    mirror: Mirror,
    write_gate: Mutex<()>,
}

impl Shared {
    async fn upsert(&self, key: String, content: Vec<u8>) -> StoreResult<bool> {
        let _guard = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.queries.upsert)
            .bind(key.as_str())
            .bind(content.as_slice())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let added = self.mirror.upsert(key.clone(), content);
        debug!("{} {}", if added { "added" } else { "updated" }, key);
        Ok(added)
    }

    async fn delete(&self, key: String) -> StoreResult<bool> {
        let _guard = self.write_gate.lock().await;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&self.queries.delete)
            .bind(key.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let removed = self.mirror.remove(&key);
        debug!("deleted {} (present: {})", key, removed);
        Ok(removed)
    }
}

/// Keyed store persisting JSON-encoded values in one bucket of a SQLite file
///
/// Reads are served from the in-memory mirror. Writes commit to SQLite first and
/// only then touch the mirror, one writer at a time, so a value visible in the
/// mirror is always already durable. Each write runs on its own task and finishes
/// even if the caller stops waiting for it.
#[derive(Debug)]
pub struct MirroredStore {
    bucket: String,
    shared: Arc<Shared>,
}

impl MirroredStore {
    /// Open (or create) `file_name` and load `bucket` into memory
    pub async fn open(file_name: &str, bucket: &str) -> StoreResult<Self> {
        if file_name.trim().is_empty() {
            return Err(StorageError::EmptyFileName);
        }
        if bucket.trim().is_empty() {
            return Err(StorageError::EmptyBucket);
        }

        let options = SqliteConnectOptions::new()
            .filename(file_name)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let queries = BucketQueries::new(bucket);
        sqlx::query(&queries.create).execute(&pool).await?;

        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as(&queries.select_all).fetch_all(&pool).await?;
        let mirror = Mirror::load(rows);

        info!(
            "opened {} bucket {} with {} entries",
            file_name,
            bucket,
            mirror.len()
        );

        Ok(Self {
            bucket: bucket.to_string(),
            shared: Arc::new(Shared {
                pool,
                queries,
                mirror,
                write_gate: Mutex::new(()),
            }),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Whether `key` is present
    pub fn exist(&self, key: &str) -> bool {
        self.shared.mirror.contains(key)
    }

    /// Encoded value stored under `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.shared.mirror.get(key)
    }

    /// Decoded value stored under `key`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        self.get(key)
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
            .map_err(StorageError::from)
    }

    /// Insert or replace the value stored under `key`; true if the key is new
    ///
    /// Values that encode to JSON `null` (such as `None`) are rejected.
    pub async fn add_or_update<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> StoreResult<bool> {
        let content = serde_json::to_vec(value)?;
        if content == b"null" {
            return Err(StorageError::NullValue);
        }

        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        tokio::spawn(async move { shared.upsert(key, content).await }).await?
    }

    /// Delete `key`; true if an entry was removed
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        tokio::spawn(async move { shared.delete(key).await }).await?
    }

    /// Snapshot of every key and encoded value
    pub fn get_all(&self) -> HashMap<String, Vec<u8>> {
        self.shared.mirror.snapshot()
    }

    /// Encoded value of a random entry, `None` when the store is empty
    pub fn get_random_one(&self) -> Option<Vec<u8>> {
        self.shared.mirror.random()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.shared.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.mirror.is_empty()
    }

    /// Release the database handle once pending writes are done
    pub async fn close(self) {
        drop(self.shared.write_gate.lock().await);
        self.shared.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Value {
        host: String,
        port: u16,
    }

    fn value(port: u16) -> Value {
        Value {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    fn db_path(dir: &TempDir) -> String {
        dir.path().join("store.db").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_open_rejects_empty_names() {
        assert!(matches!(
            MirroredStore::open("", "proxies").await,
            Err(StorageError::EmptyFileName)
        ));

        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MirroredStore::open(&db_path(&dir), "").await,
            Err(StorageError::EmptyBucket)
        ));
    }

    #[tokio::test]
    async fn test_add_get_update_delete() {
        let dir = TempDir::new().unwrap();
        let store = MirroredStore::open(&db_path(&dir), "proxies").await.unwrap();
        assert!(store.is_empty());

        assert!(store.add_or_update("k1", &value(1)).await.unwrap());
        assert!(store.exist("k1"));
        assert_eq!(store.get("k1"), Some(serde_json::to_vec(&value(1)).unwrap()));
        assert_eq!(store.len(), 1);

        assert!(!store.add_or_update("k1", &value(2)).await.unwrap());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k1"), Some(serde_json::to_vec(&value(2)).unwrap()));
        assert_eq!(store.get_as::<Value>("k1").unwrap(), Some(value(2)));

        assert!(store.delete("k1").await.unwrap());
        assert!(!store.exist("k1"));
        assert!(store.get("k1").is_none());
        assert!(!store.get_all().contains_key("k1"));
        assert_eq!(store.len(), 0);

        // deleting an absent key succeeds without touching the counter
        assert!(!store.delete("k1").await.unwrap());
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_null_value_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MirroredStore::open(&db_path(&dir), "proxies").await.unwrap();

        let err = store.add_or_update("k", &None::<Value>).await.unwrap_err();
        assert!(matches!(err, StorageError::NullValue));
        assert!(!store.exist("k"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_counter_matches_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let store = MirroredStore::open(&db_path(&dir), "proxies").await.unwrap();

        for i in 0..25u16 {
            store.add_or_update(&format!("k{i}"), &value(i)).await.unwrap();
        }
        for i in 0..10u16 {
            store.add_or_update(&format!("k{i}"), &value(i + 100)).await.unwrap();
        }

        assert_eq!(store.len(), 25);
        assert_eq!(store.get_all().len(), 25);
    }

    #[tokio::test]
    async fn test_reopen_reproduces_mirror() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);

        let store = MirroredStore::open(&path, "proxies").await.unwrap();
        for i in 0..5u16 {
            store.add_or_update(&format!("k{i}"), &value(i)).await.unwrap();
        }
        store.delete("k3").await.unwrap();
        store.add_or_update("k0", &value(42)).await.unwrap();
        let before = store.get_all();
        store.close().await;

        let store = MirroredStore::open(&path, "proxies").await.unwrap();
        assert_eq!(store.get_all(), before);
        assert_eq!(store.len(), 4);
        assert_eq!(store.get_as::<Value>("k0").unwrap(), Some(value(42)));
        store.close().await;
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);

        let store = MirroredStore::open(&path, "good").await.unwrap();
        store.add_or_update("k", &value(1)).await.unwrap();
        store.close().await;

        let other = MirroredStore::open(&path, "bad \"quoted\"").await.unwrap();
        assert!(other.is_empty());
        assert_eq!(other.bucket(), "bad \"quoted\"");
        other.close().await;
    }

    #[tokio::test]
    async fn test_get_random_one() {
        let dir = TempDir::new().unwrap();
        let store = MirroredStore::open(&db_path(&dir), "proxies").await.unwrap();
        assert!(store.get_random_one().is_none());

        for i in 0..3u16 {
            store.add_or_update(&format!("k{i}"), &value(i)).await.unwrap();
        }
        let all = store.get_all();
        for _ in 0..50 {
            let picked = store.get_random_one().unwrap();
            assert!(all.values().any(|v| *v == picked));
        }
    }

    #[tokio::test]
    async fn test_abandoned_writes_reach_mirror() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        let store = MirroredStore::open(&path, "proxies").await.unwrap();

        for i in 0..200u16 {
            let wait = Duration::from_micros(u64::from(i) * 5);
            let _ = tokio::time::timeout(wait, store.add_or_update(&format!("k{i}"), &value(i))).await;
        }
        for i in (0..200u16).step_by(3) {
            let wait = Duration::from_micros(u64::from(i) * 5);
            let _ = tokio::time::timeout(wait, store.delete(&format!("k{i}"))).await;
        }

        // queued behind every write above
        store.add_or_update("last", &value(0)).await.unwrap();

        let snapshot = store.get_all();
        assert!(snapshot.contains_key("last"));
        assert_eq!(store.len(), snapshot.len());
        store.close().await;

        let reopened = MirroredStore::open(&path, "proxies").await.unwrap();
        assert_eq!(reopened.get_all(), snapshot);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        let store = Arc::new(MirroredStore::open(&path, "proxies").await.unwrap());

        let mut handles = Vec::new();
        for worker in 0..4u16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..20u16 {
                    let key = format!("k{}", i % 10);
                    store.add_or_update(&key, &value(worker * 100 + i)).await.unwrap();
                    let _ = store.get_random_one();
                    if i % 7 == 0 {
                        store.delete(&key).await.unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.get_all();
        assert_eq!(store.len(), snapshot.len());

        let store = Arc::try_unwrap(store).unwrap();
        store.close().await;
        let reopened = MirroredStore::open(&path, "proxies").await.unwrap();
        assert_eq!(reopened.get_all(), snapshot);
    }
}
