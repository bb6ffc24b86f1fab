use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use orchestra_domain::KeyValueStore;
use orchestra_errors::OrchestraResult;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// SQLite 键值存储
///
/// 表结构 `kv(key PK, value, expires_at)`，值序列化为 JSON 文本。
/// 基于文件时可在多个进程之间共享；内存模式把连接池限制为单连接，
/// 以保证所有操作落在同一个数据库上。
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 打开（或创建）基于文件的存储。
    pub async fn open<P: AsRef<Path>>(path: P) -> OrchestraResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// 打开仅进程内可见的内存存储。
    pub async fn in_memory() -> OrchestraResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> OrchestraResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    async fn sweep(&self) -> OrchestraResult<()> {
        sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at < $1")
            .bind(Self::now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn write(&self, key: &str, value: &Value, ttl: Option<Duration>) -> OrchestraResult<()> {
        let expires_at = ttl.map(|ttl| Self::now_millis() + ttl.as_millis() as i64);
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = $2, expires_at = $3",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read(&self, key: &str, pop: bool) -> OrchestraResult<Option<Value>> {
        self.sweep().await?;
        let row = if pop {
            sqlx::query("DELETE FROM kv WHERE key = $1 RETURNING value")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT value FROM kv WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
        };
        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn push(&self, value: &Value) -> OrchestraResult<String> {
        let key = Uuid::new_v4().to_string();
        self.write(&key, value, None).await?;
        Ok(key)
    }

    async fn delete(&self, key: &str) -> OrchestraResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> OrchestraResult<Vec<String>> {
        self.sweep().await?;
        let rows = sqlx::query("SELECT key FROM kv ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(Into::into))
            .collect()
    }

    async fn next(&self, pop: bool) -> OrchestraResult<Option<(String, Value)>> {
        self.sweep().await?;
        let row = if pop {
            sqlx::query(
                "DELETE FROM kv WHERE rowid = (SELECT MIN(rowid) FROM kv)
                 RETURNING key, value",
            )
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT key, value FROM kv ORDER BY rowid LIMIT 1")
                .fetch_optional(&self.pool)
                .await?
        };
        match row {
            Some(row) => {
                let key: String = row.try_get("key")?;
                let raw: String = row.try_get("value")?;
                Ok(Some((key, serde_json::from_str(&raw)?)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.write("a", &json!([1, 2]), None).await.unwrap();
        store.write("a", &json!([3]), None).await.unwrap();
        assert_eq!(store.read("a", false).await.unwrap(), Some(json!([3])));
    }

    #[tokio::test]
    async fn test_pop_is_atomic_read_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.write("a", &json!(1), None).await.unwrap();
        assert_eq!(store.read("a", true).await.unwrap(), Some(json!(1)));
        assert_eq!(store.read("a", true).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .write("a", &json!(1), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.read("a", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_next_follows_insertion_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.write("b", &json!(2), None).await.unwrap();
        store.write("a", &json!(1), None).await.unwrap();
        let (key, value) = store.next(true).await.unwrap().unwrap();
        assert_eq!((key.as_str(), value), ("b", json!(2)));
    }
}
