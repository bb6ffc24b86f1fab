use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_domain::KeyValueStore;
use orchestra_errors::{OrchestraError, OrchestraResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

/// 磁盘上的单条记录（文件内容）。
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: Value,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at < Utc::now())
    }
}

/// 磁盘键值存储
///
/// 工作目录下每个键一个 JSON 文件，文件名为键的 SHA-256 十六进制。
/// 内存缓存挡在磁盘之前；写入先更新缓存再落盘。没有针对多进程并发
/// 的防护措施。
pub struct JsonFileStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, StoredRecord>>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> OrchestraResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|err| {
            OrchestraError::backend_unavailable(format!(
                "无法创建键值存储目录 '{}': {err}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{digest:x}"))
    }

    async fn load(&self, key: &str) -> Option<StoredRecord> {
        let file = self.file_for(key);
        let data = tokio::fs::read_to_string(&file).await.ok()?;
        let record: StoredRecord = serde_json::from_str(&data).ok()?;
        // 哈希碰撞或被篡改的文件按缺失处理
        if record.key != key {
            return None;
        }
        Some(record)
    }

    async fn persist(&self, record: &StoredRecord) -> OrchestraResult<()> {
        let file = self.file_for(&record.key);
        let data = serde_json::to_string(record)?;
        tokio::fs::write(&file, data).await.map_err(|err| {
            OrchestraError::backend_unavailable(format!(
                "无法写入键值存储文件 '{}': {err}",
                file.display()
            ))
        })
    }

    async fn remove_file(&self, key: &str) -> OrchestraResult<()> {
        let file = self.file_for(key);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(OrchestraError::backend_unavailable(format!(
                "无法删除键值存储文件 '{}': {err}",
                file.display()
            ))),
        }
    }

    /// 扫描目录，把所有可解析的记录并入缓存，返回其键列表。
    async fn scan(&self, cache: &mut HashMap<String, StoredRecord>) -> OrchestraResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|err| {
            OrchestraError::backend_unavailable(format!(
                "无法读取键值存储目录 '{}': {err}",
                self.dir.display()
            ))
        })?;
        let mut keys = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(data) = tokio::fs::read_to_string(entry.path()).await else {
                continue;
            };
            let Ok(record) = serde_json::from_str::<StoredRecord>(&data) else {
                continue;
            };
            if record.expired() {
                continue;
            }
            keys.push(record.key.clone());
            cache.insert(record.key.clone(), record);
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn write(&self, key: &str, value: &Value, ttl: Option<Duration>) -> OrchestraResult<()> {
        let record = StoredRecord {
            key: key.to_string(),
            value: value.clone(),
            expires_at: ttl
                .map(|ttl| Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())),
        };
        let mut cache = self.cache.lock().await;
        self.persist(&record).await?;
        cache.insert(key.to_string(), record);
        Ok(())
    }

    async fn read(&self, key: &str, pop: bool) -> OrchestraResult<Option<Value>> {
        let mut cache = self.cache.lock().await;
        let record = match cache.get(key) {
            Some(record) => Some(record.clone()),
            None => {
                let loaded = self.load(key).await;
                if let Some(record) = &loaded {
                    cache.insert(key.to_string(), record.clone());
                }
                loaded
            }
        };
        let Some(record) = record else {
            return Ok(None);
        };
        if record.expired() || pop {
            cache.remove(key);
            self.remove_file(key).await?;
            if record.expired() {
                return Ok(None);
            }
        }
        Ok(Some(record.value))
    }

    async fn push(&self, value: &Value) -> OrchestraResult<String> {
        let key = Uuid::new_v4().to_string();
        self.write(&key, value, None).await?;
        Ok(key)
    }

    async fn delete(&self, key: &str) -> OrchestraResult<()> {
        let mut cache = self.cache.lock().await;
        cache.remove(key);
        self.remove_file(key).await
    }

    async fn keys(&self) -> OrchestraResult<Vec<String>> {
        let mut cache = self.cache.lock().await;
        self.scan(&mut cache).await
    }

    async fn next(&self, pop: bool) -> OrchestraResult<Option<(String, Value)>> {
        let mut cache = self.cache.lock().await;
        let keys = self.scan(&mut cache).await?;
        let Some(key) = keys.into_iter().next() else {
            return Ok(None);
        };
        let Some(record) = cache.get(&key).cloned() else {
            return Ok(None);
        };
        if pop {
            cache.remove(&key);
            self.remove_file(&key).await?;
        }
        Ok(Some((key, record.value)))
    }
}
