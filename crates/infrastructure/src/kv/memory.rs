use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_domain::KeyValueStore;
use orchestra_errors::OrchestraResult;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Record {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at < Utc::now())
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Record>,
    /// `next()` 的轮转顺序，按首次写入排列
    rotation: VecDeque<String>,
}

/// 内存键值存储
///
/// 非持久化的最小实现。覆盖已有键直接替换数据；读取缺失键返回
/// `None`；删除缺失键不报错。
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn write(&self, key: &str, value: &Value, ttl: Option<Duration>) -> OrchestraResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.records.contains_key(key) {
            inner.rotation.push_back(key.to_string());
        }
        inner.records.insert(
            key.to_string(),
            Record {
                value: value.clone(),
                expires_at: ttl.map(|ttl| {
                    Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
                }),
            },
        );
        Ok(())
    }

    async fn read(&self, key: &str, pop: bool) -> OrchestraResult<Option<Value>> {
        let mut inner = self.inner.lock().await;
        let expired = matches!(inner.records.get(key), Some(record) if record.expired());
        if expired || pop {
            let record = inner.records.remove(key);
            inner.rotation.retain(|k| k != key);
            if expired {
                return Ok(None);
            }
            return Ok(record.map(|r| r.value));
        }
        Ok(inner.records.get(key).map(|r| r.value.clone()))
    }

    async fn push(&self, value: &Value) -> OrchestraResult<String> {
        let mut inner = self.inner.lock().await;
        let mut key = Uuid::new_v4().to_string();
        while inner.records.contains_key(&key) {
            key = Uuid::new_v4().to_string();
        }
        inner.rotation.push_back(key.clone());
        inner.records.insert(
            key.clone(),
            Record {
                value: value.clone(),
                expires_at: None,
            },
        );
        Ok(key)
    }

    async fn delete(&self, key: &str) -> OrchestraResult<()> {
        let mut inner = self.inner.lock().await;
        inner.records.remove(key);
        inner.rotation.retain(|k| k != key);
        Ok(())
    }

    async fn keys(&self) -> OrchestraResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.records.retain(|_, record| !record.expired());
        let records = &inner.records;
        let keys = inner
            .rotation
            .iter()
            .filter(|k| records.contains_key(*k))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn next(&self, pop: bool) -> OrchestraResult<Option<(String, Value)>> {
        let mut inner = self.inner.lock().await;
        while let Some(key) = inner.rotation.pop_front() {
            let Some(record) = inner.records.get(&key).cloned() else {
                continue;
            };
            if record.expired() {
                inner.records.remove(&key);
                continue;
            }
            if pop {
                inner.records.remove(&key);
            } else {
                // 未弹出的记录移到轮转末尾，保证公平
                inner.rotation.push_back(key.clone());
            }
            return Ok(Some((key, record.value)));
        }
        Ok(None)
    }
}
