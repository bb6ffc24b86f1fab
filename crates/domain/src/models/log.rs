use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 作业日志的分类
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    Error,
    Warning,
    Info,
    Event,
    Network,
    FileSystem,
    Startup,
    Shutdown,
    User,
    Authentication,
    Security,
}

/// 单条日志记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub datetime: DateTime<Utc>,
    pub origin: String,
    pub body: String,
}

impl LogEntry {
    pub fn now<S: Into<String>, B: Into<String>>(origin: S, body: B) -> Self {
        Self {
            datetime: Utc::now(),
            origin: origin.into(),
            body: body.into(),
        }
    }
}

/// 按分类聚合的作业日志，只允许追加。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobLog {
    entries: BTreeMap<LogCategory, Vec<LogEntry>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log<S: Into<String>, B: Into<String>>(
        &mut self,
        category: LogCategory,
        origin: S,
        body: B,
    ) {
        self.entries
            .entry(category)
            .or_default()
            .push(LogEntry::now(origin, body));
    }

    pub fn append(&mut self, category: LogCategory, entry: LogEntry) {
        self.entries.entry(category).or_default().push(entry);
    }

    /// 合并另一份日志（追加语义，保持各分类内的顺序）。
    pub fn merge(&mut self, other: JobLog) {
        for (category, entries) in other.entries {
            self.entries.entry(category).or_default().extend(entries);
        }
    }

    pub fn get(&self, category: LogCategory) -> &[LogEntry] {
        self.entries
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
