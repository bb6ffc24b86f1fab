use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::Report;
use super::token::Token;

/// 作业配置
///
/// 提交时固化的作业描述，入队后不可变。`job_type` 用于在作业表中查找
/// 已注册的处理函数；`properties` 是工厂可自由使用的附加信息（例如
/// 提交来源的端点路径）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(rename = "originalBody")]
    pub original_body: Option<serde_json::Value>,
    #[serde(rename = "requestBody")]
    pub request_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl JobConfig {
    pub fn new<S: Into<String>>(job_type: S, request_body: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            original_body: Some(request_body.clone()),
            request_body: Some(request_body),
            properties: None,
            token: None,
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// 作业元数据中的单条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    pub datetime: DateTime<Utc>,
}

impl MetadataRecord {
    pub fn now<S: Into<String>>(by: S) -> Self {
        Self {
            by: Some(by.into()),
            datetime: Utc::now(),
        }
    }
}

/// 作业元数据
///
/// 四个一次性写入的记录，分别对应提交、领取、中止与完成。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced: Option<MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed: Option<MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<MetadataRecord>,
}

impl JobMetadata {
    pub fn produce(&mut self, by: &str) {
        if self.produced.is_none() {
            self.produced = Some(MetadataRecord::now(by));
        }
    }

    pub fn consume(&mut self, by: &str) {
        if self.consumed.is_none() {
            self.consumed = Some(MetadataRecord::now(by));
        }
    }

    pub fn abort(&mut self, by: &str) {
        if self.aborted.is_none() {
            self.aborted = Some(MetadataRecord::now(by));
        }
    }

    pub fn complete(&mut self, by: &str) {
        if self.completed.is_none() {
            self.completed = Some(MetadataRecord::now(by));
        }
    }

    /// 重新排队时清除执行痕迹，仅保留提交记录。
    pub fn requeue(&mut self) {
        self.consumed = None;
        self.aborted = None;
        self.completed = None;
    }
}

/// 作业信息（登记簿记录）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub config: JobConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
}

impl JobInfo {
    pub fn new(config: JobConfig) -> Self {
        Self {
            config,
            token: None,
            metadata: JobMetadata::default(),
            report: None,
        }
    }

    pub fn token_value(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_records_are_write_once() {
        let mut metadata = JobMetadata::default();
        metadata.produce("controller-a");
        let first = metadata.produced.clone();
        metadata.produce("controller-b");
        assert_eq!(metadata.produced, first);
        assert_eq!(
            metadata.produced.as_ref().unwrap().by.as_deref(),
            Some("controller-a")
        );
    }

    #[test]
    fn test_requeue_clears_execution_records() {
        let mut metadata = JobMetadata::default();
        metadata.produce("c");
        metadata.consume("w");
        metadata.complete("w");
        metadata.requeue();
        assert!(metadata.produced.is_some());
        assert!(metadata.consumed.is_none());
        assert!(metadata.completed.is_none());
    }

    #[test]
    fn test_job_info_roundtrip() {
        let config = JobConfig::new("demo", serde_json::json!({"demo": {"duration": 1}}))
            .with_properties(serde_json::json!({"path": "/demo"}));
        let mut info = JobInfo::new(config);
        info.token = Some(Token::with_value("t-1".into(), None));
        let json = serde_json::to_string(&info).unwrap();
        let back: JobInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
        assert_eq!(back.token_value(), Some("t-1"));
    }
}
