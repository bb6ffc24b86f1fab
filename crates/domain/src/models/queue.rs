use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 队列条目
///
/// 队列中一个待处理（或被租约占用）作业的可观测状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub token: String,
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: DateTime<Utc>,
    #[serde(rename = "leaseOwner", skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(rename = "leaseExpiresAt", skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "requeueCount", default)]
    pub requeue_count: u32,
}
