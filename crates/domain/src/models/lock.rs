use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业租约
///
/// 工作者对某个令牌在有限时间内的独占认领。续约延长 `expires_at`；
/// 过期或缺失的租约允许其他工作者重新认领。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub owner: String,
    pub token: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new<O: Into<String>, T: Into<String>>(
        owner: O,
        token: T,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            token: token.into(),
            expires_at,
        }
    }

    pub fn expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
