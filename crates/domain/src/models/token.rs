use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 作业令牌
///
/// 作业在队列与登记簿中的主键。`expires_at` 记录登记簿中记录的过期
/// 时刻；不过期的令牌 `expires` 为 `false` 且没有 `expiresAt` 字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    #[serde(default)]
    pub expires: bool,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// 生成一个新的随机令牌，`ttl` 为登记簿记录的存活时长。
    pub fn generate(ttl: Option<Duration>) -> Self {
        Self::with_value(Uuid::new_v4().to_string(), ttl)
    }

    /// 基于已有的令牌值构造令牌。
    pub fn with_value(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires: ttl.is_some(),
            expires_at: ttl.map(|ttl| Utc::now() + ttl),
        }
    }

    pub fn expired(&self) -> bool {
        match self.expires_at {
            Some(at) => self.expires && at < Utc::now(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = Token::generate(None);
        let b = Token::generate(None);
        assert_ne!(a.value, b.value);
        assert!(!a.expires);
        assert!(a.expires_at.is_none());
    }

    #[test]
    fn test_token_serialization_omits_absent_expiry() {
        let token = Token::with_value("abc".into(), None);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["value"], "abc");
        assert_eq!(json["expires"], false);
        assert!(json.get("expiresAt").is_none());
    }

    #[test]
    fn test_token_roundtrip_with_expiry() {
        let token = Token::with_value("abc".into(), Some(Duration::seconds(60)));
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
        assert!(!back.expired());
    }

    #[test]
    fn test_expired_token() {
        let mut token = Token::with_value("abc".into(), Some(Duration::seconds(60)));
        token.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(token.expired());
    }
}
