use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 编排指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    #[serde(rename = "abort")]
    Abort,
}

impl Instruction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instruction::Abort => "abort",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "abort" => Some(Instruction::Abort),
            _ => None,
        }
    }
}

/// 编排消息
///
/// 控制器消息表中的一条记录，用于向持有作业的工作者传达指令
/// （目前只有中止）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub token: String,
    pub instruction: Instruction,
    pub origin: String,
    pub content: String,
    /// 中止后是否重新排队
    #[serde(rename = "reQueue", default)]
    pub re_queue: bool,
    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let message = Message {
            token: "t-1".into(),
            instruction: Instruction::Abort,
            origin: "user".into(),
            content: "cancelled from ui".into(),
            re_queue: false,
            received_at: Utc::now(),
            expires_at: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["instruction"], "abort");
        assert!(json.get("expiresAt").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(message, back);
    }
}
