use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::log::JobLog;
use super::progress::Progress;
use super::token::Token;

/// 校验子报告标识符，格式为 `<name>@<host>`。
///
/// 两段均只允许 `[0-9a-zA-Z_-]`。
pub fn is_valid_report_identifier(id: &str) -> bool {
    fn segment_ok(segment: &str) -> bool {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }
    match id.split_once('@') {
        Some((name, host)) => segment_ok(name) && segment_ok(host),
        None => false,
    }
}

/// 子作业引用
///
/// 父作业持有的子作业句柄：通过宿主地址与令牌寻址，不持有对象引用，
/// 因此不会构成环。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildJobRef {
    /// 子报告标识符（`<name>@<host>`）
    pub id: String,
    /// 子作业所在服务的基础地址
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    /// 子作业令牌值
    pub token: String,
    /// 中止子作业时的请求超时（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// 作业报告
///
/// 作业的结构化结果：进度、分类日志、业务数据以及嵌套的子作业报告。
/// 单一写者（持有租约的工作者），读者通过登记簿获得副本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub log: JobLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Report>,
}

impl Report {
    pub fn new<S: Into<String>>(host: S, token: Option<Token>) -> Self {
        Self {
            host: host.into(),
            token,
            args: None,
            progress: Progress::default(),
            log: JobLog::new(),
            data: None,
            children: BTreeMap::new(),
        }
    }

    /// 挂入（或替换）一份子作业报告快照。
    ///
    /// 标识符不合法时返回 `false`，报告保持不变。
    pub fn attach_child(&mut self, id: &str, report: Report) -> bool {
        if !is_valid_report_identifier(id) {
            return false;
        }
        self.children.insert(id.to_string(), report);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::log::LogCategory;

    #[test]
    fn test_report_identifier_grammar() {
        assert!(is_valid_report_identifier("child-1@service_a"));
        assert!(is_valid_report_identifier("0@0"));
        assert!(!is_valid_report_identifier("child"));
        assert!(!is_valid_report_identifier("@host"));
        assert!(!is_valid_report_identifier("name@"));
        assert!(!is_valid_report_identifier("na me@host"));
        assert!(!is_valid_report_identifier("name@ho/st"));
    }

    #[test]
    fn test_attach_child_rejects_bad_identifier() {
        let mut report = Report::new("https://a.example", None);
        let child = Report::new("https://b.example", None);
        assert!(!report.attach_child("not an id", child.clone()));
        assert!(report.children.is_empty());
        assert!(report.attach_child("import@b", child));
        assert_eq!(report.children.len(), 1);
    }

    #[test]
    fn test_report_roundtrip_with_nested_children() {
        let mut grandchild = Report::new("https://c.example", None);
        grandchild.log.log(LogCategory::Info, "c", "deep");
        let mut child = Report::new("https://b.example", Some(Token::with_value("t-b".into(), None)));
        child.attach_child("leaf@c", grandchild);
        let mut report = Report::new("https://a.example", Some(Token::with_value("t-a".into(), None)));
        report.args = Some(serde_json::json!({"demo": {"duration": 0}}));
        report.data = Some(serde_json::json!({"success": true}));
        report.log.log(LogCategory::Event, "a", "accepted");
        report.attach_child("import@b", child);

        // 序列化-反序列化-再序列化必须是幂等的
        let first = serde_json::to_string(&report).unwrap();
        let parsed: Report = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&parsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(report, parsed);
    }
}
