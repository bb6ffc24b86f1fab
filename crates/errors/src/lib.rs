use thiserror::Error;


#[derive(Debug, Error)]
pub enum OrchestraError {
    #[error("请求格式错误: {0}")]
    BadRequest(String),
    #[error("未知的作业令牌: {token}")]
    UnknownToken { token: String },
    #[error("工作池已饱和")]
    Busy,
    #[error("作业租约已失效: {0}")]
    LeaseLost(String),
    #[error("存储后端不可用: {0}")]
    BackendUnavailable(String),
    #[error("作业处理超时: {0}")]
    Timeout(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("HTTP请求错误: {0}")]
    Http(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("重复提交的令牌携带了不同的请求体: {token}")]
    ConflictingResubmission { token: String },
    #[error("未注册的作业类型: {0}")]
    UnknownJobType(String),
    #[error("通知服务错误: {0}")]
    Notification(String),
    #[error("不可恢复的内部错误: {0}")]
    Fatal(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestraResult<T> = Result<T, OrchestraError>;

impl OrchestraError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn unknown_token<S: Into<String>>(token: S) -> Self {
        Self::UnknownToken {
            token: token.into(),
        }
    }
    pub fn lease_lost<S: Into<String>>(msg: S) -> Self {
        Self::LeaseLost(msg.into())
    }
    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 判定错误是否值得重试（针对后端与网络类故障）。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestraError::BackendUnavailable(_)
                | OrchestraError::Http(_)
                | OrchestraError::Database(_)
                | OrchestraError::Notification(_)
        )
    }

    /// 判定错误是否不可恢复（进程应当退出）。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestraError::Fatal(_) | OrchestraError::Configuration(_)
        )
    }
}

impl From<serde_json::Error> for OrchestraError {
    fn from(err: serde_json::Error) -> Self {
        OrchestraError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for OrchestraError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return OrchestraError::Timeout(err.to_string());
        }
        OrchestraError::Http(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestraError {
    fn from(err: anyhow::Error) -> Self {
        OrchestraError::Internal(err.to_string())
    }
}
