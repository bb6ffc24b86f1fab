use std::path::PathBuf;
use std::time::Duration;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(LogLevel::None),
            "error" => Some(LogLevel::Error),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// 映射为 tracing 的 `EnvFilter` 指令。
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// 控制器后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Sqlite,
    Http,
}

/// 控制器配置
///
/// sqlite 方言使用 `path`（缺省为内存数据库）；http 方言使用
/// `base_url` 加上重试参数。TTL 配置对两种方言语义一致。
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub kind: ControllerKind,
    pub path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub requeue: bool,
    pub requeue_limit: u32,
    pub lock_ttl: Duration,
    pub token_ttl: Option<Duration>,
    pub message_ttl: Option<Duration>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::Sqlite,
            path: None,
            base_url: None,
            requeue: false,
            requeue_limit: 3,
            lock_ttl: Duration::from_secs(10),
            token_ttl: Some(Duration::from_secs(3600)),
            message_ttl: Some(Duration::from_secs(360)),
            timeout: Duration::from_secs(5),
            max_retries: 1,
            retry_interval: Duration::from_secs(0),
        }
    }
}

/// 工作者配置
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub interval: Duration,
    pub process_timeout: Option<Duration>,
    pub registry_push_interval: Duration,
    pub lock_refresh_interval: Duration,
    pub message_interval: Duration,
    pub abort_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            interval: Duration::from_secs(1),
            process_timeout: None,
            registry_push_interval: Duration::from_secs(1),
            lock_refresh_interval: Duration::from_secs(1),
            message_interval: Duration::from_secs(1),
            abort_grace: Duration::from_secs(5),
        }
    }
}

/// 守护进程配置
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval: Duration,
    pub at_startup: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            at_startup: true,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub controller: ControllerConfig,
    pub worker: WorkerConfig,
    pub daemon: DaemonConfig,
    pub abort_timeout: Duration,
    pub log_level: LogLevel,
    pub allow_cors: bool,
    pub fs_mount_point: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            worker: WorkerConfig::default(),
            daemon: DaemonConfig::default(),
            abort_timeout: Duration::from_secs(30),
            log_level: LogLevel::Info,
            allow_cors: false,
            fs_mount_point: PathBuf::from("/file_storage"),
        }
    }
}
