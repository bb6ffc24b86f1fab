use std::env;
use std::path::PathBuf;
use std::time::Duration;

use orchestra_errors::{OrchestraError, OrchestraResult};
use serde::Deserialize;

use crate::models::{
    AppConfig, ControllerConfig, ControllerKind, DaemonConfig, LogLevel, WorkerConfig,
};

/// `ORCHESTRA_CONTROLLER_ARGS` 的 JSON 覆盖项。
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ControllerArgs {
    path: Option<PathBuf>,
    base_url: Option<String>,
    requeue: Option<bool>,
    requeue_limit: Option<u32>,
    lock_ttl: Option<f64>,
    /// 显式的 `null` 表示令牌不过期
    #[serde(default, with = "double_option")]
    token_ttl: Option<Option<f64>>,
    #[serde(default, with = "double_option")]
    message_ttl: Option<Option<f64>>,
    timeout: Option<f64>,
    max_retries: Option<u32>,
    retry_interval: Option<f64>,
}

/// `ORCHESTRA_WORKER_ARGS` 的 JSON 覆盖项。
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkerArgs {
    process_timeout: Option<f64>,
    registry_push_interval: Option<f64>,
    lock_refresh_interval: Option<f64>,
    message_interval: Option<f64>,
    abort_grace: Option<f64>,
}

/// 区分「字段缺失」与「字段为 null」的反序列化辅助。
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> OrchestraResult<Option<T>> {
    match var(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            OrchestraError::config_error(format!("无法解析环境变量 '{name}' 的值 '{raw}'"))
        }),
    }
}

fn parse_bool(name: &str) -> OrchestraResult<Option<bool>> {
    match var(name) {
        None => Ok(None),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            _ => Err(OrchestraError::config_error(format!(
                "无法解析环境变量 '{name}' 的布尔值 '{raw}'"
            ))),
        },
    }
}

fn parse_json_var<T: for<'de> Deserialize<'de> + Default>(name: &str) -> OrchestraResult<T> {
    match var(name) {
        None => Ok(T::default()),
        Some(raw) => serde_json::from_str(&raw).map_err(|err| {
            OrchestraError::config_error(format!("环境变量 '{name}' 不是合法的 JSON: {err}"))
        }),
    }
}

/// 从环境变量加载应用配置。
///
/// 所有变量都是可选的；缺失时使用文档化的默认值。
pub fn load_from_env() -> OrchestraResult<AppConfig> {
    let mut config = AppConfig::default();

    if let Some(level) = var("ORCHESTRA_LOGLEVEL") {
        config.log_level = LogLevel::parse(&level).ok_or_else(|| {
            OrchestraError::config_error(format!("未知的日志级别 '{level}'"))
        })?;
    }
    if let Some(allow) = parse_bool("ALLOW_CORS")? {
        config.allow_cors = allow;
    }
    if let Some(mount) = var("FS_MOUNT_POINT") {
        config.fs_mount_point = PathBuf::from(mount);
    }
    if let Some(timeout) = parse_var::<f64>("ORCHESTRA_ABORT_TIMEOUT")? {
        config.abort_timeout = secs(timeout);
    }
    // 兼容性开关：作业隔离固定为线程方式，取值不再影响行为
    let _ = var("ORCHESTRA_MP_METHOD");

    config.daemon = load_daemon_config()?;
    config.worker = load_worker_config()?;
    config.controller = load_controller_config()?;

    Ok(config)
}

fn load_daemon_config() -> OrchestraResult<DaemonConfig> {
    let mut daemon = DaemonConfig::default();
    if let Some(interval) = parse_var::<f64>("ORCHESTRA_DAEMON_INTERVAL")? {
        daemon.interval = secs(interval);
    }
    if let Some(at_startup) = parse_bool("ORCHESTRA_AT_STARTUP")? {
        daemon.at_startup = at_startup;
    }
    Ok(daemon)
}

fn load_worker_config() -> OrchestraResult<WorkerConfig> {
    let mut worker = WorkerConfig::default();
    if let Some(size) = parse_var::<usize>("ORCHESTRA_WORKER_POOL_SIZE")? {
        if size == 0 {
            return Err(OrchestraError::config_error(
                "ORCHESTRA_WORKER_POOL_SIZE 必须至少为 1",
            ));
        }
        worker.pool_size = size;
    }
    if let Some(interval) = parse_var::<f64>("ORCHESTRA_WORKER_INTERVAL")? {
        worker.interval = secs(interval);
    }

    let args: WorkerArgs = parse_json_var("ORCHESTRA_WORKER_ARGS")?;
    if let Some(timeout) = args.process_timeout {
        worker.process_timeout = Some(secs(timeout));
    }
    if let Some(interval) = args.registry_push_interval {
        worker.registry_push_interval = secs(interval);
    }
    if let Some(interval) = args.lock_refresh_interval {
        worker.lock_refresh_interval = secs(interval);
    }
    if let Some(interval) = args.message_interval {
        worker.message_interval = secs(interval);
    }
    if let Some(grace) = args.abort_grace {
        worker.abort_grace = secs(grace);
    }
    Ok(worker)
}

fn load_controller_config() -> OrchestraResult<ControllerConfig> {
    let mut controller = ControllerConfig::default();
    if let Some(kind) = var("ORCHESTRA_CONTROLLER") {
        controller.kind = match kind.as_str() {
            "sqlite" => ControllerKind::Sqlite,
            "http" => ControllerKind::Http,
            _ => {
                return Err(OrchestraError::config_error(format!(
                    "未知的控制器类型 '{kind}'（可选值: sqlite, http）"
                )))
            }
        };
    }

    let args: ControllerArgs = parse_json_var("ORCHESTRA_CONTROLLER_ARGS")?;
    if let Some(path) = args.path {
        controller.path = Some(path);
    }
    if let Some(base_url) = args.base_url {
        controller.base_url = Some(base_url);
    }
    if let Some(requeue) = args.requeue {
        controller.requeue = requeue;
    }
    if let Some(limit) = args.requeue_limit {
        controller.requeue_limit = limit;
    }
    if let Some(ttl) = args.lock_ttl {
        controller.lock_ttl = secs(ttl);
    }
    if let Some(ttl) = args.token_ttl {
        controller.token_ttl = ttl.map(secs);
    }
    if let Some(ttl) = args.message_ttl {
        controller.message_ttl = ttl.map(secs);
    }
    if let Some(timeout) = args.timeout {
        controller.timeout = secs(timeout);
    }
    if let Some(retries) = args.max_retries {
        controller.max_retries = retries;
    }
    if let Some(interval) = args.retry_interval {
        controller.retry_interval = secs(interval);
    }

    if controller.kind == ControllerKind::Http && controller.base_url.is_none() {
        return Err(OrchestraError::config_error(
            "http 控制器需要在 ORCHESTRA_CONTROLLER_ARGS 中给出 base_url",
        ));
    }
    Ok(controller)
}
