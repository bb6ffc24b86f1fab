use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use orchestra_application::{AbortOptions, Daemon, ServiceAdapter};
use orchestra_domain::{Controller, JobConfig, JobInfo};
use orchestra_worker::WorkerPool;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// 编排控制面的共享状态。
#[derive(Clone)]
pub struct OrchestrationState {
    pub adapter: Arc<ServiceAdapter>,
    pub controller: Arc<dyn Controller>,
    pub pool: Arc<WorkerPool>,
    pub daemon: Arc<Daemon>,
    pub daemon_interval: Duration,
}

/// `/orchestration` 路由（§ 编排控制 API）。
pub fn orchestration_routes(state: OrchestrationState) -> Router {
    Router::new()
        .route(
            "/orchestration",
            get(get_status)
                .put(put_start)
                .post(post_submit)
                .delete(delete_control),
        )
        .with_state(state)
}

/// 队列、登记簿、编排器与守护进程的状态总览。
async fn get_status(
    State(state): State<OrchestrationState>,
) -> ApiResult<impl IntoResponse> {
    let queue_size = state
        .controller
        .queue_entries()
        .await
        .map_err(ApiError::Orchestra)?
        .len();
    let registry_size = state
        .controller
        .registry_size()
        .await
        .map_err(ApiError::Orchestra)?;
    Ok(Json(json!({
        "queue": {"size": queue_size},
        "registry": {"size": registry_size},
        "orchestrator": {
            "ready": state.pool.ready(),
            "idle": state.pool.idle(),
            "running": state.pool.running(),
            "jobs": state.pool.jobs(),
        },
        "daemon": {
            "active": state.daemon.active(),
            "status": state.daemon.active() && state.daemon.running(),
        },
    })))
}

#[derive(Debug, Default, Deserialize)]
struct StartBody {
    #[serde(default)]
    daemon: StartDaemonSettings,
}

#[derive(Debug, Default, Deserialize)]
struct StartDaemonSettings {
    interval: Option<f64>,
}

/// 手动启动编排：常规模式交给守护进程，`until-idle` 启动一次性的
/// 工作池直到队列为空。
async fn put_start(
    State(state): State<OrchestrationState>,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<StartBody>>,
) -> ApiResult<impl IntoResponse> {
    let settings = body.map(|Json(body)| body).unwrap_or_default();
    if params.contains_key("until-idle") {
        if state.pool.running() {
            return Ok((StatusCode::SERVICE_UNAVAILABLE, "BUSY (already running)"));
        }
        state.pool.start();
        state.pool.stop_on_idle(false).await;
    } else {
        let interval = settings
            .daemon
            .interval
            .map(Duration::from_secs_f64)
            .unwrap_or(state.daemon_interval);
        state.daemon.start(interval);
    }
    Ok((StatusCode::OK, "OK"))
}

/// 直接提交一份序列化的作业配置（副本间转发用）。
async fn post_submit(
    State(state): State<OrchestrationState>,
    Json(config): Json<JobConfig>,
) -> ApiResult<impl IntoResponse> {
    let token_value = config
        .token
        .as_ref()
        .map(|token| token.value.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let token = state
        .controller
        .submit(&token_value, JobInfo::new(config))
        .await
        .map_err(ApiError::Orchestra)?;
    Ok(Json(token))
}

#[derive(Debug, Default, Deserialize)]
struct ControlBody {
    mode: Option<String>,
    #[serde(default)]
    options: ControlOptions,
}

#[derive(Debug, Default, Deserialize)]
struct ControlOptions {
    token: Option<String>,
    origin: Option<String>,
    reason: Option<String>,
    block: Option<bool>,
    re_queue: Option<bool>,
}

/// 快速且体面地停止编排，或中止单个作业。
async fn delete_control(
    State(state): State<OrchestrationState>,
    body: Option<Json<ControlBody>>,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let mode = body.mode.as_deref().unwrap_or("stop");
    let options = body.options;
    match mode {
        "abort" => {
            let token = options.token.as_deref().ok_or_else(|| {
                ApiError::BadRequest("中止请求缺少 'token'".to_string())
            })?;
            state
                .adapter
                .abort(
                    token,
                    &AbortOptions {
                        origin: options.origin,
                        reason: options.reason,
                        block: options.block.unwrap_or(true),
                        re_queue: options.re_queue.unwrap_or(false),
                        broadcast: false,
                    },
                )
                .await
                .map_err(ApiError::Orchestra)?;
        }
        "stop" => {
            state.daemon.stop(true).await;
            state.pool.stop(options.block.unwrap_or(false)).await;
        }
        "kill" => {
            state.daemon.stop(true).await;
            state
                .pool
                .kill(
                    options.origin.as_deref().unwrap_or("unknown"),
                    options.reason.as_deref().unwrap_or("unknown"),
                    options.block.unwrap_or(false),
                )
                .await;
        }
        other => {
            return Err(ApiError::BadRequest(format!("unknown 'mode={other}'")));
        }
    }
    Ok((StatusCode::OK, "OK"))
}
