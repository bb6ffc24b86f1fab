use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use orchestra_domain::{Controller, Instruction, JobInfo, JobStatus};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ApiError, ApiResult};

/// 共享控制器 API。
///
/// `HttpController` 客户端的服务端：把一个本地控制器（通常是基于
/// 文件的 SQLite 控制器）暴露给其他副本。
pub fn controller_routes(controller: Arc<dyn Controller>) -> Router {
    Router::new()
        .route("/queue/push", post(queue_push))
        .route("/queue/pop", post(queue_pop))
        .route("/queue", get(queue_entries))
        .route("/lock", put(refresh_lease).delete(release_lease))
        .route("/registry", put(registry_push))
        .route("/registry/token", get(get_token))
        .route("/registry/info", get(get_info))
        .route("/registry/status", get(get_status))
        .route("/registry/size", get(registry_size))
        .route("/messages", post(message_push).get(message_get))
        .with_state(controller)
}

#[derive(Debug, Deserialize)]
struct QueuePushBody {
    token: String,
    info: JobInfo,
}

async fn queue_push(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<QueuePushBody>,
) -> ApiResult<impl IntoResponse> {
    let token = controller.submit(&body.token, body.info).await?;
    Ok(Json(token))
}

#[derive(Debug, Deserialize)]
struct QueuePopBody {
    owner: String,
}

async fn queue_pop(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<QueuePopBody>,
) -> ApiResult<impl IntoResponse> {
    match controller.lease(&body.owner).await? {
        Some(lease) => Ok(Json(lease).into_response()),
        None => Ok((StatusCode::NO_CONTENT, "").into_response()),
    }
}

async fn queue_entries(
    State(controller): State<Arc<dyn Controller>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(controller.queue_entries().await?))
}

#[derive(Debug, Deserialize)]
struct LeaseBody {
    id: String,
}

async fn refresh_lease(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<LeaseBody>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(controller.refresh_lease(&body.id).await?))
}

async fn release_lease(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<LeaseBody>,
) -> ApiResult<impl IntoResponse> {
    controller.release_lease(&body.id).await?;
    Ok((StatusCode::OK, "OK"))
}

#[derive(Debug, Deserialize)]
struct RegistryPushBody {
    #[serde(rename = "leaseId")]
    lease_id: String,
    status: Option<JobStatus>,
    info: Option<JobInfo>,
}

async fn registry_push(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<RegistryPushBody>,
) -> ApiResult<impl IntoResponse> {
    controller
        .registry_push(&body.lease_id, body.status, body.info.as_ref())
        .await?;
    Ok((StatusCode::OK, "OK"))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

async fn get_token(
    State(controller): State<Arc<dyn Controller>>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(controller.get_token(&query.token).await?))
}

async fn get_info(
    State(controller): State<Arc<dyn Controller>>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(controller.get_info(&query.token).await?))
}

async fn get_status(
    State(controller): State<Arc<dyn Controller>>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = controller.get_status(&query.token).await?;
    Ok(Json(json!({"status": status})))
}

async fn registry_size(
    State(controller): State<Arc<dyn Controller>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(json!({"size": controller.registry_size().await?})))
}

#[derive(Debug, Deserialize)]
struct MessagePushBody {
    token: String,
    instruction: Instruction,
    origin: String,
    content: String,
    #[serde(rename = "reQueue", default)]
    re_queue: bool,
}

async fn message_push(
    State(controller): State<Arc<dyn Controller>>,
    Json(body): Json<MessagePushBody>,
) -> ApiResult<impl IntoResponse> {
    controller
        .message_push(
            &body.token,
            body.instruction,
            &body.origin,
            &body.content,
            body.re_queue,
        )
        .await?;
    Ok((StatusCode::OK, "OK"))
}

async fn message_get(
    State(controller): State<Arc<dyn Controller>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let since = params
        .get("since")
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or(0);
    let since = Utc
        .timestamp_millis_opt(since)
        .single()
        .ok_or_else(|| ApiError::BadRequest("无法解析 'since' 参数".to_string()))?;
    Ok(Json(controller.message_get(since).await?))
}
