use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use orchestra_application::{AbortOptions, AbortOutcome, ServiceAdapter};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};

/// 服务级作业端点的共享状态。
#[derive(Clone)]
pub struct JobsState {
    pub adapter: Arc<ServiceAdapter>,
}

/// 服务级端点：提交、报告、进度与中止。
pub fn job_routes(state: JobsState) -> Router {
    Router::new()
        .route("/report", get(get_report))
        .route("/progress", get(get_progress))
        .route("/{job}", axum::routing::post(post_job).delete(delete_job))
        .with_state(state)
}

/// `POST /<job>`：校验并入队，返回 201 与作业令牌。
async fn post_job(
    State(state): State<JobsState>,
    Path(job): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let token = state
        .adapter
        .submit(&job, body)
        .await
        .map_err(ApiError::Orchestra)?;
    Ok((StatusCode::CREATED, Json(token)))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

/// `GET /report?token=`：最近一次刷写的报告。
async fn get_report(
    State(state): State<JobsState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .adapter
        .get_report(&query.token)
        .await
        .map_err(ApiError::Orchestra)?
        .ok_or_else(|| {
            ApiError::Orchestra(orchestra_errors::OrchestraError::unknown_token(
                query.token.clone(),
            ))
        })?;
    Ok(Json(report))
}

/// `GET /progress?token=`：轻量进度查询。
async fn get_progress(
    State(state): State<JobsState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<impl IntoResponse> {
    let progress = state
        .adapter
        .poll(&query.token)
        .await
        .map_err(ApiError::Orchestra)?;
    Ok(Json(progress))
}

#[derive(Debug, Default, Deserialize)]
struct AbortBody {
    origin: Option<String>,
    reason: Option<String>,
}

/// `DELETE /<job>?token=&broadcast=&re-queue=`：中止作业。
///
/// 广播转发来的请求（`broadcast=false`）默认不阻塞，以免拖垮通知
/// 服务的每请求超时。
async fn delete_job(
    State(state): State<JobsState>,
    Path(_job): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<AbortBody>>,
) -> ApiResult<impl IntoResponse> {
    let token = params
        .get("token")
        .ok_or_else(|| ApiError::BadRequest("中止请求缺少 'token'".to_string()))?;
    let broadcast = params
        .get("broadcast")
        .map(|raw| raw == "true")
        .unwrap_or(true);
    let re_queue = params
        .get("re-queue")
        .map(|raw| raw == "true")
        .unwrap_or(false);
    let block = params
        .get("block")
        .map(|raw| raw == "true")
        .unwrap_or(broadcast);
    let body = body.map(|Json(body)| body).unwrap_or_default();

    let outcome = state
        .adapter
        .abort(
            token,
            &AbortOptions {
                origin: body.origin,
                reason: body.reason,
                block,
                re_queue,
                broadcast,
            },
        )
        .await
        .map_err(ApiError::Orchestra)?;
    let outcome = match outcome {
        AbortOutcome::Aborted => "aborted",
        AbortOutcome::Completed => "completed",
        AbortOutcome::Pending => "pending",
    };
    Ok(Json(json!({"outcome": outcome})))
}
