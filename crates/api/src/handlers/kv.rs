use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, options};
use axum::{Json, Router};
use orchestra_domain::KeyValueStore;
use orchestra_errors::OrchestraError;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};

/// 键值存储中间件 API（`/db`）。
///
/// 任何 `KeyValueStore` 后端都可以挂在这里，供 `HttpStore` 客户端
/// 远程使用。
pub fn kv_routes(store: Arc<dyn KeyValueStore>) -> Router {
    Router::new()
        .route("/db", get(next_record).post(push_value))
        .route("/db", options(list_keys))
        .route(
            "/db/{key}",
            get(read_key).post(write_key).delete(delete_key),
        )
        .with_state(store)
}

async fn read_key(
    State(store): State<Arc<dyn KeyValueStore>>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let value = store
        .read(&key, params.contains_key("pop"))
        .await
        .map_err(ApiError::Orchestra)?
        .ok_or_else(|| ApiError::Orchestra(OrchestraError::unknown_token(key)))?;
    Ok(Json(value))
}

async fn write_key(
    State(store): State<Arc<dyn KeyValueStore>>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(value): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let ttl = params
        .get("ttl")
        .and_then(|raw| raw.parse::<f64>().ok())
        .map(Duration::from_secs_f64);
    store
        .write(&key, &value, ttl)
        .await
        .map_err(ApiError::Orchestra)?;
    Ok((StatusCode::OK, key))
}

async fn push_value(
    State(store): State<Arc<dyn KeyValueStore>>,
    Json(value): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let key = store.push(&value).await.map_err(ApiError::Orchestra)?;
    Ok((StatusCode::OK, key))
}

async fn delete_key(
    State(store): State<Arc<dyn KeyValueStore>>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    store.delete(&key).await.map_err(ApiError::Orchestra)?;
    Ok((StatusCode::OK, "OK"))
}

async fn list_keys(
    State(store): State<Arc<dyn KeyValueStore>>,
) -> ApiResult<impl IntoResponse> {
    let keys = store.keys().await.map_err(ApiError::Orchestra)?;
    Ok(Json(keys))
}

async fn next_record(
    State(store): State<Arc<dyn KeyValueStore>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let record = store
        .next(params.contains_key("pop"))
        .await
        .map_err(ApiError::Orchestra)?;
    match record {
        Some((key, value)) => Ok(Json(json!({"key": key, "value": value}))),
        None => Err(ApiError::Orchestra(OrchestraError::unknown_token(
            "empty store",
        ))),
    }
}
