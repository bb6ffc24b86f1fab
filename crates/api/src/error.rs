use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestra_errors::OrchestraError;
use serde_json::json;

/// API 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排错误: {0}")]
    Orchestra(#[from] OrchestraError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Orchestra(err) => {
                let status = match err {
                    OrchestraError::BadRequest(_) => StatusCode::BAD_REQUEST,
                    OrchestraError::UnknownToken { .. }
                    | OrchestraError::UnknownJobType(_) => StatusCode::NOT_FOUND,
                    OrchestraError::Busy => StatusCode::SERVICE_UNAVAILABLE,
                    OrchestraError::LeaseLost(_)
                    | OrchestraError::ConflictingResubmission { .. } => StatusCode::CONFLICT,
                    OrchestraError::BackendUnavailable(_)
                    | OrchestraError::Notification(_) => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

/// API 结果类型
pub type ApiResult<T> = Result<T, ApiError>;
