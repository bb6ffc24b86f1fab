//! 编排核心的 HTTP 层
//!
//! 薄封装的 axum 路由：编排控制面（`/orchestration`）、服务级作业
//! 端点、键值存储中间件（`/db`）、共享控制器 API 以及通知服务。
//! 所有语义都委托给应用层，这里只做请求解析与错误翻译。

pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};
pub use handlers::controller_api::controller_routes;
pub use handlers::jobs::{job_routes, JobsState};
pub use handlers::kv::kv_routes;
pub use handlers::notification::{notification_routes, NotificationState, TopicConfig};
pub use handlers::orchestration::{orchestration_routes, OrchestrationState};
