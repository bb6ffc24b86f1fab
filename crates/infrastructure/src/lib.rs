//! 编排核心的基础设施实现
//!
//! 键值存储后端（内存、磁盘、SQLite、HTTP 代理）、两种控制器方言
//! （SQLite 与 HTTP），以及跨副本广播所用的通知服务客户端。

pub mod controller;
pub mod kv;
pub mod notification;

pub use controller::http::HttpController;
pub use controller::sqlite::SqliteController;
pub use kv::disk::JsonFileStore;
pub use kv::http::HttpStore;
pub use kv::memory::MemoryStore;
pub use kv::sqlite::SqliteStore;
pub use notification::NotificationClient;

/// 以 `<prefix>-<hostname>-<uuid前8位>` 的形式生成组件名。
pub(crate) fn instance_name(prefix: &str) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let id = uuid::Uuid::new_v4().to_string();
    format!("{prefix}-{host}-{}", &id[..8])
}
