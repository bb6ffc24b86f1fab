//! 编排核心的应用层
//!
//! 守护进程原语、中止协调器与对外的服务门面。HTTP 路由只做薄封装，
//! 所有编排语义都在这里。

pub mod abort;
pub mod adapter;
pub mod daemon;

pub use abort::{AbortCoordinator, AbortOptions, AbortOutcome};
pub use adapter::{ProgressHook, ServiceAdapter};
pub use daemon::Daemon;
