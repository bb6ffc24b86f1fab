//! dcm-orchestra
//!
//! Digital Curation Manager 公共库的作业编排核心：分布式可扩展的
//! 作业引擎，接受用户提交的作业，持久化到共享登记簿，派发给工作者，
//! 跟踪进度与日志，支持协作式中止（含跨副本广播），并通过查询与回调
//! 暴露作业生命周期。

pub mod app;
pub mod demo;
pub mod shutdown;

pub use app::{AppMode, Application};
pub use shutdown::ShutdownManager;

pub use orchestra_application as application;
pub use orchestra_config as config;
pub use orchestra_domain as domain;
pub use orchestra_errors as errors;
pub use orchestra_infrastructure as infrastructure;
pub use orchestra_worker as worker;
