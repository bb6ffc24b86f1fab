//! 作业执行
//!
//! 工作者从控制器租约作业，在隔离的阻塞线程上运行注册的作业函数，
//! 周期性地把进度刷入登记簿并响应中止信号。`WorkerPool` 在单个副本
//! 内做纵向扩展。

pub mod context;
pub mod pool;
pub mod registry;
pub mod worker;

pub use context::{AbortSignal, JobContext};
pub use pool::WorkerPool;
pub use registry::{JobCallable, JobRegistry, JobValidator};
pub use worker::{Worker, WorkerState};
