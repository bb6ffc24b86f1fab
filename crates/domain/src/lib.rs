//! 编排核心的领域模型
//!
//! 作业编排相关的核心实体（令牌、作业配置、报告、租约、消息等）以及
//! 存储与控制器的端口定义。实体只描述业务数据，不依赖具体的存储或
//! 网络实现。

pub mod models;
pub mod ports;

pub use models::job::{JobConfig, JobInfo, JobMetadata, MetadataRecord};
pub use models::lock::Lease;
pub use models::log::{JobLog, LogCategory, LogEntry};
pub use models::message::{Instruction, Message};
pub use models::progress::{JobStatus, Progress};
pub use models::queue::QueueEntry;
pub use models::report::{ChildJobRef, Report};
pub use models::token::Token;
pub use ports::controller::Controller;
pub use ports::kv::KeyValueStore;
