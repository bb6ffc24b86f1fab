//! 编排核心的配置
//!
//! 所有配置来自环境变量（`ORCHESTRA_*` 等），加载为一个 `AppConfig`
//! 结构后注入核心组件。复杂的子配置（控制器、工作者参数）通过 JSON
//! 环境变量覆盖默认值。

mod loader;
mod models;
mod tests;

pub use loader::load_from_env;
pub use models::{
    AppConfig, ControllerConfig, ControllerKind, DaemonConfig, LogLevel, WorkerConfig,
};
