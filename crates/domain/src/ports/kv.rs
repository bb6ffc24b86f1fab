use std::time::Duration;

use async_trait::async_trait;
use orchestra_errors::OrchestraResult;
use serde_json::Value;

/// 键值存储接口
///
/// 键到 JSON 值的统一映射，带可选的存活时长。所有操作在单个后端实例
/// 内可串行化；同一个键上的并发访问表现为线性一致。过期检查是被动
/// 的（读取时判定）。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 写入（幂等替换）。`ttl` 为记录的存活时长，`None` 表示不过期。
    async fn write(&self, key: &str, value: &Value, ttl: Option<Duration>) -> OrchestraResult<()>;

    /// 读取；`pop` 为真时原子地读取并删除。缺失的键返回 `None`。
    async fn read(&self, key: &str, pop: bool) -> OrchestraResult<Option<Value>>;

    /// 生成一个未被占用的键并写入，返回该键。
    async fn push(&self, value: &Value) -> OrchestraResult<String>;

    /// 删除（幂等）。
    async fn delete(&self, key: &str) -> OrchestraResult<()>;

    /// 所有未过期的键，无序。
    async fn keys(&self) -> OrchestraResult<Vec<String>>;

    /// 以非确定但公平的轮转方式返回一条记录；`pop` 为真时删除。
    async fn next(&self, pop: bool) -> OrchestraResult<Option<(String, Value)>>;
}
