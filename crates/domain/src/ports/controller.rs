use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_errors::OrchestraResult;

use crate::models::job::JobInfo;
use crate::models::lock::Lease;
use crate::models::message::{Instruction, Message};
use crate::models::progress::JobStatus;
use crate::models::queue::QueueEntry;
use crate::models::token::Token;

/// 编排控制器接口
///
/// 工作者访问共享队列与登记簿的唯一入口：
/// * 跟踪排队、运行中等状态的作业，
/// * 处理工作者对排队作业的租约请求，
/// * 存储工作者推送的作业结果，
/// * 记录编排相关的消息。
///
/// 同一令牌上的状态迁移由租约标识做 CAS 保护：携带过期或失效租约的
/// 写入以 `LeaseLost` 失败且不改变任何状态。
#[async_trait]
pub trait Controller: Send + Sync {
    /// 控制器名称（用于日志与元数据记录）。
    fn name(&self) -> &str;

    /// 将作业加入队列。
    ///
    /// 同一令牌的重复提交在请求体一致时返回既有令牌，否则以
    /// `ConflictingResubmission` 拒绝。
    async fn submit(&self, token: &str, info: JobInfo) -> OrchestraResult<Token>;

    /// 为 `owner` 从队列领取一个作业的租约；队列为空时返回 `None`。
    ///
    /// 派发偏好最早入队的可用条目（从未被租约占用或租约已过期），
    /// 相同时刻按令牌字典序决胜。
    async fn lease(&self, owner: &str) -> OrchestraResult<Option<Lease>>;

    /// 续约。过期或未知的租约以 `LeaseLost` 失败。
    async fn refresh_lease(&self, lease_id: &str) -> OrchestraResult<Lease>;

    /// 释放租约。
    async fn release_lease(&self, lease_id: &str) -> OrchestraResult<()>;

    /// 读取令牌元数据。
    async fn get_token(&self, token: &str) -> OrchestraResult<Token>;

    /// 读取登记簿中的作业信息。
    async fn get_info(&self, token: &str) -> OrchestraResult<JobInfo>;

    /// 读取登记簿中的作业状态。
    async fn get_status(&self, token: &str) -> OrchestraResult<JobStatus>;

    /// 携带租约向登记簿推送新的状态或作业信息。
    async fn registry_push(
        &self,
        lease_id: &str,
        status: Option<JobStatus>,
        info: Option<&JobInfo>,
    ) -> OrchestraResult<()>;

    /// 投递一条编排消息；未知令牌的消息被静默丢弃。
    async fn message_push(
        &self,
        token: &str,
        instruction: Instruction,
        origin: &str,
        content: &str,
        re_queue: bool,
    ) -> OrchestraResult<()>;

    /// 返回 `since` 之后收到的消息。
    async fn message_get(&self, since: DateTime<Utc>) -> OrchestraResult<Vec<Message>>;

    /// 当前排队中的条目（不含终态）。
    async fn queue_entries(&self) -> OrchestraResult<Vec<QueueEntry>>;

    /// 登记簿中的记录数。
    async fn registry_size(&self) -> OrchestraResult<usize>;

    /// 清理过期的租约、令牌与消息；孤立的运行中作业按重排策略处理。
    async fn cleanup(&self) -> OrchestraResult<()>;
}
