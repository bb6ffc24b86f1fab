use std::sync::Arc;
use std::time::Duration;

use orchestra_domain::{Controller, Instruction, JobStatus};
use orchestra_errors::{OrchestraError, OrchestraResult};
use orchestra_infrastructure::NotificationClient;
use orchestra_worker::WorkerPool;
use serde_json::json;
use tracing::{debug, info, warn};

/// 中止请求的选项。
#[derive(Debug, Clone)]
pub struct AbortOptions {
    pub origin: Option<String>,
    pub reason: Option<String>,
    /// 阻塞直到登记簿出现终态（或超时）
    pub block: bool,
    /// 中止后重新排队
    pub re_queue: bool,
    /// 通过通知服务向所有副本广播
    pub broadcast: bool,
}

impl Default for AbortOptions {
    fn default() -> Self {
        Self {
            origin: None,
            reason: None,
            block: true,
            re_queue: false,
            broadcast: true,
        }
    }
}

/// 中止的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// 登记簿已显示 aborted
    Aborted,
    /// 作业抢先正常完成
    Completed,
    /// 信号已发出；终态尚未在超时内出现（部分成功）
    Pending,
}

/// 中止协调器
///
/// 对同一令牌幂等的三条中止路径：本地进程内信号、控制器消息（同一
/// 控制器的其他工作者），以及经由通知服务的跨副本广播。父作业的子
/// 作业级联由持有作业的工作者在终结时执行。
pub struct AbortCoordinator {
    controller: Arc<dyn Controller>,
    pool: Arc<WorkerPool>,
    notification: Option<Arc<NotificationClient>>,
    abort_timeout: Duration,
}

impl AbortCoordinator {
    pub fn new(
        controller: Arc<dyn Controller>,
        pool: Arc<WorkerPool>,
        notification: Option<Arc<NotificationClient>>,
        abort_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            pool,
            notification,
            abort_timeout,
        }
    }

    /// 中止一个作业。
    ///
    /// 任意次调用最终把作业留在 `aborted`（或已抢先 `completed`）；
    /// 不泄漏中间状态。
    pub async fn abort(&self, token: &str, options: &AbortOptions) -> OrchestraResult<AbortOutcome> {
        let origin = options.origin.as_deref().unwrap_or("unknown");
        let reason = options.reason.as_deref().unwrap_or("unknown");

        // 终态作业直接返回，保证幂等
        match self.controller.get_status(token).await? {
            JobStatus::Completed => return Ok(AbortOutcome::Completed),
            JobStatus::Aborted => return Ok(AbortOutcome::Aborted),
            _ => {}
        }

        info!(
            "收到对作业 '{}' 的中止请求（来源 '{}'，原因 '{}'）。",
            token, origin, reason
        );

        // 本地路径：作业就在本副本时立即置位
        if self
            .pool
            .abort_local(token, origin, reason, options.re_queue)
        {
            debug!("作业 '{}' 在本副本运行，已发出本地中止信号。", token);
        }

        // 控制器消息：覆盖共享同一控制器的所有工作者
        self.controller
            .message_push(token, Instruction::Abort, origin, reason, options.re_queue)
            .await?;

        // 跨副本广播
        if options.broadcast {
            if let Some(notification) = &self.notification {
                notification
                    .notify(
                        Some(json!({
                            "token": token,
                            "broadcast": "false",
                            "re-queue": options.re_queue.to_string(),
                        })),
                        Some(json!({"origin": origin, "reason": reason})),
                        true,
                    )
                    .await
                    .map_err(|err| {
                        warn!("作业 '{}' 的中止广播失败: {}", token, err);
                        OrchestraError::Notification(err.to_string())
                    })?;
            }
        }

        if !options.block {
            return Ok(AbortOutcome::Pending);
        }

        // 同步语义：轮询登记簿直至终态或超时
        let deadline = tokio::time::Instant::now() + self.abort_timeout;
        loop {
            match self.controller.get_status(token).await {
                Ok(JobStatus::Aborted) => return Ok(AbortOutcome::Aborted),
                Ok(JobStatus::Completed) => return Ok(AbortOutcome::Completed),
                // 重新排队也算信号已兑现
                Ok(JobStatus::Queued) if options.re_queue => return Ok(AbortOutcome::Aborted),
                Ok(_) => {}
                Err(OrchestraError::UnknownToken { .. }) => {
                    // 令牌在等待期间过期，按已中止处理
                    return Ok(AbortOutcome::Aborted);
                }
                Err(err) => warn!("轮询作业 '{}' 的状态失败: {}", token, err),
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "作业 '{}' 的中止在 {:?} 内未完成，返回部分成功。",
                    token, self.abort_timeout
                );
                return Ok(AbortOutcome::Pending);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
