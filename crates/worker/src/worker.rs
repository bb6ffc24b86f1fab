use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use orchestra_config::WorkerConfig;
use orchestra_domain::{
    ChildJobRef, Controller, Instruction, JobStatus, Lease, LogCategory, Report,
};
use orchestra_errors::{OrchestraError, OrchestraResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::context::{AbortSignal, JobContext, PushRequest};
use crate::registry::JobRegistry;

/// 工作者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Idle,
    Busy,
}

struct CurrentJob {
    token: String,
    context: JobContext,
}

struct WorkerInner {
    name: String,
    host: String,
    controller: Arc<dyn Controller>,
    registry: Arc<JobRegistry>,
    config: WorkerConfig,
    stop: AtomicBool,
    stop_on_idle: AtomicBool,
    loop_running: AtomicBool,
    current: Mutex<Option<CurrentJob>>,
    http: reqwest::Client,
}

/// 监督循环的退出方式。
enum Exit {
    /// 作业线程自行返回
    Finished,
    /// 宽限期耗尽，线程被放弃
    Abandoned,
}

/// 工作者
///
/// 在循环中向控制器请求作业并处理。每个作业在专属的阻塞线程上运行；
/// 监督端负责周期性推送报告、续约租约、轮询中止消息并执行超时。
/// 线程无法被强杀，宽限期耗尽后被放弃：其后续的报告变更不再可见，
/// 作业按中止终结。
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    pub fn new(
        controller: Arc<dyn Controller>,
        registry: Arc<JobRegistry>,
        config: WorkerConfig,
        host: String,
    ) -> Self {
        let machine = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            inner: Arc::new(WorkerInner {
                name: format!("Worker-{machine}-{}", &id[..8]),
                host,
                controller,
                registry,
                config,
                stop: AtomicBool::new(false),
                stop_on_idle: AtomicBool::new(false),
                loop_running: AtomicBool::new(false),
                current: Mutex::new(None),
                http: reqwest::Client::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> WorkerState {
        if !self.inner.loop_running.load(Ordering::SeqCst) {
            return WorkerState::Stopped;
        }
        if self.current_token().is_some() {
            return WorkerState::Busy;
        }
        WorkerState::Idle
    }

    pub fn current_token(&self) -> Option<String> {
        self.inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|job| job.token.clone())
    }

    /// 允许重新进入工作循环（池在启动时调用）。
    pub fn reset_controls(&self) {
        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.stop_on_idle.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn stop_on_idle_requested(&self) -> bool {
        self.inner.stop_on_idle.load(Ordering::SeqCst)
    }

    /// 进入下一轮循环前停止。
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
    }

    /// 下一次队列为空时停止。
    pub fn stop_on_idle(&self) {
        self.inner.stop_on_idle.store(true, Ordering::SeqCst);
    }

    /// 中止当前作业并停止工作者。
    pub fn kill(&self, origin: &str, reason: &str) {
        if self.state() != WorkerState::Stopped {
            info!(
                "工作者 '{}' 收到来自 '{}' 的终止请求（{}）。",
                self.inner.name, origin, reason
            );
        }
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.stop_on_idle.store(true, Ordering::SeqCst);
        if let Some(job) = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            job.context.request_abort(origin, reason, false);
        }
    }

    /// 若该工作者正持有 `token`，则发出中止信号并返回 `true`。
    pub fn abort_current(&self, token: &str, origin: &str, reason: &str, re_queue: bool) -> bool {
        let current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
        match current.as_ref() {
            Some(job) if job.token == token => {
                job.context.request_abort(origin, reason, re_queue);
                true
            }
            _ => false,
        }
    }

    /// 工作循环：请求租约并处理作业，直到被要求停止。
    pub async fn run(&self) {
        let inner = &self.inner;
        inner.loop_running.store(true, Ordering::SeqCst);
        info!("工作者 '{}' 已启动。", inner.name);

        while !inner.stop.load(Ordering::SeqCst) {
            match inner.controller.lease(&inner.name).await {
                Err(err) => {
                    error!(
                        "工作者 '{}' 从控制器获取队列失败: {}",
                        inner.name, err
                    );
                }
                Ok(None) => {
                    if inner.stop_on_idle.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Ok(Some(lease)) => {
                    debug!(
                        "工作者 '{}' 开始处理作业 '{}'。",
                        inner.name, lease.token
                    );
                    let lease_id = lease.id.clone();
                    let token = lease.token.clone();
                    self.run_job(lease).await;
                    debug!("工作者 '{}' 结束处理作业 '{}'。", inner.name, token);
                    if let Err(err) = inner.controller.release_lease(&lease_id).await {
                        warn!(
                            "工作者 '{}' 释放作业 '{}' 的租约失败: {}",
                            inner.name, token, err
                        );
                    }
                    continue;
                }
            }
            tokio::time::sleep(inner.config.interval).await;
        }

        inner.loop_running.store(false, Ordering::SeqCst);
        info!("工作者 '{}' 已停止。", inner.name);
    }

    /// 处理一个已租约的作业。
    async fn run_job(&self, lease: Lease) {
        let inner = &self.inner;

        // 载入既有数据
        let mut info = match inner.controller.get_info(&lease.token).await {
            Ok(info) => info,
            Err(err) => {
                error!(
                    "工作者 '{}' 读取作业 '{}' 的信息失败: {}",
                    inner.name, lease.token, err
                );
                return;
            }
        };
        if info.token.is_none() {
            info.token = inner.controller.get_token(&lease.token).await.ok();
        }

        let callable = match inner.registry.callable(&info.config.job_type) {
            Ok(callable) => callable,
            Err(err) => {
                // 未注册的作业类型无法执行，直接终结
                error!(
                    "工作者 '{}' 遇到未知的作业类型 '{}': {}",
                    inner.name, info.config.job_type, err
                );
                let token = info.token.clone();
                let report = info
                    .report
                    .get_or_insert_with(|| Report::new(inner.host.clone(), token));
                report.progress.abort();
                report.progress.verbose = "unknown job type".into();
                report.log.log(
                    LogCategory::Error,
                    &inner.name,
                    format!("Unknown job type '{}'.", info.config.job_type),
                );
                info.metadata.abort(&inner.name);
                let _ = inner
                    .controller
                    .registry_push(&lease.id, Some(JobStatus::Aborted), Some(&info))
                    .await;
                return;
            }
        };

        // 初始化报告
        let token = info.token.clone();
        let report = info
            .report
            .get_or_insert_with(|| Report::new(inner.host.clone(), token.clone()));
        report.token = token;
        report.args = info.config.request_body.clone();
        report.progress.run();
        report.progress.verbose = "job is running".into();
        if let Some(produced) = info.metadata.produced.clone() {
            report.log.log(
                LogCategory::Event,
                &inner.name,
                format!(
                    "Produced at {} by '{}'.",
                    produced.datetime,
                    produced.by.unwrap_or_default()
                ),
            );
        }
        info.metadata.consume(&inner.name);
        if let (Some(consumed), Some(report)) =
            (info.metadata.consumed.clone(), info.report.as_mut())
        {
            report.log.log(
                LogCategory::Event,
                &inner.name,
                format!("Consumed at {} by '{}'.", consumed.datetime, inner.name),
            );
        }

        let (ctx, push_rx) = JobContext::new(&inner.name, info);
        *inner.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(CurrentJob {
            token: lease.token.clone(),
            context: ctx.clone(),
        });

        // 初次推送（running）；此时租约已失效则不再启动作业
        if let Err(err) = inner
            .controller
            .registry_push(&lease.id, Some(JobStatus::Running), Some(&ctx.snapshot()))
            .await
        {
            error!(
                "工作者 '{}' 推送作业 '{}' 的初始状态失败: {}",
                inner.name, lease.token, err
            );
            if matches!(err, OrchestraError::LeaseLost(_)) {
                self.clear_current();
                return;
            }
        }

        // 在专属阻塞线程上运行作业函数
        let job_ctx = ctx.clone();
        let handle = tokio::task::spawn_blocking(move || callable(job_ctx));

        let (exit, lease_lost) = self.supervise(&lease, &ctx, &handle, push_rx).await;

        match exit {
            Exit::Finished => {
                let job_result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) => {
                        // 作业线程崩溃：保持 running 状态交还给控制器，
                        // 由其按重排策略处理
                        error!(
                            "工作者 '{}' 的作业 '{}' 线程崩溃: {}",
                            inner.name, lease.token, join_err
                        );
                        self.clear_current();
                        return;
                    }
                };
                if ctx.aborted() {
                    self.finalize_aborted(&lease, &ctx, lease_lost).await;
                } else {
                    self.finalize_finished(&lease, &ctx, job_result, lease_lost)
                        .await;
                }
            }
            Exit::Abandoned => {
                warn!(
                    "工作者 '{}' 放弃了作业 '{}' 的执行线程。",
                    inner.name, lease.token
                );
                self.finalize_aborted(&lease, &ctx, lease_lost).await;
            }
        }
        self.clear_current();
    }

    /// 监督作业线程：推送、续约、消息轮询与超时。
    async fn supervise(
        &self,
        lease: &Lease,
        ctx: &JobContext,
        handle: &tokio::task::JoinHandle<OrchestraResult<()>>,
        mut push_rx: mpsc::UnboundedReceiver<PushRequest>,
    ) -> (Exit, bool) {
        let inner = &self.inner;
        let started = Instant::now();
        let mut last_push = started;
        let mut last_refresh = started;
        let mut last_message_poll = started;
        let mut message_since: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;
        let mut pending_push = false;
        let mut lease_lost = false;
        let mut abort_deadline: Option<Instant> = None;
        let tick = Duration::from_millis(20);

        let exit = loop {
            if handle.is_finished() {
                break Exit::Finished;
            }

            while let Ok(request) = push_rx.try_recv() {
                match request {
                    PushRequest::Forced if !lease_lost => {
                        lease_lost = self.push_running(lease, ctx).await;
                        last_push = Instant::now();
                        pending_push = false;
                    }
                    PushRequest::Forced => {}
                    PushRequest::Debounced => pending_push = true,
                }
            }

            if !lease_lost {
                if pending_push && last_push.elapsed() >= inner.config.registry_push_interval {
                    lease_lost = self.push_running(lease, ctx).await;
                    last_push = Instant::now();
                    pending_push = false;
                }

                if !lease_lost && last_refresh.elapsed() >= inner.config.lock_refresh_interval {
                    match inner.controller.refresh_lease(&lease.id).await {
                        Ok(_) => last_refresh = Instant::now(),
                        Err(OrchestraError::LeaseLost(err)) => {
                            // 失去租约：立即中止，不再写登记簿
                            error!(
                                "工作者 '{}' 在续约作业 '{}' 时发现租约失效: {}",
                                inner.name, lease.token, err
                            );
                            lease_lost = true;
                            ctx.request_abort(&inner.name, "stale lock", false);
                        }
                        Err(err) => {
                            error!(
                                "工作者 '{}' 续约作业 '{}' 失败: {}",
                                inner.name, lease.token, err
                            );
                            last_refresh = Instant::now();
                        }
                    }
                }

                if !lease_lost && last_message_poll.elapsed() >= inner.config.message_interval {
                    let poll_from = message_since;
                    message_since = Utc::now();
                    match inner.controller.message_get(poll_from).await {
                        Ok(messages) => {
                            for message in messages {
                                if message.token == lease.token
                                    && message.instruction == Instruction::Abort
                                {
                                    ctx.request_abort(
                                        &message.origin,
                                        &message.content,
                                        message.re_queue,
                                    );
                                }
                            }
                        }
                        Err(err) => {
                            error!(
                                "工作者 '{}' 拉取作业 '{}' 的消息失败: {}",
                                inner.name, lease.token, err
                            );
                        }
                    }
                    last_message_poll = Instant::now();
                }
            }

            if let Some(timeout) = inner.config.process_timeout {
                if started.elapsed() > timeout && !ctx.aborted() {
                    ctx.request_abort(
                        &inner.name,
                        format!("process timeout after {} seconds", timeout.as_secs_f64()),
                        false,
                    );
                }
            }

            if ctx.aborted() {
                match abort_deadline {
                    None => abort_deadline = Some(Instant::now() + inner.config.abort_grace),
                    Some(deadline) if Instant::now() >= deadline => break Exit::Abandoned,
                    Some(_) => {}
                }
            }

            tokio::time::sleep(tick).await;
        };
        (exit, lease_lost)
    }

    /// 推送当前快照（running）；返回租约是否已失效。
    async fn push_running(&self, lease: &Lease, ctx: &JobContext) -> bool {
        match self
            .inner
            .controller
            .registry_push(&lease.id, Some(JobStatus::Running), Some(&ctx.snapshot()))
            .await
        {
            Ok(()) => false,
            Err(OrchestraError::LeaseLost(err)) => {
                error!(
                    "工作者 '{}' 推送作业 '{}' 时发现租约失效: {}",
                    self.inner.name, lease.token, err
                );
                ctx.request_abort(&self.inner.name, "stale lock", false);
                true
            }
            Err(err) => {
                // 尽力而为的可观测性：推送失败不终止作业
                warn!(
                    "工作者 '{}' 推送作业 '{}' 失败，稍后重试: {}",
                    self.inner.name, lease.token, err
                );
                false
            }
        }
    }

    /// 作业线程正常返回后的终结（完成或作业级失败）。
    async fn finalize_finished(
        &self,
        lease: &Lease,
        ctx: &JobContext,
        job_result: OrchestraResult<()>,
        lease_lost: bool,
    ) {
        let inner = &self.inner;
        ctx.with_info(|info| {
            info.metadata.complete(&inner.name);
            let completed = info.metadata.completed.clone();
            if let Some(report) = info.report.as_mut() {
                match &job_result {
                    Ok(()) => {
                        report.progress.complete();
                        report.progress.verbose = "job completed".into();
                        if let Some(completed) = completed {
                            report.log.log(
                                LogCategory::Event,
                                &inner.name,
                                format!(
                                    "Completed at {} by '{}'.",
                                    completed.datetime, inner.name
                                ),
                            );
                        }
                    }
                    Err(err) => {
                        report.progress.complete();
                        report.progress.verbose = "job failed".into();
                        report.log.log(
                            LogCategory::Error,
                            &inner.name,
                            format!("Job failed due to error in job execution: {err}"),
                        );
                    }
                }
            }
        });
        if lease_lost {
            return;
        }
        if let Err(err) = inner
            .controller
            .registry_push(&lease.id, Some(JobStatus::Completed), Some(&ctx.snapshot()))
            .await
        {
            error!(
                "工作者 '{}' 推送作业 '{}' 的最终状态失败: {}",
                inner.name, lease.token, err
            );
        }
    }

    /// 中止路径的终结：级联中止子作业并写入最终报告。
    async fn finalize_aborted(&self, lease: &Lease, ctx: &JobContext, lease_lost: bool) {
        let inner = &self.inner;
        let signal = ctx.abort_signal().unwrap_or_else(|| AbortSignal {
            origin: inner.name.clone(),
            reason: "unknown".to_string(),
            re_queue: false,
        });
        info!(
            "作业 '{}' 被 '{}' 中止（{}）。",
            lease.token, signal.origin, signal.reason
        );

        self.abort_children(ctx, &signal).await;

        if signal.re_queue {
            // 应请求中止并重新排队：清除执行痕迹，作业回到队列
            ctx.with_info(|info| {
                info.metadata.requeue();
                if let Some(report) = info.report.as_mut() {
                    report.progress.queue();
                    report.progress.numeric = 0;
                    report.progress.verbose =
                        format!("requeued on abort request by '{}'", signal.origin);
                    report.log.log(
                        LogCategory::Event,
                        &inner.name,
                        format!(
                            "Aborted and requeued by '{}' ({}).",
                            signal.origin, signal.reason
                        ),
                    );
                }
            });
            if lease_lost {
                return;
            }
            if let Err(err) = inner
                .controller
                .registry_push(&lease.id, Some(JobStatus::Queued), Some(&ctx.snapshot()))
                .await
            {
                error!(
                    "工作者 '{}' 重新排队作业 '{}' 失败: {}",
                    inner.name, lease.token, err
                );
            }
            return;
        }

        ctx.with_info(|info| {
            info.metadata.abort(&signal.origin);
            let aborted = info.metadata.aborted.clone();
            if let Some(report) = info.report.as_mut() {
                report.progress.abort();
                report.progress.verbose = format!("job aborted ({})", signal.reason);
                if let Some(aborted) = aborted {
                    report.log.log(
                        LogCategory::Event,
                        &inner.name,
                        format!("Aborted at {} by '{}'.", aborted.datetime, signal.origin),
                    );
                }
                report.log.log(
                    LogCategory::Error,
                    &inner.name,
                    format!(
                        "Job aborted by '{}' ({}).",
                        signal.origin, signal.reason
                    ),
                );
            }
        });
        if lease_lost {
            return;
        }
        if let Err(err) = inner
            .controller
            .registry_push(&lease.id, Some(JobStatus::Aborted), Some(&ctx.snapshot()))
            .await
        {
            error!(
                "工作者 '{}' 推送作业 '{}' 的最终状态失败: {}",
                inner.name, lease.token, err
            );
        }
    }

    /// 级联中止所有子作业；先抓取各子作业的最新报告快照。
    async fn abort_children(&self, ctx: &JobContext, signal: &AbortSignal) {
        let inner = &self.inner;
        for child in ctx.children() {
            debug!("正在中止子作业 '{}'。", child.id);
            match self.fetch_child_report(&child).await {
                Ok(Some(report)) => {
                    ctx.with_report(|parent| parent.attach_child(&child.id, report));
                }
                Ok(None) => {}
                Err(err) => {
                    debug!("抓取子作业 '{}' 的报告失败: {}", child.id, err);
                }
            }
            if let Err(err) = self.abort_child(&child, signal).await {
                warn!(
                    "工作者 '{}' 中止子作业 '{}' 失败: {}",
                    inner.name, child.id, err
                );
                let body = format!("failed to abort child '{}': {err}", child.id);
                ctx.with_report(|report| {
                    report
                        .log
                        .log(LogCategory::Warning, &inner.name, body)
                });
            }
        }
    }

    async fn fetch_child_report(&self, child: &ChildJobRef) -> OrchestraResult<Option<Report>> {
        let url = format!(
            "{}/report?token={}",
            child.base_url.trim_end_matches('/'),
            child.token
        );
        let timeout = Duration::from_secs_f64(child.timeout.unwrap_or(10) as f64);
        let response = self.inner.http.get(url).timeout(timeout).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(Some(response.json().await?))
    }

    async fn abort_child(&self, child: &ChildJobRef, signal: &AbortSignal) -> OrchestraResult<()> {
        let job = child.id.split('@').next().unwrap_or_default();
        let url = format!(
            "{}/{job}?token={}&broadcast=false",
            child.base_url.trim_end_matches('/'),
            child.token
        );
        let timeout = Duration::from_secs_f64(child.timeout.unwrap_or(10) as f64);
        let response = self
            .inner
            .http
            .delete(url)
            .timeout(timeout)
            .json(&serde_json::json!({
                "origin": signal.origin,
                "reason": signal.reason,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OrchestraError::Http(format!(
                "子作业服务返回 {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn clear_current(&self) {
        *self.inner.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
