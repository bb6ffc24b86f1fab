use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orchestra_domain::{Controller, JobConfig, JobInfo, Progress, Report, Token};
use orchestra_errors::{OrchestraError, OrchestraResult};
use orchestra_worker::{JobRegistry, WorkerPool};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::abort::{AbortCoordinator, AbortOptions, AbortOutcome};

/// 进度钩子：`(令牌, 进度)`。
pub type ProgressHook = Arc<dyn Fn(&str, &Progress) + Send + Sync>;

/// 服务门面
///
/// HTTP 层消费的公共契约：提交、查询、报告与中止。提交时校验请求体
/// 并分配令牌；带 `callbackUrl` 的提交会在作业进入终态时收到一次
/// 回调。
pub struct ServiceAdapter {
    controller: Arc<dyn Controller>,
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    coordinator: Arc<AbortCoordinator>,
    callbacks: Mutex<HashMap<String, String>>,
    http: reqwest::Client,
}

impl ServiceAdapter {
    pub fn new(
        controller: Arc<dyn Controller>,
        registry: Arc<JobRegistry>,
        pool: Arc<WorkerPool>,
        coordinator: Arc<AbortCoordinator>,
    ) -> Self {
        Self {
            controller,
            registry,
            pool,
            coordinator,
            callbacks: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// 校验请求体、分配令牌并把作业写入队列。
    pub async fn submit(&self, job_type: &str, body: Value) -> OrchestraResult<Token> {
        if !self.pool.ready() {
            return Err(OrchestraError::Busy);
        }
        self.registry.validate(job_type, &body)?;

        let callback_url = body
            .get("callbackUrl")
            .and_then(Value::as_str)
            .map(str::to_string);

        let config = JobConfig::new(job_type, body)
            .with_properties(serde_json::json!({"path": format!("/{job_type}")}));
        let token_value = Uuid::new_v4().to_string();
        let token = self
            .controller
            .submit(&token_value, JobInfo::new(config))
            .await?;

        if let Some(url) = callback_url {
            self.callbacks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(token.value.clone(), url);
        }
        debug!("接受提交，作业类型 '{}'，令牌 '{}'。", job_type, token.value);
        Ok(token)
    }

    /// 轻量查询当前进度。
    pub async fn poll(&self, token: &str) -> OrchestraResult<Progress> {
        let info = self.controller.get_info(token).await?;
        if let Some(report) = info.report {
            return Ok(report.progress);
        }
        let status = self.controller.get_status(token).await?;
        Ok(Progress {
            status,
            ..Progress::default()
        })
    }

    pub async fn get_info(&self, token: &str) -> OrchestraResult<JobInfo> {
        self.controller.get_info(token).await
    }

    /// 最近一次刷写的报告；运行中的作业最多滞后一个推送周期。
    pub async fn get_report(&self, token: &str) -> OrchestraResult<Option<Report>> {
        Ok(self.controller.get_info(token).await?.report)
    }

    pub async fn abort(
        &self,
        token: &str,
        options: &AbortOptions,
    ) -> OrchestraResult<AbortOutcome> {
        self.coordinator.abort(token, options).await
    }

    /// 启动进度钩子与终态回调的轮询循环。
    ///
    /// 钩子在每个周期收到所有被跟踪作业的进度；注册了 `callbackUrl`
    /// 的作业进入终态时收到一次 `POST`（请求体为令牌 JSON）。
    pub fn run(
        self: &Arc<Self>,
        hooks: Vec<ProgressHook>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let adapter = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let tracked: Vec<(String, String)> = {
                    let callbacks = adapter
                        .callbacks
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    callbacks
                        .iter()
                        .map(|(token, url)| (token.clone(), url.clone()))
                        .collect()
                };
                for (token, url) in tracked {
                    let progress = match adapter.poll(&token).await {
                        Ok(progress) => progress,
                        Err(OrchestraError::UnknownToken { .. }) => {
                            // 令牌已过期，不会再有终态通知
                            adapter.forget_callback(&token);
                            continue;
                        }
                        Err(err) => {
                            warn!("回调循环查询作业 '{}' 失败: {}", token, err);
                            continue;
                        }
                    };
                    for hook in &hooks {
                        hook(&token, &progress);
                    }
                    if progress.status.is_terminal() {
                        adapter.fire_callback(&token, &url).await;
                        adapter.forget_callback(&token);
                    }
                }
                tokio::time::sleep(interval).await;
            }
        })
    }

    async fn fire_callback(&self, token: &str, url: &str) {
        let body = match self.controller.get_token(token).await {
            Ok(token) => token,
            Err(_) => Token::with_value(token.to_string(), None),
        };
        match self
            .http
            .post(url)
            .timeout(Duration::from_secs(10))
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("作业 '{}' 的终态回调已送达 '{}'。", token, url);
            }
            Ok(response) => {
                warn!(
                    "作业 '{}' 的终态回调被 '{}' 拒绝: {}",
                    token,
                    url,
                    response.status()
                );
            }
            Err(err) => {
                warn!("作业 '{}' 的终态回调发送失败: {}", token, err);
            }
        }
    }

    fn forget_callback(&self, token: &str) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }
}
