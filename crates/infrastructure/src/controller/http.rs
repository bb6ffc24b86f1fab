use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestra_config::ControllerConfig;
use orchestra_domain::{
    Controller, Instruction, JobInfo, JobStatus, Lease, Message, QueueEntry, Token,
};
use orchestra_errors::{OrchestraError, OrchestraResult};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::warn;

use crate::instance_name;

/// HTTP 控制器
///
/// 共享控制器 API 的瘦客户端：把 `Controller` 的各个操作翻译成对远端
/// （由 orchestra-api 提供的控制器路由）的 HTTP 调用。请求超时与重试
/// 行为由控制器配置决定。
pub struct HttpController {
    base_url: String,
    name: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_interval: Duration,
}

impl HttpController {
    pub fn new(config: &ControllerConfig) -> OrchestraResult<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            OrchestraError::config_error("http 控制器缺少 base_url 配置")
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| OrchestraError::backend_unavailable(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            name: instance_name("Controller"),
            client,
            max_retries: config.max_retries,
            retry_interval: config.retry_interval,
        })
    }

    async fn run(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        skip_retry: bool,
    ) -> OrchestraResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let retries = if skip_retry { 0 } else { self.max_retries };
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempt >= retries {
                        return Err(OrchestraError::backend_unavailable(format!(
                            "控制器 '{}' 对 '{url}' 的 {method} 请求失败: {err}",
                            self.name
                        )));
                    }
                    attempt += 1;
                    warn!(
                        "控制器 '{}' 的请求失败，将在第 {}/{} 次重试: {}",
                        self.name, attempt, retries, err
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// 统一的错误翻译：404 → 未知令牌，409 → 租约失效 / 冲突。
    async fn reject(response: reqwest::Response, context: &str) -> OrchestraError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => OrchestraError::unknown_token(body),
            StatusCode::CONFLICT => OrchestraError::lease_lost(body),
            _ => OrchestraError::backend_unavailable(format!("{context}: {status} {body}")),
        }
    }
}

#[async_trait]
impl Controller for HttpController {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, token: &str, info: JobInfo) -> OrchestraResult<Token> {
        let response = self
            .run(
                Method::POST,
                "/queue/push",
                Some(&json!({"token": token, "info": info})),
                false,
            )
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(OrchestraError::ConflictingResubmission {
                token: token.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::reject(response, "提交作业").await);
        }
        Ok(response.json().await?)
    }

    async fn lease(&self, owner: &str) -> OrchestraResult<Option<Lease>> {
        let response = match self
            .run(
                Method::POST,
                "/queue/pop",
                Some(&json!({"owner": owner})),
                true,
            )
            .await
        {
            Ok(response) => response,
            // 领取失败按空队列处理，下一轮重试
            Err(_) => return Ok(None),
        };
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Ok(None),
        }
    }

    async fn refresh_lease(&self, lease_id: &str) -> OrchestraResult<Lease> {
        let response = self
            .run(Method::PUT, "/lock", Some(&json!({"id": lease_id})), false)
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "续约").await);
        }
        Ok(response.json().await?)
    }

    async fn release_lease(&self, lease_id: &str) -> OrchestraResult<()> {
        let response = self
            .run(
                Method::DELETE,
                "/lock",
                Some(&json!({"id": lease_id})),
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "释放租约").await);
        }
        Ok(())
    }

    async fn get_token(&self, token: &str) -> OrchestraResult<Token> {
        let response = self
            .run(
                Method::GET,
                &format!("/registry/token?token={token}"),
                None,
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取令牌").await);
        }
        Ok(response.json().await?)
    }

    async fn get_info(&self, token: &str) -> OrchestraResult<JobInfo> {
        let response = self
            .run(
                Method::GET,
                &format!("/registry/info?token={token}"),
                None,
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取作业信息").await);
        }
        Ok(response.json().await?)
    }

    async fn get_status(&self, token: &str) -> OrchestraResult<JobStatus> {
        let response = self
            .run(
                Method::GET,
                &format!("/registry/status?token={token}"),
                None,
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取作业状态").await);
        }
        let body: Value = response.json().await?;
        body.get("status")
            .and_then(Value::as_str)
            .and_then(JobStatus::parse)
            .ok_or_else(|| OrchestraError::Serialization("远端返回了未知的状态".into()))
    }

    async fn registry_push(
        &self,
        lease_id: &str,
        status: Option<JobStatus>,
        info: Option<&JobInfo>,
    ) -> OrchestraResult<()> {
        let response = self
            .run(
                Method::PUT,
                "/registry",
                Some(&json!({
                    "leaseId": lease_id,
                    "status": status,
                    "info": info,
                })),
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "推送登记簿").await);
        }
        Ok(())
    }

    async fn message_push(
        &self,
        token: &str,
        instruction: Instruction,
        origin: &str,
        content: &str,
        re_queue: bool,
    ) -> OrchestraResult<()> {
        let response = self
            .run(
                Method::POST,
                "/messages",
                Some(&json!({
                    "token": token,
                    "instruction": instruction,
                    "origin": origin,
                    "content": content,
                    "reQueue": re_queue,
                })),
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "投递消息").await);
        }
        Ok(())
    }

    async fn message_get(&self, since: DateTime<Utc>) -> OrchestraResult<Vec<Message>> {
        let response = self
            .run(
                Method::GET,
                &format!("/messages?since={}", since.timestamp_millis()),
                None,
                false,
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取消息").await);
        }
        Ok(response.json().await?)
    }

    async fn queue_entries(&self) -> OrchestraResult<Vec<QueueEntry>> {
        let response = self.run(Method::GET, "/queue", None, false).await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取队列").await);
        }
        Ok(response.json().await?)
    }

    async fn registry_size(&self) -> OrchestraResult<usize> {
        let response = self.run(Method::GET, "/registry/size", None, false).await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, "读取登记簿大小").await);
        }
        let body: Value = response.json().await?;
        Ok(body.get("size").and_then(Value::as_u64).unwrap_or(0) as usize)
    }

    async fn cleanup(&self) -> OrchestraResult<()> {
        // 清理由远端控制器在各个操作中自行执行
        Ok(())
    }
}
