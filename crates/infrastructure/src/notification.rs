use std::time::Duration;

use orchestra_errors::{OrchestraError, OrchestraResult};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// 通知服务客户端
///
/// 一个客户端绑定一个通知服务（`api_url`）、一个回调地址
/// （`callback_url`）和一个主题。注册与订阅是惰性的：广播前发现
/// 注册缺失（例如因广播失败被服务端吊销）时会自动重新接入。
pub struct NotificationClient {
    api_url: String,
    topic: String,
    callback_url: String,
    timeout: Duration,
    client: reqwest::Client,
    token: Mutex<Option<String>>,
}

/// 与广播无关的管理请求使用的固定超时。
const GENERAL_API_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

impl NotificationClient {
    pub fn new<A, T, C>(
        api_url: A,
        topic: T,
        callback_url: C,
        timeout: Duration,
    ) -> OrchestraResult<Self>
    where
        A: Into<String>,
        T: Into<String>,
        C: Into<String>,
    {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| OrchestraError::Notification(err.to_string()))?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            topic: topic.into(),
            callback_url: callback_url.into(),
            timeout,
            client,
            token: Mutex::new(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// 查询通知服务眼中的本机地址。
    pub async fn get_ip(api_url: &str) -> OrchestraResult<String> {
        let response = reqwest::Client::new()
            .get(format!("{}/ip", api_url.trim_end_matches('/')))
            .timeout(GENERAL_API_REQUEST_TIMEOUT)
            .send()
            .await?;
        let body: Value = response.json().await?;
        body.get("ip")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| OrchestraError::Notification("通知服务未返回地址".into()))
    }

    /// 注册并订阅（接入），已接入时为幂等操作。
    pub async fn connect(&self) -> OrchestraResult<()> {
        if !self.registered().await {
            self.register().await?;
        }
        self.subscribe().await
    }

    async fn register(&self) -> OrchestraResult<()> {
        let response = self
            .client
            .post(format!("{}/registration", self.api_url))
            .timeout(GENERAL_API_REQUEST_TIMEOUT)
            .json(&json!({"baseUrl": self.callback_url}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OrchestraError::Notification(format!(
                "注册失败: {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestraError::Notification("注册响应缺少令牌".into()))?;
        *self.token.lock().await = Some(token.to_string());
        debug!("通知客户端以令牌 '{}' 完成注册。", token);
        Ok(())
    }

    async fn registered(&self) -> bool {
        let Some(token) = self.token.lock().await.clone() else {
            return false;
        };
        let response = self
            .client
            .get(format!(
                "{}/registration?token={token}",
                self.api_url
            ))
            .timeout(GENERAL_API_REQUEST_TIMEOUT)
            .send()
            .await;
        matches!(response, Ok(response) if response.status() == reqwest::StatusCode::OK)
    }

    async fn subscribe(&self) -> OrchestraResult<()> {
        let token = self.token.lock().await.clone().ok_or_else(|| {
            OrchestraError::Notification("尚未注册，无法订阅".into())
        })?;
        let response = self
            .client
            .post(format!(
                "{}/subscription?token={token}&topic={}",
                self.api_url, self.topic
            ))
            .timeout(GENERAL_API_REQUEST_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OrchestraError::Notification(format!(
                "订阅主题 '{}' 失败: {}",
                self.topic,
                response.status()
            )));
        }
        Ok(())
    }

    /// 注销（尽力而为）。
    pub async fn deregister(&self) {
        let Some(token) = self.token.lock().await.take() else {
            return;
        };
        let result = self
            .client
            .delete(format!(
                "{}/registration?token={token}",
                self.api_url
            ))
            .timeout(GENERAL_API_REQUEST_TIMEOUT)
            .send()
            .await;
        if let Err(err) = result {
            warn!("通知客户端注销失败: {}", err);
        }
    }

    /// 提交广播。
    ///
    /// 广播前确保仍处于接入状态（被吊销的订阅在这里惰性恢复）。
    pub async fn notify(
        &self,
        query: Option<Value>,
        body: Option<Value>,
        skip_self: bool,
    ) -> OrchestraResult<()> {
        self.connect().await?;

        let mut payload = json!({
            "query": query,
            "json": body,
            "headers": Value::Null,
        });
        if skip_self {
            if let Some(token) = self.token.lock().await.clone() {
                payload["skip"] = Value::String(token);
            }
        }
        let response = self
            .client
            .post(format!("{}/notify?topic={}", self.api_url, self.topic))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OrchestraError::Notification(format!(
                "主题 '{}' 的广播失败: {}",
                self.topic,
                response.status()
            )));
        }
        Ok(())
    }
}
