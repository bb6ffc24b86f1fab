use std::time::Duration;

use async_trait::async_trait;
use orchestra_domain::KeyValueStore;
use orchestra_errors::{OrchestraError, OrchestraResult};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::warn;

/// HTTP 代理键值存储
///
/// 通过键值存储中间件 API（`/db`）访问远端数据库的客户端。请求失败
/// 时按 `max_retries` 重试，重试间隔附加小幅抖动以避免副本同步重试。
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
    retry_interval: Duration,
}

impl HttpStore {
    pub fn new<S: Into<String>>(
        base_url: S,
        timeout: Duration,
        max_retries: u32,
        retry_interval: Duration,
    ) -> OrchestraResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| OrchestraError::backend_unavailable(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            max_retries,
            retry_interval,
        })
    }

    /// 重试间隔加上最多 25% 的抖动（由当前时刻的亚秒部分导出）。
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.retry_interval * attempt.max(1);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0) as u64;
        let jitter_millis = (base.as_millis() as u64 / 4).min(250);
        if jitter_millis == 0 {
            return base;
        }
        base + Duration::from_millis(nanos % jitter_millis)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> OrchestraResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(OrchestraError::backend_unavailable(format!(
                            "对 '{url}' 的 {method} 请求在 {} 次尝试后失败: {err}",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    warn!(
                        "对 '{}' 的请求失败，将在第 {}/{} 次重试: {}",
                        url, attempt, self.max_retries, err
                    );
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for HttpStore {
    async fn write(&self, key: &str, value: &Value, ttl: Option<Duration>) -> OrchestraResult<()> {
        let path = match ttl {
            Some(ttl) => format!("/db/{key}?ttl={}", ttl.as_secs_f64()),
            None => format!("/db/{key}"),
        };
        let response = self.request(Method::POST, &path, Some(value)).await?;
        if !response.status().is_success() {
            return Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储拒绝写入 '{key}': {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn read(&self, key: &str, pop: bool) -> OrchestraResult<Option<Value>> {
        let path = if pop {
            format!("/db/{key}?pop")
        } else {
            format!("/db/{key}")
        };
        let response = self.request(Method::GET, &path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储读取 '{key}' 失败: {status}"
            ))),
        }
    }

    async fn push(&self, value: &Value) -> OrchestraResult<String> {
        let response = self.request(Method::POST, "/db", Some(value)).await?;
        if !response.status().is_success() {
            return Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储拒绝自动分配键: {}",
                response.status()
            )));
        }
        Ok(response.text().await?)
    }

    async fn delete(&self, key: &str) -> OrchestraResult<()> {
        let response = self
            .request(Method::DELETE, &format!("/db/{key}"), None)
            .await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储删除 '{key}' 失败: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn keys(&self) -> OrchestraResult<Vec<String>> {
        let response = self.request(Method::OPTIONS, "/db", None).await?;
        if !response.status().is_success() {
            return Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储枚举键失败: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn next(&self, pop: bool) -> OrchestraResult<Option<(String, Value)>> {
        let path = if pop { "/db?pop" } else { "/db" };
        let response = self.request(Method::GET, path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: Value = response.json().await?;
                let key = body
                    .get("key")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        OrchestraError::Serialization("远端记录缺少 'key' 字段".into())
                    })?
                    .to_string();
                let value = body.get("value").cloned().unwrap_or(Value::Null);
                Ok(Some((key, value)))
            }
            status => Err(OrchestraError::backend_unavailable(format!(
                "远端键值存储轮转读取失败: {status}"
            ))),
        }
    }
}
