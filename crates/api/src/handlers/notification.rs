use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, options, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 通知主题的投递配置。
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// 相对订阅者回调地址的路径（可为空）
    pub path: String,
    /// 投递用的 HTTP 方法
    pub method: reqwest::Method,
    /// 视为成功的状态码
    pub status_ok: u16,
}

impl TopicConfig {
    /// 中止广播主题：对订阅者回调地址发 `DELETE`。
    pub fn abort() -> Self {
        Self {
            path: String::new(),
            method: reqwest::Method::DELETE,
            status_ok: 200,
        }
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    token: String,
    base_url: String,
}

struct Topic {
    config: TopicConfig,
    subscribers: Mutex<HashSet<String>>,
}

struct NotificationInner {
    registry: Mutex<HashMap<String, Subscriber>>,
    topics: HashMap<String, Topic>,
    timeout: Duration,
    http: reqwest::Client,
}

/// 通知服务的共享状态。
#[derive(Clone)]
pub struct NotificationState {
    inner: Arc<NotificationInner>,
}

impl NotificationState {
    pub fn new(topics: HashMap<String, TopicConfig>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(NotificationInner {
                registry: Mutex::new(HashMap::new()),
                topics: topics
                    .into_iter()
                    .map(|(name, config)| {
                        (
                            name,
                            Topic {
                                config,
                                subscribers: Mutex::new(HashSet::new()),
                            },
                        )
                    })
                    .collect(),
                timeout,
                http: reqwest::Client::new(),
            }),
        }
    }
}

/// 通知 API：注册、订阅与同步广播。
///
/// 广播是同步的，带每请求超时；投递失败的订阅会被当场吊销。
pub fn notification_routes(state: NotificationState) -> Router {
    Router::new()
        .route("/", options(list_topics))
        .route("/ip", get(get_ip))
        .route(
            "/registration",
            get(registration_status)
                .post(register)
                .delete(deregister),
        )
        .route("/registration", options(list_registrations))
        .route(
            "/subscription",
            get(subscription_status)
                .post(subscribe)
                .delete(unsubscribe),
        )
        .route("/notify", post(notify))
        .with_state(state)
}

async fn list_topics(State(state): State<NotificationState>) -> impl IntoResponse {
    Json(
        state
            .inner
            .topics
            .keys()
            .cloned()
            .collect::<Vec<String>>(),
    )
}

async fn get_ip(ConnectInfo(addr): ConnectInfo<SocketAddr>) -> impl IntoResponse {
    Json(json!({"ip": addr.ip().to_string()}))
}

async fn registration_status(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(token) = params.get("token") else {
        return (StatusCode::BAD_REQUEST, "Missing token").into_response();
    };
    let registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
    if registry.contains_key(token) {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::NO_CONTENT, "").into_response()
    }
}

async fn register(
    State(state): State<NotificationState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(base_url) = body.get("baseUrl").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, "Missing url").into_response();
    };
    let subscriber = Subscriber {
        token: Uuid::new_v4().to_string(),
        base_url: base_url.to_string(),
    };
    let mut registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
    registry.insert(subscriber.token.clone(), subscriber.clone());
    debug!(
        "订阅者 '{}' 以回调地址 '{}' 完成注册。",
        subscriber.token, subscriber.base_url
    );
    Json(json!({"token": subscriber.token, "baseUrl": subscriber.base_url})).into_response()
}

async fn deregister(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(token) = params.get("token") else {
        return (StatusCode::BAD_REQUEST, "Missing token").into_response();
    };
    let removed = {
        let mut registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.remove(token)
    };
    if removed.is_none() {
        return (StatusCode::NOT_FOUND, "Unknown token").into_response();
    }
    for topic in state.inner.topics.values() {
        topic
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(token);
    }
    (StatusCode::OK, "OK").into_response()
}

async fn list_registrations(State(state): State<NotificationState>) -> impl IntoResponse {
    let registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
    Json(
        registry
            .values()
            .map(|subscriber| {
                json!({"token": subscriber.token, "baseUrl": subscriber.base_url})
            })
            .collect::<Vec<Value>>(),
    )
}

fn topic_and_token<'a>(
    state: &'a NotificationState,
    params: &HashMap<String, String>,
) -> Result<(&'a Topic, String), (StatusCode, &'static str)> {
    let token = params
        .get("token")
        .ok_or((StatusCode::BAD_REQUEST, "Missing token"))?;
    let topic = params
        .get("topic")
        .ok_or((StatusCode::BAD_REQUEST, "Missing topic"))?;
    let topic = state
        .inner
        .topics
        .get(topic)
        .ok_or((StatusCode::NOT_FOUND, "Unknown topic"))?;
    let registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
    if !registry.contains_key(token) {
        return Err((StatusCode::NOT_FOUND, "Unknown token"));
    }
    Ok((topic, token.clone()))
}

async fn subscription_status(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match topic_and_token(&state, &params) {
        Err((status, message)) => (status, message).into_response(),
        Ok((topic, token)) => {
            let subscribers = topic
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if subscribers.contains(&token) {
                (StatusCode::OK, "OK").into_response()
            } else {
                (StatusCode::NO_CONTENT, "").into_response()
            }
        }
    }
}

async fn subscribe(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match topic_and_token(&state, &params) {
        Err((status, message)) => (status, message).into_response(),
        Ok((topic, token)) => {
            topic
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(token);
            (StatusCode::OK, "OK").into_response()
        }
    }
}

async fn unsubscribe(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match topic_and_token(&state, &params) {
        Err((status, message)) => (status, message).into_response(),
        Ok((topic, token)) => {
            topic
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&token);
            (StatusCode::OK, "OK").into_response()
        }
    }
}

/// 向主题内的所有订阅者同步广播。
async fn notify(
    State(state): State<NotificationState>,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> impl IntoResponse {
    let Some(topic_name) = params.get("topic") else {
        return (StatusCode::BAD_REQUEST, "Missing topic").into_response();
    };
    let Some(topic) = state.inner.topics.get(topic_name) else {
        return (StatusCode::NOT_FOUND, "Unknown topic").into_response();
    };
    let body = body.map(|Json(body)| body).unwrap_or(Value::Null);
    let skip = body.get("skip").and_then(Value::as_str).map(str::to_string);
    let payload = body.get("json").cloned().filter(|v| !v.is_null());
    let query: Vec<(String, String)> = body
        .get("query")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    let targets: Vec<Subscriber> = {
        let registry = state.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        let subscribers = topic
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subscribers
            .iter()
            .filter(|token| skip.as_deref() != Some(token.as_str()))
            .filter_map(|token| registry.get(token).cloned())
            .collect()
    };

    for subscriber in targets {
        let url = format!(
            "{}{}",
            subscriber.base_url.trim_end_matches('/'),
            topic.config.path
        );
        let mut request = state
            .inner
            .http
            .request(topic.config.method.clone(), &url)
            .timeout(state.inner.timeout)
            .query(&query);
        if let Some(payload) = &payload {
            request = request.json(payload);
        }
        let delivered = match request.send().await {
            Ok(response) => response.status().as_u16() == topic.config.status_ok,
            Err(err) => {
                warn!(
                    "向订阅者 '{}'（{}）的广播失败: {}",
                    subscriber.token, url, err
                );
                false
            }
        };
        if !delivered {
            // 投递失败的订阅当场吊销
            info!(
                "吊销订阅者 '{}' 对主题 '{}' 的订阅。",
                subscriber.token, topic_name
            );
            topic
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&subscriber.token);
        }
    }
    (StatusCode::OK, "OK").into_response()
}
