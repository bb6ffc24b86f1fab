use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dcm_orchestra::app::{AppMode, Application, NotificationSettings};
use dcm_orchestra::demo::register_demo_job;
use dcm_orchestra::shutdown::ShutdownManager;
use orchestra_api::{controller_routes, notification_routes, NotificationState, TopicConfig};
use orchestra_config::{AppConfig, ControllerConfig, ControllerKind};
use orchestra_domain::Controller;
use orchestra_infrastructure::SqliteController;
use orchestra_worker::JobRegistry;
use serde_json::{json, Value};

async fn serve_router(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });
    base_url
}

async fn spawn_replica(
    controller_url: &str,
    notification_url: &str,
) -> (Arc<Application>, String) {
    let mut config = AppConfig::default();
    config.controller = ControllerConfig {
        kind: ControllerKind::Http,
        base_url: Some(controller_url.to_string()),
        timeout: Duration::from_secs(2),
        lock_ttl: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    config.worker.pool_size = 1;
    config.worker.interval = Duration::from_millis(50);
    config.worker.registry_push_interval = Duration::from_millis(50);
    config.worker.lock_refresh_interval = Duration::from_millis(50);
    config.worker.message_interval = Duration::from_millis(50);
    config.worker.abort_grace = Duration::from_millis(300);
    config.daemon.interval = Duration::from_millis(100);
    config.abort_timeout = Duration::from_secs(10);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let mut registry = JobRegistry::new();
    register_demo_job(&mut registry);

    let application = Arc::new(
        Application::new(
            config,
            registry,
            base_url.clone(),
            Some(NotificationSettings {
                api_url: notification_url.to_string(),
                callback_url: format!("{base_url}/demo"),
                timeout: Duration::from_secs(2),
            }),
        )
        .await
        .unwrap(),
    );
    application.start().await;

    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;
    let serving = Arc::clone(&application);
    tokio::spawn(async move {
        let _shutdown_keepalive = shutdown;
        let _ = serving.serve(listener, AppMode::All, shutdown_rx).await;
    });
    (application, base_url)
}

async fn wait_for_status(
    client: &reqwest::Client,
    base_url: &str,
    token: &str,
    expected: &str,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let response = client
            .get(format!("{base_url}/progress?token={token}"))
            .send()
            .await
            .unwrap();
        if response.status().is_success() {
            let progress: Value = response.json().await.unwrap();
            if progress["status"] == expected {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// 两个副本共享一个 HTTP 控制器：经 A 提交，经 B 广播中止。
#[tokio::test]
async fn test_cross_replica_abort_via_broadcast() {
    // 共享的控制器：基于文件的 SQLite，经由控制器 API 暴露
    let dir = tempfile::TempDir::new().unwrap();
    let shared_config = ControllerConfig {
        path: Some(dir.path().join("controller.db")),
        lock_ttl: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    let shared: Arc<dyn Controller> =
        Arc::new(SqliteController::open(&shared_config).await.unwrap());
    let controller_url = serve_router(controller_routes(shared)).await;

    // 通知服务：abort 主题
    let mut topics = HashMap::new();
    topics.insert("abort".to_string(), TopicConfig::abort());
    let notification_url = serve_router(notification_routes(NotificationState::new(
        topics,
        Duration::from_secs(2),
    )))
    .await;

    let (app_a, url_a) = spawn_replica(&controller_url, &notification_url).await;
    let (app_b, url_b) = spawn_replica(&controller_url, &notification_url).await;
    let client = reqwest::Client::new();

    // 经副本 A 提交
    let response = client
        .post(format!("{url_a}/demo"))
        .json(&json!({"demo": {"duration": 30}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let token = response.json::<Value>().await.unwrap()["value"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(wait_for_status(&client, &url_a, &token, "running", Duration::from_secs(10)).await);

    // 经副本 B 广播中止
    let response = client
        .delete(format!(
            "{url_b}/demo?token={token}&broadcast=true&block=true"
        ))
        .json(&json!({"origin": "replica-b", "reason": "cross replica abort"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.json::<Value>().await.unwrap()["outcome"],
        "aborted"
    );

    // 两个副本看到同一个终态
    assert!(wait_for_status(&client, &url_a, &token, "aborted", Duration::from_secs(10)).await);
    assert!(wait_for_status(&client, &url_b, &token, "aborted", Duration::from_secs(10)).await);

    app_a.stop().await;
    app_b.stop().await;
}

/// 共享控制器之下，两个副本的工作池不会同时处理同一个作业。
#[tokio::test]
async fn test_shared_controller_preserves_lease_exclusivity() {
    let dir = tempfile::TempDir::new().unwrap();
    let shared_config = ControllerConfig {
        path: Some(dir.path().join("controller.db")),
        lock_ttl: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    let shared: Arc<dyn Controller> =
        Arc::new(SqliteController::open(&shared_config).await.unwrap());
    let controller_url = serve_router(controller_routes(shared.clone())).await;

    let mut topics = HashMap::new();
    topics.insert("abort".to_string(), TopicConfig::abort());
    let notification_url = serve_router(notification_routes(NotificationState::new(
        topics,
        Duration::from_secs(2),
    )))
    .await;

    let (app_a, url_a) = spawn_replica(&controller_url, &notification_url).await;
    let (app_b, url_b) = spawn_replica(&controller_url, &notification_url).await;
    let client = reqwest::Client::new();

    // 提交若干短作业，全部完成后检查没有作业被处理两次
    let mut tokens = Vec::new();
    for _ in 0..4 {
        let response = client
            .post(format!("{url_a}/demo"))
            .json(&json!({"demo": {"duration": 0.2}}))
            .send()
            .await
            .unwrap();
        tokens.push(
            response.json::<Value>().await.unwrap()["value"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    for token in &tokens {
        assert!(
            wait_for_status(&client, &url_b, token, "completed", Duration::from_secs(20)).await
        );
        // 每份报告恰好有一条消费记录（没有双重执行）
        let info = shared.get_info(token).await.unwrap();
        assert!(info.metadata.consumed.is_some());
        let report = info.report.unwrap();
        let consumed: Vec<_> = report
            .log
            .get(orchestra_domain::LogCategory::Event)
            .iter()
            .filter(|entry| entry.body.contains("Consumed at"))
            .collect();
        assert_eq!(consumed.len(), 1);
    }

    app_a.stop().await;
    app_b.stop().await;
}
