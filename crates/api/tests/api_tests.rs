use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use orchestra_api::{
    job_routes, kv_routes, notification_routes, orchestration_routes, JobsState,
    NotificationState, OrchestrationState, TopicConfig,
};
use orchestra_application::{AbortCoordinator, Daemon, ServiceAdapter};
use orchestra_config::{ControllerConfig, WorkerConfig};
use orchestra_domain::{Controller, JobStatus, KeyValueStore};
use orchestra_infrastructure::{MemoryStore, SqliteController};
use orchestra_worker::{JobRegistry, WorkerPool};
use serde_json::{json, Value};
use tower::ServiceExt;

fn demo_registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register_with_validator(
        "demo",
        |ctx| {
            let body = ctx.snapshot().config.request_body.unwrap_or_default();
            let duration = body
                .pointer("/demo/duration")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let deadline = std::time::Instant::now() + Duration::from_secs_f64(duration);
            while std::time::Instant::now() < deadline {
                if ctx.aborted() {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            ctx.set_data(json!({"success": true}));
            Ok(())
        },
        |body| {
            body.get("demo")
                .map(|_| ())
                .ok_or_else(|| "missing field 'demo'".to_string())
        },
    );
    Arc::new(registry)
}

struct TestHarness {
    state: OrchestrationState,
}

async fn harness() -> TestHarness {
    let config = ControllerConfig {
        lock_ttl: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    let controller: Arc<dyn Controller> =
        Arc::new(SqliteController::open(&config).await.unwrap());
    let worker_config = WorkerConfig {
        pool_size: 1,
        interval: Duration::from_millis(50),
        registry_push_interval: Duration::from_millis(50),
        lock_refresh_interval: Duration::from_millis(50),
        message_interval: Duration::from_millis(50),
        abort_grace: Duration::from_millis(300),
        process_timeout: None,
    };
    let pool = Arc::new(WorkerPool::new(
        Arc::clone(&controller),
        demo_registry(),
        worker_config,
        "http://localhost".into(),
    ));
    pool.start();
    let coordinator = Arc::new(AbortCoordinator::new(
        Arc::clone(&controller),
        Arc::clone(&pool),
        None,
        Duration::from_secs(5),
    ));
    let adapter = Arc::new(ServiceAdapter::new(
        Arc::clone(&controller),
        demo_registry(),
        Arc::clone(&pool),
        coordinator,
    ));
    let daemon = Arc::new(Daemon::new(|| async {}));
    TestHarness {
        state: OrchestrationState {
            adapter,
            controller,
            pool,
            daemon,
            daemon_interval: Duration::from_millis(100),
        },
    }
}

fn jobs_router(harness: &TestHarness) -> axum::Router {
    job_routes(JobsState {
        adapter: Arc::clone(&harness.state.adapter),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_for_status(
    controller: &Arc<dyn Controller>,
    token: &str,
    expected: JobStatus,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if controller.get_status(token).await.ok() == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_submit_and_fetch_report_over_http() {
    let harness = harness().await;
    let app = jobs_router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/demo")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"demo": {"duration": 0, "success": true}}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let token = body_json(response).await["value"]
        .as_str()
        .unwrap()
        .to_string();

    assert!(wait_for_status(&harness.state.controller, &token, JobStatus::Completed).await);

    let request = Request::builder()
        .uri(format!("/report?token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["progress"]["status"], "completed");
    assert_eq!(report["progress"]["numeric"], 100);
    assert_eq!(report["data"]["success"], true);

    let request = Request::builder()
        .uri(format!("/progress?token={token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let progress = body_json(response).await;
    assert_eq!(progress["status"], "completed");

    harness.state.pool.stop(true).await;
}

#[tokio::test]
async fn test_submit_rejects_invalid_body_and_unknown_job() {
    let harness = harness().await;
    let app = jobs_router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/demo")
        .header("content-type", "application/json")
        .body(Body::from(json!({"wrong": 1}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/no-such-job")
        .header("content-type", "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.state.pool.stop(true).await;
}

#[tokio::test]
async fn test_report_for_unknown_token_is_404() {
    let harness = harness().await;
    let app = jobs_router(&harness);
    let request = Request::builder()
        .uri("/report?token=missing")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.state.pool.stop(true).await;
}

#[tokio::test]
async fn test_abort_endpoint_aborts_running_job() {
    let harness = harness().await;
    let app = jobs_router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/demo")
        .header("content-type", "application/json")
        .body(Body::from(json!({"demo": {"duration": 10}}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let token = body_json(response).await["value"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(wait_for_status(&harness.state.controller, &token, JobStatus::Running).await);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/demo?token={token}&broadcast=false&block=true"))
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"origin": "user", "reason": "test abort"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "aborted");

    harness.state.pool.stop(true).await;
}

#[tokio::test]
async fn test_orchestration_status_reflects_saturated_pool() {
    let harness = harness().await;
    let jobs = jobs_router(&harness);
    let orchestration = orchestration_routes(harness.state.clone());

    // 占满唯一的槽位，再提交第二个作业
    let mut tokens = Vec::new();
    for duration in [10.0, 0.0] {
        // 保证第一份提交的入队时间戳更早
        tokio::time::sleep(Duration::from_millis(5)).await;
        let request = Request::builder()
            .method("POST")
            .uri("/demo")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({"demo": {"duration": duration}}).to_string(),
            ))
            .unwrap();
        let response = jobs.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        tokens.push(
            body_json(response).await["value"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    assert!(wait_for_status(&harness.state.controller, &tokens[0], JobStatus::Running).await);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let request = Request::builder()
        .uri("/orchestration")
        .body(Body::empty())
        .unwrap();
    let response = orchestration.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["queue"]["size"], 1);
    assert_eq!(status["registry"]["size"], 2);
    assert_eq!(status["orchestrator"]["jobs"], json!([tokens[0]]));
    assert_eq!(status["orchestrator"]["idle"], false);

    harness.state.pool.kill("test", "cleanup", true).await;
}

#[tokio::test]
async fn test_orchestration_stop_and_unknown_mode() {
    let harness = harness().await;
    let app = orchestration_routes(harness.state.clone());

    let request = Request::builder()
        .method("DELETE")
        .uri("/orchestration")
        .header("content-type", "application/json")
        .body(Body::from(json!({"mode": "nonsense"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("DELETE")
        .uri("/orchestration")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"mode": "stop", "options": {"block": true}}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!harness.state.pool.running());
}

#[tokio::test]
async fn test_kv_middleware_roundtrip() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let app = kv_routes(store);

    let request = Request::builder()
        .method("POST")
        .uri("/db/k1")
        .header("content-type", "application/json")
        .body(Body::from(json!({"n": 1}).to_string()))
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );

    let request = Request::builder().uri("/db/k1").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"n": 1}));

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/db")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(body_json(response).await, json!(["k1"]));

    // 弹出后记录消失
    let request = Request::builder()
        .uri("/db/k1?pop")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );
    let request = Request::builder().uri("/db/k1").body(Body::empty()).unwrap();
    assert_eq!(
        app.oneshot(request).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_notification_registration_and_subscription() {
    let mut topics = HashMap::new();
    topics.insert("abort".to_string(), TopicConfig::abort());
    let app = notification_routes(NotificationState::new(
        topics,
        Duration::from_millis(500),
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/registration")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"baseUrl": "http://replica-a"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let registration = body_json(response).await;
    let token = registration["token"].as_str().unwrap().to_string();
    assert_eq!(registration["baseUrl"], "http://replica-a");

    let request = Request::builder()
        .method("POST")
        .uri(format!("/subscription?token={token}&topic=abort"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );

    let request = Request::builder()
        .uri(format!("/subscription?token={token}&topic=abort"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );

    // 未知主题与未知令牌
    let request = Request::builder()
        .method("POST")
        .uri(format!("/subscription?token={token}&topic=unknown"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
    let request = Request::builder()
        .method("DELETE")
        .uri("/registration?token=unknown")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.oneshot(request).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
}
