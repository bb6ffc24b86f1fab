use std::sync::Arc;
use std::time::Duration;

use orchestra_config::{ControllerConfig, WorkerConfig};
use orchestra_domain::{
    Controller, Instruction, JobConfig, JobInfo, JobStatus, LogCategory,
};
use orchestra_infrastructure::SqliteController;
use orchestra_worker::{JobRegistry, WorkerPool};

fn fast_worker_config(pool_size: usize) -> WorkerConfig {
    WorkerConfig {
        pool_size,
        interval: Duration::from_millis(50),
        process_timeout: None,
        registry_push_interval: Duration::from_millis(50),
        lock_refresh_interval: Duration::from_millis(50),
        message_interval: Duration::from_millis(50),
        abort_grace: Duration::from_millis(300),
    }
}

async fn sqlite_controller() -> Arc<SqliteController> {
    let config = ControllerConfig {
        lock_ttl: Duration::from_secs(2),
        ..ControllerConfig::default()
    };
    Arc::new(SqliteController::open(&config).await.unwrap())
}

/// 演示作业：按给定时长推进进度，在协作点响应中止。
fn demo_registry() -> Arc<JobRegistry> {
    let mut registry = JobRegistry::new();
    registry.register_with_validator(
        "demo",
        |ctx| {
            ctx.log(LogCategory::Event, "job accepted");
            let body = ctx
                .snapshot()
                .config
                .request_body
                .unwrap_or_default();
            let duration = body
                .pointer("/demo/duration")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            let success = body
                .pointer("/demo/success")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true);

            let steps = ((duration * 1000.0) / 25.0).ceil() as u64;
            for step in 0..steps {
                if ctx.aborted() {
                    return Ok(());
                }
                ctx.set_progress(
                    "processing",
                    ((step * 100) / steps.max(1)) as u8,
                );
                ctx.push();
                std::thread::sleep(Duration::from_millis(25));
            }
            ctx.set_data(serde_json::json!({"success": success}));
            ctx.log(LogCategory::Event, "job terminated");
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

async fn wait_for_status(
    controller: &Arc<SqliteController>,
    token: &str,
    expected: JobStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if controller.get_status(token).await.ok() == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn submit_body(body: serde_json::Value) -> JobInfo {
    JobInfo::new(JobConfig::new("demo", body))
}

#[tokio::test]
async fn test_demo_job_runs_to_completion() {
    let controller = sqlite_controller().await;
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        demo_registry(),
        fast_worker_config(1),
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-1",
            submit_body(serde_json::json!({"demo": {"duration": 0, "success": true}})),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Completed, Duration::from_secs(5)).await
    );
    let info = controller.get_info("t-1").await.unwrap();
    let report = info.report.unwrap();
    assert_eq!(report.progress.numeric, 100);
    assert_eq!(
        report.data,
        Some(serde_json::json!({"success": true}))
    );
    // 接受与结束两条事件日志由作业本身写入
    let events = report.log.get(LogCategory::Event);
    assert!(events.iter().any(|e| e.body == "job accepted"));
    assert!(events.iter().any(|e| e.body == "job terminated"));
    assert!(info.metadata.completed.is_some());

    pool.stop(true).await;
}

#[tokio::test]
async fn test_abort_via_controller_message() {
    let controller = sqlite_controller().await;
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        demo_registry(),
        fast_worker_config(1),
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-1",
            submit_body(serde_json::json!({"demo": {"duration": 10}})),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Running, Duration::from_secs(5)).await
    );
    controller
        .message_push("t-1", Instruction::Abort, "user", "cancelled from test", false)
        .await
        .unwrap();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Aborted, Duration::from_secs(5)).await
    );
    let info = controller.get_info("t-1").await.unwrap();
    let report = info.report.unwrap();
    assert_eq!(report.progress.status, JobStatus::Aborted);
    assert!(report
        .log
        .get(LogCategory::Event)
        .iter()
        .any(|e| e.body.contains("Aborted at") && e.body.contains("user")));
    assert!(report
        .log
        .get(LogCategory::Error)
        .iter()
        .any(|e| e.body.contains("cancelled from test")));
    assert!(info.metadata.aborted.is_some());

    pool.stop(true).await;
}

#[tokio::test]
async fn test_local_abort_reaches_running_job() {
    let controller = sqlite_controller().await;
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        demo_registry(),
        fast_worker_config(1),
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-1",
            submit_body(serde_json::json!({"demo": {"duration": 10}})),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Running, Duration::from_secs(5)).await
    );
    assert!(pool.abort_local("t-1", "test", "local abort", false));
    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Aborted, Duration::from_secs(5)).await
    );

    pool.stop(true).await;
}

#[tokio::test]
async fn test_process_timeout_aborts_uncooperative_job() {
    let controller = sqlite_controller().await;
    let mut registry = JobRegistry::new();
    // 不轮询中止标志的作业，只能靠超时与放弃机制终结
    registry.register("stubborn", |_ctx| {
        std::thread::sleep(Duration::from_secs(2));
        Ok(())
    });
    let mut config = fast_worker_config(1);
    config.process_timeout = Some(Duration::from_millis(200));
    config.abort_grace = Duration::from_millis(200);
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        Arc::new(registry),
        config,
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-1",
            JobInfo::new(JobConfig::new("stubborn", serde_json::json!({}))),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Aborted, Duration::from_secs(5)).await
    );
    let info = controller.get_info("t-1").await.unwrap();
    let report = info.report.unwrap();
    assert!(report
        .log
        .get(LogCategory::Error)
        .iter()
        .any(|e| e.body.contains("process timeout")));

    pool.stop(true).await;
}

#[tokio::test]
async fn test_saturated_pool_keeps_second_job_queued() {
    let controller = sqlite_controller().await;
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        demo_registry(),
        fast_worker_config(1),
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-first",
            submit_body(serde_json::json!({"demo": {"duration": 10}})),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    controller
        .submit(
            "t-second",
            submit_body(serde_json::json!({"demo": {"duration": 0}})),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-first", JobStatus::Running, Duration::from_secs(5)).await
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    // 单槽位池：第二个作业仍在排队
    assert_eq!(
        controller.get_status("t-second").await.unwrap(),
        JobStatus::Queued
    );
    assert_eq!(pool.jobs(), vec!["t-first".to_string()]);
    assert_eq!(controller.queue_entries().await.unwrap().len(), 1);

    pool.kill("test", "cleanup", true).await;
}

#[tokio::test]
async fn test_unregistered_job_type_is_finalized() {
    let controller = sqlite_controller().await;
    let pool = WorkerPool::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        demo_registry(),
        fast_worker_config(1),
        "http://localhost".into(),
    );

    controller
        .submit(
            "t-1",
            JobInfo::new(JobConfig::new("no-such-type", serde_json::json!({}))),
        )
        .await
        .unwrap();
    pool.start();

    assert!(
        wait_for_status(&controller, "t-1", JobStatus::Aborted, Duration::from_secs(5)).await
    );

    pool.stop(true).await;
}
