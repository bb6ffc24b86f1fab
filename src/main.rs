use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dcm_orchestra::app::{AppMode, Application, NotificationSettings};
use dcm_orchestra::demo::register_demo_job;
use dcm_orchestra::shutdown::ShutdownManager;
use orchestra_worker::JobRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("orchestra")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Digital Curation Manager 作业编排服务")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["all", "worker", "controller"])
                .default_value("all"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDR")
                .help("HTTP 监听地址")
                .default_value("0.0.0.0:8080"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("URL")
                .help("对外可达的服务地址（写入报告）")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("notification-url")
                .long("notification-url")
                .value_name("URL")
                .help("通知服务地址（启用跨副本中止广播）"),
        )
        .get_matches();

    // 配置全部来自环境变量
    let config = orchestra_config::load_from_env().map_err(|err| anyhow::anyhow!("{err}"))?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mode = match matches.get_one::<String>("mode").map(String::as_str) {
        Some("worker") => AppMode::Worker,
        Some("controller") => AppMode::Controller,
        _ => AppMode::All,
    };
    let host = matches
        .get_one::<String>("host")
        .cloned()
        .unwrap_or_default();
    let notification = matches
        .get_one::<String>("notification-url")
        .map(|api_url| NotificationSettings {
            api_url: api_url.clone(),
            callback_url: format!("{}/demo", host.trim_end_matches('/')),
            timeout: Duration::from_secs(1),
        });

    let mut registry = JobRegistry::new();
    register_demo_job(&mut registry);

    let application = Application::new(config, registry, host, notification)
        .await
        .context("初始化应用失败")?;

    if mode != AppMode::Controller {
        application.start().await;
    }

    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("收到终止信号，开始体面停机。");
            shutdown.shutdown().await;
        }
    });

    let bind = matches
        .get_one::<String>("bind")
        .cloned()
        .unwrap_or_default();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("无法绑定监听地址 '{bind}'"))?;
    if let Err(err) = application.serve(listener, mode, shutdown_rx).await {
        error!("服务异常退出: {}", err);
        return Err(err);
    }
    Ok(())
}

/// 等待 SIGINT / SIGTERM。
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("安装信号处理失败");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}
