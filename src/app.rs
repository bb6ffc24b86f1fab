use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orchestra_api::{
    controller_routes, job_routes, orchestration_routes, JobsState, OrchestrationState,
};
use orchestra_application::{AbortCoordinator, Daemon, ServiceAdapter};
use orchestra_config::{AppConfig, ControllerKind};
use orchestra_domain::Controller;
use orchestra_infrastructure::{HttpController, NotificationClient, SqliteController};
use orchestra_worker::{JobRegistry, WorkerPool};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 完整服务：作业端点 + 编排控制面 + 工作池 + 守护进程
    All,
    /// 仅工作池与守护进程（无 HTTP 面）
    Worker,
    /// 仅暴露共享控制器 API
    Controller,
}

/// 通知服务接入配置。
#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub api_url: String,
    /// 广播投递的目标（本副本的中止端点）
    pub callback_url: String,
    pub timeout: Duration,
}

/// 主应用程序
///
/// 把配置装配成编排核心的各个组件：控制器、作业表、工作池、守护
/// 进程、中止协调器与服务门面。
pub struct Application {
    config: AppConfig,
    controller: Arc<dyn Controller>,
    pool: Arc<WorkerPool>,
    daemon: Arc<Daemon>,
    adapter: Arc<ServiceAdapter>,
    notification: Option<Arc<NotificationClient>>,
}

impl Application {
    pub async fn new(
        config: AppConfig,
        registry: JobRegistry,
        host: String,
        notification: Option<NotificationSettings>,
    ) -> Result<Self> {
        let controller: Arc<dyn Controller> = match config.controller.kind {
            ControllerKind::Sqlite => Arc::new(
                SqliteController::open(&config.controller)
                    .await
                    .context("初始化 SQLite 控制器失败")?,
            ),
            ControllerKind::Http => Arc::new(
                HttpController::new(&config.controller).context("初始化 HTTP 控制器失败")?,
            ),
        };
        let registry = Arc::new(registry);
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&controller),
            Arc::clone(&registry),
            config.worker.clone(),
            host,
        ));
        pool.init();

        let notification = notification
            .map(|settings| {
                NotificationClient::new(
                    settings.api_url,
                    "abort",
                    settings.callback_url,
                    settings.timeout,
                )
                .map(Arc::new)
            })
            .transpose()
            .context("初始化通知客户端失败")?;

        let coordinator = Arc::new(AbortCoordinator::new(
            Arc::clone(&controller),
            Arc::clone(&pool),
            notification.clone(),
            config.abort_timeout,
        ));
        let adapter = Arc::new(ServiceAdapter::new(
            Arc::clone(&controller),
            registry,
            Arc::clone(&pool),
            coordinator,
        ));

        // 守护进程：清理过期状态并复活崩溃的工作者
        let daemon = {
            let controller = Arc::clone(&controller);
            let pool = Arc::clone(&pool);
            Arc::new(Daemon::new(move || {
                let controller = Arc::clone(&controller);
                let pool = Arc::clone(&pool);
                async move {
                    if let Err(err) = controller.cleanup().await {
                        error!("控制器清理失败: {}", err);
                    }
                    pool.ensure_running();
                }
            }))
        };

        Ok(Self {
            config,
            controller,
            pool,
            daemon,
            adapter,
            notification,
        })
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    pub fn adapter(&self) -> &Arc<ServiceAdapter> {
        &self.adapter
    }

    /// 组装指定模式的路由。
    pub fn router(&self, mode: AppMode) -> axum::Router {
        match mode {
            AppMode::Controller => controller_routes(Arc::clone(&self.controller)),
            AppMode::Worker | AppMode::All => {
                let router = job_routes(JobsState {
                    adapter: Arc::clone(&self.adapter),
                })
                .merge(orchestration_routes(OrchestrationState {
                    adapter: Arc::clone(&self.adapter),
                    controller: Arc::clone(&self.controller),
                    pool: Arc::clone(&self.pool),
                    daemon: Arc::clone(&self.daemon),
                    daemon_interval: self.config.daemon.interval,
                }));
                if self.config.allow_cors {
                    router.layer(axum::middleware::from_fn(allow_cors))
                } else {
                    router
                }
            }
        }
    }

    /// 启动编排：工作池、守护进程、通知接入与回调循环。
    pub async fn start(&self) {
        if self.config.daemon.at_startup {
            self.pool.start();
            self.daemon.start(self.config.daemon.interval);
        }
        if let Some(notification) = &self.notification {
            if let Err(err) = notification.connect().await {
                // 接入失败不阻碍启动；广播前会再次尝试
                error!("接入通知服务失败: {}", err);
            }
        }
        let _ = self
            .adapter
            .run(Vec::new(), self.config.worker.registry_push_interval);
        info!("编排已启动。");
    }

    /// 体面停机。
    pub async fn stop(&self) {
        self.daemon.stop(true).await;
        self.pool.stop(true).await;
        if let Some(notification) = &self.notification {
            notification.deregister().await;
        }
        info!("编排已停止。");
    }

    /// 在给定监听器上提供 HTTP 服务，收到关闭信号后体面退出。
    pub async fn serve(
        &self,
        listener: TcpListener,
        mode: AppMode,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let addr = listener.local_addr().context("读取监听地址失败")?;
        info!("HTTP 服务监听于 {}。", addr);
        axum::serve(
            listener,
            self.router(mode)
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("HTTP 服务异常退出")?;
        self.stop().await;
        Ok(())
    }
}

/// 最小化的 CORS 放行（`ALLOW_CORS`）。
async fn allow_cors(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        "Access-Control-Allow-Origin",
        axum::http::HeaderValue::from_static("*"),
    );
    response
}
