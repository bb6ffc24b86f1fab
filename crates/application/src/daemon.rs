use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info};

type ServiceFactory = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct DaemonInner {
    factory: ServiceFactory,
    desired: AtomicBool,
    executing: AtomicBool,
    notify: tokio::sync::Notify,
}

/// 守护进程
///
/// 受监督的周期循环：每隔 `interval` 调用一次服务函数；服务崩溃
/// （panic）时记录日志并在下个周期重启。包装控制器清理与工作池
/// 看门狗循环。
pub struct Daemon {
    inner: Arc<DaemonInner>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Daemon {
    /// `factory` 每个周期被调用一次，产出该周期要执行的服务 future。
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(DaemonInner {
                factory: Arc::new(move || {
                    Box::pin(factory()) as Pin<Box<dyn Future<Output = ()> + Send>>
                }),
                desired: AtomicBool::new(false),
                executing: AtomicBool::new(false),
                notify: tokio::sync::Notify::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// 期望状态：已启动且未被要求停止。
    pub fn active(&self) -> bool {
        self.inner.desired.load(Ordering::SeqCst)
    }

    /// 监督任务是否存活。
    pub fn running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 启动监督循环；已在运行时为空操作。
    pub fn start(&self, interval: Duration) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        self.inner.desired.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move {
            info!("守护进程启动，周期 {:?}。", interval);
            while inner.desired.load(Ordering::SeqCst) {
                inner.executing.store(true, Ordering::SeqCst);
                // 服务在独立任务中运行，panic 不会波及监督循环
                let service = tokio::spawn((inner.factory)());
                if let Err(err) = service.await {
                    error!(
                        "守护进程的服务崩溃，将在 {:?} 后重启: {}",
                        interval, err
                    );
                }
                inner.executing.store(false, Ordering::SeqCst);

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = inner.notify.notified() => {}
                }
            }
            debug!("守护进程退出。");
        }));
    }

    /// 停止监督循环；`block` 为真时等待退出。
    pub async fn stop(&self, block: bool) {
        self.inner.desired.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        if block {
            let handle = self
                .handle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_daemon_invokes_service_periodically() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let daemon = Daemon::new(move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        daemon.start(Duration::from_millis(20));
        assert!(daemon.active());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(daemon.running());
        assert!(counter.load(Ordering::SeqCst) >= 3);

        daemon.stop(true).await;
        assert!(!daemon.active());
        assert!(!daemon.running());
    }

    #[tokio::test]
    async fn test_daemon_survives_panicking_service() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let daemon = Daemon::new(move || {
            let counter = Arc::clone(&counter_clone);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("service failure");
            }
        });

        daemon.start(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        // 服务每轮都 panic，但守护进程持续重启它
        assert!(counter.load(Ordering::SeqCst) >= 3);
        assert!(daemon.running());

        daemon.stop(true).await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let daemon = Daemon::new(|| async {});
        daemon.start(Duration::from_millis(10));
        daemon.start(Duration::from_millis(10));
        assert!(daemon.active());
        daemon.stop(true).await;
    }
}
