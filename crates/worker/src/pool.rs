use std::sync::{Arc, Mutex};

use orchestra_config::WorkerConfig;
use orchestra_domain::Controller;
use tracing::{debug, info};

use crate::registry::JobRegistry;
use crate::worker::{Worker, WorkerState};

struct Slot {
    worker: Worker,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// 工作池
///
/// 单个副本内的纵向扩展：固定数量的工作者槽位，每个槽位一个监督
/// 任务。守护进程通过 `ensure_running` 复活崩溃的槽位而不会重复
/// 处理作业（作业的独占性由控制器的租约保证）。
pub struct WorkerPool {
    controller: Arc<dyn Controller>,
    registry: Arc<JobRegistry>,
    config: WorkerConfig,
    host: String,
    slots: Mutex<Vec<Slot>>,
}

impl WorkerPool {
    pub fn new(
        controller: Arc<dyn Controller>,
        registry: Arc<JobRegistry>,
        config: WorkerConfig,
        host: String,
    ) -> Self {
        Self {
            controller,
            registry,
            config,
            host,
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.config.pool_size
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 创建槽位但不启动（提交在未启动的编排器上也要能排队）。
    pub fn init(&self) {
        self.ensure_initialized();
    }

    fn ensure_initialized(&self) {
        let mut slots = self.lock_slots();
        if !slots.is_empty() {
            return;
        }
        for _ in 0..self.config.pool_size {
            slots.push(Slot {
                worker: Worker::new(
                    Arc::clone(&self.controller),
                    Arc::clone(&self.registry),
                    self.config.clone(),
                    self.host.clone(),
                ),
                handle: None,
            });
        }
        info!("工作池初始化完成，共 {} 个槽位。", self.config.pool_size);
    }

    /// 启动所有槽位（重置停止控制）。
    pub fn start(&self) {
        self.ensure_initialized();
        let mut slots = self.lock_slots();
        for slot in slots.iter_mut() {
            slot.worker.reset_controls();
            Self::spawn_if_stopped(slot);
        }
    }

    /// 复活已退出但未被要求停止的槽位（守护进程的看门狗入口）。
    pub fn ensure_running(&self) {
        self.ensure_initialized();
        let mut slots = self.lock_slots();
        for slot in slots.iter_mut() {
            if slot.worker.stop_requested() || slot.worker.stop_on_idle_requested() {
                continue;
            }
            Self::spawn_if_stopped(slot);
        }
    }

    fn spawn_if_stopped(slot: &mut Slot) {
        let alive = slot
            .handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false);
        if alive {
            return;
        }
        if slot.handle.is_some() {
            debug!("工作者 '{}' 的监督任务将被重新启动。", slot.worker.name());
        }
        let worker = slot.worker.clone();
        slot.handle = Some(tokio::spawn(async move { worker.run().await }));
    }

    /// 停止所有工作者；`block` 为真时等待监督任务退出。
    pub async fn stop(&self, block: bool) {
        let handles: Vec<_> = {
            let mut slots = self.lock_slots();
            for slot in slots.iter() {
                slot.worker.stop();
                slot.worker.stop_on_idle();
            }
            slots.iter_mut().filter_map(|s| s.handle.take()).collect()
        };
        if block {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// 队列为空时停止所有工作者。
    pub async fn stop_on_idle(&self, block: bool) {
        let handles: Vec<_> = {
            let mut slots = self.lock_slots();
            for slot in slots.iter() {
                slot.worker.stop_on_idle();
            }
            if block {
                slots.iter_mut().filter_map(|s| s.handle.take()).collect()
            } else {
                Vec::new()
            }
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// 中止所有运行中的作业并停止工作者。
    pub async fn kill(&self, origin: &str, reason: &str, block: bool) {
        let handles: Vec<_> = {
            let mut slots = self.lock_slots();
            for slot in slots.iter() {
                slot.worker.kill(origin, reason);
            }
            slots.iter_mut().filter_map(|s| s.handle.take()).collect()
        };
        if block {
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// 若某个槽位正持有 `token`，发出本地中止信号。
    pub fn abort_local(&self, token: &str, origin: &str, reason: &str, re_queue: bool) -> bool {
        let slots = self.lock_slots();
        slots
            .iter()
            .any(|slot| slot.worker.abort_current(token, origin, reason, re_queue))
    }

    /// 当前各槽位正在处理的作业令牌。
    pub fn jobs(&self) -> Vec<String> {
        let slots = self.lock_slots();
        slots
            .iter()
            .filter_map(|slot| slot.worker.current_token())
            .collect()
    }

    /// 是否已初始化（可以接受工作）。
    pub fn ready(&self) -> bool {
        !self.lock_slots().is_empty()
    }

    /// 是否有任何监督循环仍在运行。
    pub fn running(&self) -> bool {
        let slots = self.lock_slots();
        slots
            .iter()
            .any(|slot| slot.worker.state() != WorkerState::Stopped)
    }

    /// 是否所有槽位都空闲。
    pub fn idle(&self) -> bool {
        let slots = self.lock_slots();
        slots
            .iter()
            .all(|slot| slot.worker.state() != WorkerState::Busy)
    }
}
