use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use orchestra_domain::{ChildJobRef, JobInfo, LogCategory, Report};
use tokio::sync::mpsc;

/// 中止信号的来源与原因。
#[derive(Debug, Clone)]
pub struct AbortSignal {
    pub origin: String,
    pub reason: String,
    /// 中止后是否重新排队
    pub re_queue: bool,
}

/// 刷写请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRequest {
    /// 常规刷写，按 `registry_push_interval` 去抖
    Debounced,
    /// 立即刷写
    Forced,
}

struct ContextInner {
    worker_id: String,
    info: Mutex<JobInfo>,
    abort_requested: AtomicBool,
    abort_signal: Mutex<Option<AbortSignal>>,
    children: Mutex<Vec<ChildJobRef>>,
    push_tx: mpsc::UnboundedSender<PushRequest>,
}

/// 作业上下文
///
/// 传入作业函数的线程安全句柄：报告缓冲、刷写信号、子作业登记与
/// 中止标志。作业代码必须在协作点轮询 `aborted()`。内部互斥锁只在
/// 报告变更期间短暂持有，绝不跨越 I/O。
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<ContextInner>,
}

impl JobContext {
    pub fn new(
        worker_id: &str,
        info: JobInfo,
    ) -> (Self, mpsc::UnboundedReceiver<PushRequest>) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(ContextInner {
                    worker_id: worker_id.to_string(),
                    info: Mutex::new(info),
                    abort_requested: AtomicBool::new(false),
                    abort_signal: Mutex::new(None),
                    children: Mutex::new(Vec::new()),
                    push_tx,
                }),
            },
            push_rx,
        )
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// 当前作业信息的副本。
    pub fn snapshot(&self) -> JobInfo {
        self.inner.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 在报告缓冲上执行一次变更。
    pub fn with_info<R>(&self, f: impl FnOnce(&mut JobInfo) -> R) -> R {
        let mut info = self.inner.info.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut info)
    }

    /// 在报告上执行一次变更（报告缺失时不执行）。
    pub fn with_report<R>(&self, f: impl FnOnce(&mut Report) -> R) -> Option<R> {
        self.with_info(|info| info.report.as_mut().map(f))
    }

    /// 以工作者为来源追加一条作业日志。
    pub fn log<B: Into<String>>(&self, category: LogCategory, body: B) {
        let worker_id = self.inner.worker_id.clone();
        self.with_report(|report| report.log.log(category, worker_id, body));
    }

    /// 更新进度描述与数值。
    pub fn set_progress<V: Into<String>>(&self, verbose: V, numeric: u8) {
        self.with_report(|report| {
            report.progress.verbose = verbose.into();
            report.progress.set_numeric(numeric);
        });
    }

    /// 设置业务结果数据。
    pub fn set_data(&self, data: serde_json::Value) {
        self.with_report(|report| report.data = Some(data));
    }

    /// 请求刷写（由工作者按推送间隔去抖）。
    pub fn push(&self) {
        let _ = self.inner.push_tx.send(PushRequest::Debounced);
    }

    /// 请求立即刷写。
    pub fn push_forced(&self) {
        let _ = self.inner.push_tx.send(PushRequest::Forced);
    }

    /// 作业是否被要求中止。
    pub fn aborted(&self) -> bool {
        self.inner.abort_requested.load(Ordering::SeqCst)
    }

    /// 发出中止请求（幂等，保留最早的信号）。
    pub fn request_abort<O: Into<String>, R: Into<String>>(
        &self,
        origin: O,
        reason: R,
        re_queue: bool,
    ) {
        {
            let mut signal = self
                .inner
                .abort_signal
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if signal.is_none() {
                *signal = Some(AbortSignal {
                    origin: origin.into(),
                    reason: reason.into(),
                    re_queue,
                });
            }
        }
        self.inner.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn abort_signal(&self) -> Option<AbortSignal> {
        self.inner
            .abort_signal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 登记一个子作业。
    pub fn add_child(&self, child: ChildJobRef) {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// 注销一个子作业（例如子作业已正常结束）。
    pub fn remove_child(&self, id: &str) {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|child| child.id != id);
    }

    pub fn children(&self) -> Vec<ChildJobRef> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::{JobConfig, Token};

    fn context() -> (JobContext, mpsc::UnboundedReceiver<PushRequest>) {
        let mut info = JobInfo::new(JobConfig::new("demo", serde_json::json!({})));
        info.token = Some(Token::with_value("t-1".into(), None));
        info.report = Some(Report::new("http://localhost", info.token.clone()));
        JobContext::new("worker-test", info)
    }

    #[test]
    fn test_log_and_progress_mutations() {
        let (ctx, _rx) = context();
        ctx.log(LogCategory::Event, "accepted");
        ctx.set_progress("halfway", 50);
        ctx.set_data(serde_json::json!({"success": true}));

        let info = ctx.snapshot();
        let report = info.report.unwrap();
        assert_eq!(report.log.get(LogCategory::Event).len(), 1);
        assert_eq!(report.log.get(LogCategory::Event)[0].origin, "worker-test");
        assert_eq!(report.progress.verbose, "halfway");
        assert_eq!(report.progress.numeric, 50);
        assert_eq!(report.data, Some(serde_json::json!({"success": true})));
    }

    #[test]
    fn test_push_signals_are_delivered() {
        let (ctx, mut rx) = context();
        ctx.push();
        ctx.push_forced();
        assert_eq!(rx.try_recv().unwrap(), PushRequest::Debounced);
        assert_eq!(rx.try_recv().unwrap(), PushRequest::Forced);
    }

    #[test]
    fn test_abort_keeps_first_signal() {
        let (ctx, _rx) = context();
        assert!(!ctx.aborted());
        ctx.request_abort("user", "cancelled", false);
        ctx.request_abort("system", "timeout", true);
        assert!(ctx.aborted());
        let signal = ctx.abort_signal().unwrap();
        assert_eq!(signal.origin, "user");
        assert_eq!(signal.reason, "cancelled");
    }

    #[test]
    fn test_children_registry() {
        let (ctx, _rx) = context();
        ctx.add_child(ChildJobRef {
            id: "import@b".into(),
            base_url: "http://b.example".into(),
            token: "t-child".into(),
            timeout: None,
        });
        assert_eq!(ctx.children().len(), 1);
        ctx.remove_child("import@b");
        assert!(ctx.children().is_empty());
    }
}
