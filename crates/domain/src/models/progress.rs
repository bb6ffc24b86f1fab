use serde::{Deserialize, Serialize};

/// 作业状态
///
/// 状态格仅允许 `queued → running → {completed|aborted}`；唯一的回边
/// 是控制器重新排队时的 `running → queued`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "aborted")]
    Aborted,
    #[serde(rename = "completed")]
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Aborted => "aborted",
            JobStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "aborted" => Some(JobStatus::Aborted),
            "completed" => Some(JobStatus::Completed),
            _ => None,
        }
    }

    /// 终态不再接受状态迁移。
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Aborted)
    }
}

/// 作业进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub status: JobStatus,
    #[serde(default)]
    pub verbose: String,
    #[serde(default)]
    pub numeric: u8,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            status: JobStatus::Queued,
            verbose: String::new(),
            numeric: 0,
        }
    }
}

impl Progress {
    pub fn run(&mut self) {
        self.status = JobStatus::Running;
    }

    pub fn queue(&mut self) {
        self.status = JobStatus::Queued;
    }

    pub fn abort(&mut self) {
        self.status = JobStatus::Aborted;
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.numeric = 100;
    }

    /// 设置数值进度；运行期间进度只增不减，取值裁剪到 [0, 100]。
    pub fn set_numeric(&mut self, numeric: u8) {
        let numeric = numeric.min(100);
        if self.status == JobStatus::Running && numeric < self.numeric {
            return;
        }
        self.numeric = numeric;
    }
}
