use std::collections::HashMap;
use std::sync::Arc;

use orchestra_errors::{OrchestraError, OrchestraResult};
use serde_json::Value;

use crate::context::JobContext;

/// 作业函数
///
/// 在专属阻塞线程上运行；通过上下文写报告、登记子作业并轮询中止
/// 标志。返回错误表示作业失败（记入报告，不等同于中止）。
pub type JobCallable = Arc<dyn Fn(JobContext) -> OrchestraResult<()> + Send + Sync>;

/// 请求体校验函数，失败时返回面向用户的错误描述。
pub type JobValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

struct Registration {
    callable: JobCallable,
    validator: Option<JobValidator>,
}

/// 作业表
///
/// 启动时填充的 `名称 → (作业函数, 校验函数)` 映射，替代任何运行期的
/// 基于类的分发。
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Registration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一种作业类型。
    pub fn register<S, F>(&mut self, job_type: S, callable: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(JobContext) -> OrchestraResult<()> + Send + Sync + 'static,
    {
        self.jobs.insert(
            job_type.into(),
            Registration {
                callable: Arc::new(callable),
                validator: None,
            },
        );
        self
    }

    /// 注册一种带请求体校验的作业类型。
    pub fn register_with_validator<S, F, V>(
        &mut self,
        job_type: S,
        callable: F,
        validator: V,
    ) -> &mut Self
    where
        S: Into<String>,
        F: Fn(JobContext) -> OrchestraResult<()> + Send + Sync + 'static,
        V: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.jobs.insert(
            job_type.into(),
            Registration {
                callable: Arc::new(callable),
                validator: Some(Arc::new(validator)),
            },
        );
        self
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    pub fn callable(&self, job_type: &str) -> OrchestraResult<JobCallable> {
        self.jobs
            .get(job_type)
            .map(|registration| Arc::clone(&registration.callable))
            .ok_or_else(|| OrchestraError::UnknownJobType(job_type.to_string()))
    }

    /// 校验请求体；未注册校验函数的作业类型接受任意请求体。
    pub fn validate(&self, job_type: &str, body: &Value) -> OrchestraResult<()> {
        let registration = self
            .jobs
            .get(job_type)
            .ok_or_else(|| OrchestraError::UnknownJobType(job_type.to_string()))?;
        if let Some(validator) = &registration.validator {
            validator(body).map_err(OrchestraError::BadRequest)?;
        }
        Ok(())
    }
}
