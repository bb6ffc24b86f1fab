use std::time::{Duration, Instant};

use orchestra_domain::{ChildJobRef, LogCategory};
use orchestra_worker::JobRegistry;
use serde_json::Value;

/// 注册内置的演示作业。
///
/// 请求体格式：
/// `{"demo": {"duration": <秒>, "success": <bool>, "children": [...]}}`。
/// 按给定时长推进进度，在协作点轮询中止标志；`children` 中的条目会
/// 被登记为子作业（中止父作业时被级联中止）。
pub fn register_demo_job(registry: &mut JobRegistry) {
    registry.register_with_validator(
        "demo",
        |ctx| {
            ctx.log(LogCategory::Event, "Accepting request.");
            let body = ctx.snapshot().config.request_body.unwrap_or_default();
            let duration = body
                .pointer("/demo/duration")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let success = body
                .pointer("/demo/success")
                .and_then(Value::as_bool)
                .unwrap_or(true);

            if let Some(children) = body.pointer("/demo/children").and_then(Value::as_array) {
                for child in children {
                    let Ok(child) = serde_json::from_value::<ChildJobRef>(child.clone()) else {
                        ctx.log(LogCategory::Warning, "Skipping malformed child entry.");
                        continue;
                    };
                    ctx.add_child(child);
                }
            }

            let deadline = Instant::now() + Duration::from_secs_f64(duration.max(0.0));
            let total = duration.max(0.001);
            loop {
                if ctx.aborted() {
                    return Ok(());
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let remaining = (deadline - now).as_secs_f64();
                let numeric = (100.0 * (1.0 - remaining / total)).clamp(0.0, 99.0) as u8;
                ctx.set_progress("processing request", numeric);
                ctx.push();
                std::thread::sleep(Duration::from_millis(25));
            }

            ctx.set_data(serde_json::json!({"success": success}));
            ctx.log(LogCategory::Event, "Terminating normally.");
            Ok(())
        },
        |body| {
            let demo = body
                .get("demo")
                .ok_or_else(|| "missing required field 'demo'".to_string())?;
            if !demo.is_object() {
                return Err("field 'demo' must be an object".to_string());
            }
            if let Some(duration) = demo.get("duration") {
                if duration.as_f64().is_none() {
                    return Err("field 'demo.duration' must be a number".to_string());
                }
            }
            Ok(())
        },
    );
}
