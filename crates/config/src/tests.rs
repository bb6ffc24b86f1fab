#[cfg(test)]
mod config_tests {
    use std::sync::{Mutex, MutexGuard};
    use std::time::Duration;

    use crate::*;

    // 进程环境是共享的，相关测试串行执行
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    const ORCHESTRA_VARS: &[&str] = &[
        "ORCHESTRA_WORKER_POOL_SIZE",
        "ORCHESTRA_AT_STARTUP",
        "ORCHESTRA_WORKER_INTERVAL",
        "ORCHESTRA_DAEMON_INTERVAL",
        "ORCHESTRA_CONTROLLER",
        "ORCHESTRA_CONTROLLER_ARGS",
        "ORCHESTRA_WORKER_ARGS",
        "ORCHESTRA_ABORT_TIMEOUT",
        "ORCHESTRA_LOGLEVEL",
        "ORCHESTRA_MP_METHOD",
        "FS_MOUNT_POINT",
        "ALLOW_CORS",
    ];

    fn clear_env() {
        for name in ORCHESTRA_VARS {
            std::env::remove_var(name);
        }
    }

    #[test]
    fn test_defaults_without_environment() {
        let _guard = lock_env();
        clear_env();
        let config = load_from_env().unwrap();
        assert_eq!(config.worker.pool_size, 1);
        assert_eq!(config.worker.interval, Duration::from_secs(1));
        assert_eq!(config.daemon.interval, Duration::from_secs(1));
        assert!(config.daemon.at_startup);
        assert_eq!(config.controller.kind, ControllerKind::Sqlite);
        assert_eq!(config.controller.lock_ttl, Duration::from_secs(10));
        assert_eq!(
            config.controller.token_ttl,
            Some(Duration::from_secs(3600))
        );
        assert_eq!(config.abort_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(!config.allow_cors);
        clear_env();
    }

    #[test]
    fn test_environment_overrides() {
        let _guard = lock_env();
        clear_env();
        std::env::set_var("ORCHESTRA_WORKER_POOL_SIZE", "4");
        std::env::set_var("ORCHESTRA_WORKER_INTERVAL", "0.5");
        std::env::set_var("ORCHESTRA_ABORT_TIMEOUT", "10");
        std::env::set_var("ORCHESTRA_LOGLEVEL", "debug");
        std::env::set_var("ALLOW_CORS", "true");
        std::env::set_var(
            "ORCHESTRA_WORKER_ARGS",
            r#"{"process_timeout": 30, "registry_push_interval": 0.1}"#,
        );
        std::env::set_var(
            "ORCHESTRA_CONTROLLER_ARGS",
            r#"{"requeue": true, "requeue_limit": 5, "lock_ttl": 2, "token_ttl": null}"#,
        );

        let config = load_from_env().unwrap();
        assert_eq!(config.worker.pool_size, 4);
        assert_eq!(config.worker.interval, Duration::from_millis(500));
        assert_eq!(
            config.worker.process_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.worker.registry_push_interval,
            Duration::from_millis(100)
        );
        assert!(config.controller.requeue);
        assert_eq!(config.controller.requeue_limit, 5);
        assert_eq!(config.controller.lock_ttl, Duration::from_secs(2));
        assert_eq!(config.controller.token_ttl, None);
        assert_eq!(config.abort_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.allow_cors);
        clear_env();
    }

    #[test]
    fn test_http_controller_requires_base_url() {
        let _guard = lock_env();
        clear_env();
        std::env::set_var("ORCHESTRA_CONTROLLER", "http");
        assert!(load_from_env().is_err());

        std::env::set_var(
            "ORCHESTRA_CONTROLLER_ARGS",
            r#"{"base_url": "http://controller:8080"}"#,
        );
        let config = load_from_env().unwrap();
        assert_eq!(config.controller.kind, ControllerKind::Http);
        assert_eq!(
            config.controller.base_url.as_deref(),
            Some("http://controller:8080")
        );
        clear_env();
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let _guard = lock_env();
        clear_env();
        std::env::set_var("ORCHESTRA_WORKER_POOL_SIZE", "0");
        assert!(load_from_env().is_err());
        clear_env();

        std::env::set_var("ORCHESTRA_LOGLEVEL", "verbose");
        assert!(load_from_env().is_err());
        clear_env();

        std::env::set_var("ORCHESTRA_CONTROLLER_ARGS", "{not json");
        assert!(load_from_env().is_err());
        clear_env();
    }
}
