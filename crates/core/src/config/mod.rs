pub mod models;
pub mod validation;

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub use models::{
    DatabaseConfig, DispatcherConfig, ExecutorConfig, ObservabilityConfig, SessionConfig,
    WorkerConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

use crate::errors::FarmResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub session: SessionConfig,
    pub executor: ExecutorConfig,
    pub observability: ObservabilityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/serpfarm".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            dispatcher: DispatcherConfig {
                enabled: true,
                poll_interval_seconds: 2,
                max_concurrent_tasks: 5,
                error_backoff_seconds: 5,
                max_retries: 3,
                maintenance_interval_seconds: 300,
                maintain_pool_debounce_seconds: 1800,
                health_check_debounce_seconds: 3600,
            },
            worker: WorkerConfig {
                worker_id: String::new(),
                hostname: String::new(),
                device_classes: vec!["desktop".to_string(), "mobile".to_string()],
                heartbeat_interval_seconds: 30,
            },
            session: SessionConfig {
                max_sessions: 10,
                display_base: 100,
                display_range: 50,
                port_base: 5900,
                host: "127.0.0.1".to_string(),
                inactivity_timeout_seconds: 3600,
                max_lifetime_seconds: 7200,
                cleanup_interval_seconds: 300,
                settle_delay_ms: 1000,
                terminate_grace_seconds: 5,
                log_dir: "/tmp/serpfarm-vnc".to_string(),
            },
            executor: ExecutorConfig {
                runner_command: "serpfarm-runner".to_string(),
                runner_timeout_seconds: 1800,
            },
            observability: ObservabilityConfig {
                metrics_enabled: true,
                metrics_bind_address: "127.0.0.1:9205".to_string(),
                log_level: "info".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：TOML文件 + SERPFARM__ 前缀的环境变量覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).context("构建默认配置失败")?);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/serpfarm.toml",
                "serpfarm.toml",
                "/etc/serpfarm/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(Environment::with_prefix("SERPFARM").separator("__"));

        let mut config: AppConfig = builder
            .build()
            .context("读取配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        if config.worker.hostname.is_empty() {
            config.worker.hostname = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string());
        }
        if config.worker.worker_id.is_empty() {
            config.worker.worker_id = format!("worker-{}", config.worker.hostname);
        }

        Ok(config)
    }

    pub fn validate(&self) -> FarmResult<()> {
        self.database.validate()?;
        self.dispatcher.validate()?;
        self.worker.validate()?;
        self.session.validate()?;
        self.executor.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}
