use serde::{Deserialize, Serialize};

use super::validation::{ConfigValidator, ValidationUtils};
use crate::errors::{FarmError, FarmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "database.url")?;
        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections", 1000)?;
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "database.connection_timeout_seconds",
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 任务轮询间隔（秒）
    pub poll_interval_seconds: u64,
    /// 同时执行的任务上限
    pub max_concurrent_tasks: usize,
    /// 轮询出错后的退避时间（秒）
    pub error_backoff_seconds: u64,
    /// 最大重试次数
    pub max_retries: u32,
    /// 维护循环间隔（秒）
    pub maintenance_interval_seconds: u64,
    /// maintain_pool 任务去重窗口（秒）
    pub maintain_pool_debounce_seconds: i64,
    /// health_check 任务去重窗口（秒）
    pub health_check_debounce_seconds: i64,
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.poll_interval_seconds,
            "dispatcher.poll_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_concurrent_tasks,
            "dispatcher.max_concurrent_tasks",
            1000,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.maintenance_interval_seconds,
            "dispatcher.maintenance_interval_seconds",
        )?;
        if self.maintain_pool_debounce_seconds <= 0 || self.health_check_debounce_seconds <= 0 {
            return Err(FarmError::ValidationError(
                "dispatcher debounce windows must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker 标识，留空时由 hostname 派生
    pub worker_id: String,
    pub hostname: String,
    /// 注册时申报的设备类型能力
    pub device_classes: Vec<String>,
    pub heartbeat_interval_seconds: u64,
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        if self.device_classes.is_empty() {
            return Err(FarmError::ValidationError(
                "worker.device_classes cannot be empty".to_string(),
            ));
        }
        for device in &self.device_classes {
            ValidationUtils::validate_not_empty(device, "worker.device_classes")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 同时存在的调试会话上限
    pub max_sessions: usize,
    /// 虚拟显示编号起点
    pub display_base: u32,
    /// 可分配的显示编号数量
    pub display_range: u32,
    /// VNC端口起点，端口 = port_base + (display - display_base)
    pub port_base: u16,
    /// 会话仅在可信网络边界内可达
    pub host: String,
    pub inactivity_timeout_seconds: i64,
    pub max_lifetime_seconds: i64,
    pub cleanup_interval_seconds: u64,
    /// 守护进程启动后的稳定等待（毫秒）
    pub settle_delay_ms: u64,
    /// 优雅终止等待时间（秒），超时后强杀
    pub terminate_grace_seconds: u64,
    /// 每个会话的x11vnc日志目录
    pub log_dir: String,
}

impl ConfigValidator for SessionConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_count(self.max_sessions, "session.max_sessions", 100)?;
        ValidationUtils::validate_count(self.display_range as usize, "session.display_range", 1000)?;
        ValidationUtils::validate_port(self.port_base, "session.port_base")?;
        ValidationUtils::validate_not_empty(&self.host, "session.host")?;
        ValidationUtils::validate_not_empty(&self.log_dir, "session.log_dir")?;
        ValidationUtils::validate_timeout_seconds(
            self.cleanup_interval_seconds,
            "session.cleanup_interval_seconds",
        )?;
        if self.inactivity_timeout_seconds <= 0 || self.max_lifetime_seconds <= 0 {
            return Err(FarmError::ValidationError(
                "session timeouts must be positive".to_string(),
            ));
        }
        if self.max_sessions > self.display_range as usize {
            return Err(FarmError::ValidationError(format!(
                "session.max_sessions ({}) exceeds display_range ({})",
                self.max_sessions, self.display_range
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// 浏览器自动化执行器程序路径
    pub runner_command: String,
    /// 单个自动化操作的超时（秒）
    pub runner_timeout_seconds: u64,
}

impl ConfigValidator for ExecutorConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_not_empty(&self.runner_command, "executor.runner_command")?;
        ValidationUtils::validate_timeout_seconds(
            self.runner_timeout_seconds,
            "executor.runner_timeout_seconds",
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    pub log_level: String,
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> FarmResult<()> {
        ValidationUtils::validate_not_empty(&self.log_level, "observability.log_level")?;
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_bind_address,
                "observability.metrics_bind_address",
            )?;
        }
        Ok(())
    }
}
