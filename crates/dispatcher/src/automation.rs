//! 浏览器自动化端口
//!
//! 真正的浏览器操作（反检测、SERP抓取、代理处理）对本核心是不透明
//! 的：这里只定义操作接口和产物形状。生产实现把操作转交给独立的
//! 自动化执行器程序，通过参数传入JSON负载、从stdout读回JSON结果。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use serpfarm_core::config::ExecutorConfig;
use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::session::DeviceClass;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupOutcome {
    pub profile_id: Uuid,
    pub sites_visited: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpOutcome {
    pub profile_id: Uuid,
    pub results_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEntry {
    pub keyword_id: Uuid,
    pub keyword: String,
    pub domain: String,
    pub position: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionsOutcome {
    pub profile_id: Uuid,
    pub results: Vec<PositionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthOutcome {
    pub checked_profiles: u32,
    pub corrupted_profiles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolOutcome {
    pub desktop_profiles: u32,
    pub mobile_profiles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NurtureOutcome {
    pub profile_id: Uuid,
    pub cookies_collected: u32,
}

#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn warmup_profile(
        &self,
        profile_id: Option<Uuid>,
        device: DeviceClass,
        cascade_mode: bool,
    ) -> FarmResult<WarmupOutcome>;

    async fn parse_serp(
        &self,
        keyword: &str,
        device: DeviceClass,
        pages: u32,
        region_code: &str,
        profile_id: Option<Uuid>,
    ) -> FarmResult<SerpOutcome>;

    async fn check_positions(
        &self,
        keyword_ids: &[Uuid],
        device: DeviceClass,
    ) -> FarmResult<PositionsOutcome>;

    async fn health_check(
        &self,
        device: Option<DeviceClass>,
        limit: u32,
    ) -> FarmResult<HealthOutcome>;

    async fn maintain_pool(&self) -> FarmResult<PoolOutcome>;

    async fn nurture_profile(
        &self,
        profile_id: Uuid,
        target_cookies: Option<u32>,
    ) -> FarmResult<NurtureOutcome>;
}

/// 调用外部自动化执行器程序的端口实现
///
/// 约定：`<runner> <operation> <json-payload>`，执行器把结果JSON写到
/// stdout，非零退出码表示失败、诊断信息在stderr。
pub struct CommandAutomation {
    program: PathBuf,
    op_timeout: Duration,
}

impl CommandAutomation {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            program: PathBuf::from(&config.runner_command),
            op_timeout: Duration::from_secs(config.runner_timeout_seconds),
        }
    }

    async fn run(&self, operation: &str, payload: Value) -> FarmResult<Value> {
        debug!("调用自动化执行器: {} {}", self.program.display(), operation);

        let child = Command::new(&self.program)
            .arg(operation)
            .arg(payload.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                FarmError::TaskExecution(format!(
                    "启动自动化执行器 {} 失败: {e}",
                    self.program.display()
                ))
            })?;

        let output = timeout(self.op_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                FarmError::Timeout(format!(
                    "自动化操作 {operation} 超过 {}s 未返回",
                    self.op_timeout.as_secs()
                ))
            })?
            .map_err(|e| FarmError::TaskExecution(format!("等待自动化执行器失败: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FarmError::TaskExecution(format!(
                "自动化操作 {operation} 失败 (退出码 {:?}): {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
            FarmError::TaskExecution(format!("解析自动化操作 {operation} 的输出失败: {e}"))
        })?;

        info!("自动化操作完成: {operation}");
        Ok(result)
    }
}

#[async_trait]
impl BrowserAutomation for CommandAutomation {
    async fn warmup_profile(
        &self,
        profile_id: Option<Uuid>,
        device: DeviceClass,
        cascade_mode: bool,
    ) -> FarmResult<WarmupOutcome> {
        let result = self
            .run(
                "warmup_profile",
                serde_json::json!({
                    "profile_id": profile_id,
                    "device_type": device.as_str(),
                    "cascade_mode": cascade_mode,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn parse_serp(
        &self,
        keyword: &str,
        device: DeviceClass,
        pages: u32,
        region_code: &str,
        profile_id: Option<Uuid>,
    ) -> FarmResult<SerpOutcome> {
        let result = self
            .run(
                "parse_serp",
                serde_json::json!({
                    "keyword": keyword,
                    "device_type": device.as_str(),
                    "pages": pages,
                    "region_code": region_code,
                    "profile_id": profile_id,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn check_positions(
        &self,
        keyword_ids: &[Uuid],
        device: DeviceClass,
    ) -> FarmResult<PositionsOutcome> {
        let result = self
            .run(
                "check_positions",
                serde_json::json!({
                    "keyword_ids": keyword_ids,
                    "device_type": device.as_str(),
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn health_check(
        &self,
        device: Option<DeviceClass>,
        limit: u32,
    ) -> FarmResult<HealthOutcome> {
        let result = self
            .run(
                "health_check",
                serde_json::json!({
                    "device_type": device.map(|d| d.as_str()),
                    "limit": limit,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn maintain_pool(&self) -> FarmResult<PoolOutcome> {
        let result = self.run("maintain_pool", serde_json::json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn nurture_profile(
        &self,
        profile_id: Uuid,
        target_cookies: Option<u32>,
    ) -> FarmResult<NurtureOutcome> {
        let result = self
            .run(
                "nurture_profile",
                serde_json::json!({
                    "profile_id": profile_id,
                    "target_cookies": target_cookies,
                }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}
