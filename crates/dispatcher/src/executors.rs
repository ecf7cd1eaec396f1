//! 任务执行器
//!
//! 每种任务类型一个执行器：在分发边界解码强类型负载，把浏览器相关
//! 的工作交给自动化端口，再把产物组装成任务的result JSON。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::task::{Task, TaskType};
use serpfarm_domain::payload::TaskPayload;

use crate::automation::BrowserAutomation;

/// 执行上下文
#[derive(Clone)]
pub struct ExecutionContext {
    pub task: Task,
    pub payload: TaskPayload,
    pub worker_id: String,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value>;
    fn name(&self) -> &str;
}

/// 按任务类型查找执行器
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// 注册全部内置执行器
    pub fn with_automation(automation: Arc<dyn BrowserAutomation>) -> Self {
        let mut registry = Self::new();
        registry.register(
            TaskType::WarmupProfile,
            Arc::new(WarmupProfileExecutor::new(automation.clone())),
        );
        registry.register(
            TaskType::ParseSerp,
            Arc::new(ParseSerpExecutor::new(automation.clone())),
        );
        registry.register(
            TaskType::CheckPositions,
            Arc::new(CheckPositionsExecutor::new(automation.clone())),
        );
        registry.register(
            TaskType::HealthCheck,
            Arc::new(HealthCheckExecutor::new(automation.clone())),
        );
        registry.register(
            TaskType::MaintainPool,
            Arc::new(MaintainPoolExecutor::new(automation.clone())),
        );
        registry.register(
            TaskType::ProfileNurture,
            Arc::new(ProfileNurtureExecutor::new(automation)),
        );
        registry
    }

    pub fn register(&mut self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        self.executors
            .insert(task_type.as_str().to_string(), executor);
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type.as_str()).cloned()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected_payload(executor: &str) -> FarmError {
    FarmError::invalid_params(format!("{executor} 收到不匹配的任务负载"))
}

pub struct WarmupProfileExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl WarmupProfileExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for WarmupProfileExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        let TaskPayload::WarmupProfile(payload) = &ctx.payload else {
            return Err(unexpected_payload(self.name()));
        };
        let outcome = self
            .automation
            .warmup_profile(payload.profile_id, payload.device_type, payload.cascade_mode)
            .await?;
        Ok(serde_json::json!({
            "profile_id": outcome.profile_id,
            "device_type": payload.device_type.as_str(),
            "warmup_sites_visited": outcome.sites_visited,
            "cascade_mode": payload.cascade_mode,
        }))
    }

    fn name(&self) -> &str {
        "warmup_profile"
    }
}

pub struct ParseSerpExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl ParseSerpExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for ParseSerpExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        let TaskPayload::ParseSerp(payload) = &ctx.payload else {
            return Err(unexpected_payload(self.name()));
        };
        let outcome = self
            .automation
            .parse_serp(
                &payload.keyword,
                payload.device_type,
                payload.pages,
                &payload.region_code,
                payload.profile_id,
            )
            .await?;
        Ok(serde_json::json!({
            "keyword": payload.keyword,
            "device_type": payload.device_type.as_str(),
            "results_count": outcome.results_count,
            "profile_id": outcome.profile_id,
        }))
    }

    fn name(&self) -> &str {
        "parse_serp"
    }
}

pub struct CheckPositionsExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl CheckPositionsExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for CheckPositionsExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        let TaskPayload::CheckPositions(payload) = &ctx.payload else {
            return Err(unexpected_payload(self.name()));
        };
        if payload.keyword_ids.is_empty() {
            return Err(FarmError::invalid_params("check_positions 缺少关键词"));
        }
        let outcome = self
            .automation
            .check_positions(&payload.keyword_ids, payload.device_type)
            .await?;
        Ok(serde_json::json!({
            "device_type": payload.device_type.as_str(),
            "checked_keywords": payload.keyword_ids.len(),
            "results": outcome.results,
            "profile_id": outcome.profile_id,
        }))
    }

    fn name(&self) -> &str {
        "check_positions"
    }
}

pub struct HealthCheckExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl HealthCheckExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for HealthCheckExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        let TaskPayload::HealthCheck(payload) = &ctx.payload else {
            return Err(unexpected_payload(self.name()));
        };
        // 一次最多检查10个profile
        let outcome = self.automation.health_check(payload.device_type, 10).await?;
        Ok(serde_json::json!({
            "checked_profiles": outcome.checked_profiles,
            "corrupted_profiles": outcome.corrupted_profiles,
            "device_type": payload.device_type.map(|d| d.as_str()),
        }))
    }

    fn name(&self) -> &str {
        "health_check"
    }
}

pub struct MaintainPoolExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl MaintainPoolExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for MaintainPoolExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        if !matches!(ctx.payload, TaskPayload::MaintainPool) {
            return Err(unexpected_payload(self.name()));
        }
        let outcome = self.automation.maintain_pool().await?;
        Ok(serde_json::json!({
            "desktop_profiles": outcome.desktop_profiles,
            "mobile_profiles": outcome.mobile_profiles,
            "total_profiles": outcome.desktop_profiles + outcome.mobile_profiles,
        }))
    }

    fn name(&self) -> &str {
        "maintain_pool"
    }
}

pub struct ProfileNurtureExecutor {
    automation: Arc<dyn BrowserAutomation>,
}

impl ProfileNurtureExecutor {
    pub fn new(automation: Arc<dyn BrowserAutomation>) -> Self {
        Self { automation }
    }
}

#[async_trait]
impl TaskExecutor for ProfileNurtureExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> FarmResult<Value> {
        let TaskPayload::ProfileNurture(payload) = &ctx.payload else {
            return Err(unexpected_payload(self.name()));
        };
        let outcome = self
            .automation
            .nurture_profile(payload.profile_id, payload.target_cookies)
            .await?;
        Ok(serde_json::json!({
            "profile_id": outcome.profile_id,
            "cookies_collected": outcome.cookies_collected,
        }))
    }

    fn name(&self) -> &str {
        "profile_nurture"
    }
}
