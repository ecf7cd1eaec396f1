//! 测试替身
//!
//! 自动化端口的脚本化实现，让分发、重试、级联逻辑不需要真实浏览器
//! 就能跑通。

use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::session::DeviceClass;

use crate::automation::{
    BrowserAutomation, HealthOutcome, NurtureOutcome, PoolOutcome, PositionEntry,
    PositionsOutcome, SerpOutcome, WarmupOutcome,
};

#[derive(Default)]
pub struct StubAutomation {
    /// 设置后所有操作都以该消息失败（可恢复错误）
    fail_message: Mutex<Option<String>>,
    /// 记录被调用的操作名
    calls: Mutex<Vec<String>>,
    /// parse_serp / check_positions 报告消费的profile
    profile_id: Uuid,
}

impl StubAutomation {
    pub fn new() -> Self {
        Self {
            fail_message: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            profile_id: Uuid::new_v4(),
        }
    }

    pub fn fail_with<S: Into<String>>(&self, message: S) {
        *self.fail_message.lock().unwrap() = Some(message.into());
    }

    pub fn succeed(&self) {
        *self.fail_message.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn profile_id(&self) -> Uuid {
        self.profile_id
    }

    fn record(&self, operation: &str) -> FarmResult<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if let Some(message) = self.fail_message.lock().unwrap().clone() {
            return Err(FarmError::TaskExecution(message));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserAutomation for StubAutomation {
    async fn warmup_profile(
        &self,
        profile_id: Option<Uuid>,
        _device: DeviceClass,
        _cascade_mode: bool,
    ) -> FarmResult<WarmupOutcome> {
        self.record("warmup_profile")?;
        Ok(WarmupOutcome {
            profile_id: profile_id.unwrap_or(self.profile_id),
            sites_visited: 5,
        })
    }

    async fn parse_serp(
        &self,
        _keyword: &str,
        _device: DeviceClass,
        _pages: u32,
        _region_code: &str,
        profile_id: Option<Uuid>,
    ) -> FarmResult<SerpOutcome> {
        self.record("parse_serp")?;
        Ok(SerpOutcome {
            profile_id: profile_id.unwrap_or(self.profile_id),
            results_count: 42,
        })
    }

    async fn check_positions(
        &self,
        keyword_ids: &[Uuid],
        _device: DeviceClass,
    ) -> FarmResult<PositionsOutcome> {
        self.record("check_positions")?;
        Ok(PositionsOutcome {
            profile_id: self.profile_id,
            results: keyword_ids
                .iter()
                .map(|id| PositionEntry {
                    keyword_id: *id,
                    keyword: format!("keyword-{id}"),
                    domain: "example.ru".to_string(),
                    position: Some(7),
                    error: None,
                })
                .collect(),
        })
    }

    async fn health_check(
        &self,
        _device: Option<DeviceClass>,
        limit: u32,
    ) -> FarmResult<HealthOutcome> {
        self.record("health_check")?;
        Ok(HealthOutcome {
            checked_profiles: limit.min(4),
            corrupted_profiles: 0,
        })
    }

    async fn maintain_pool(&self) -> FarmResult<PoolOutcome> {
        self.record("maintain_pool")?;
        Ok(PoolOutcome {
            desktop_profiles: 6,
            mobile_profiles: 4,
        })
    }

    async fn nurture_profile(
        &self,
        profile_id: Uuid,
        target_cookies: Option<u32>,
    ) -> FarmResult<NurtureOutcome> {
        self.record("nurture_profile")?;
        Ok(NurtureOutcome {
            profile_id,
            cookies_collected: target_cookies.unwrap_or(20),
        })
    }
}
