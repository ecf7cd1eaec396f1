use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use serpfarm_core::{FarmError, FarmResult};

use crate::models::session::DeviceClass;
use crate::models::task::TaskType;

/// 任务负载
///
/// `parameters` 的封闭和类型：每种任务类型一个强类型变体，在分发边界
/// 解码一次。未知类型落入 `Unknown`，保持向前兼容。
/// 重试计数和调试标记与负载并存在同一个JSON对象里，由下面的辅助
/// 函数单独读写，解码负载时原样忽略。
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    WarmupProfile(WarmupProfilePayload),
    ParseSerp(ParseSerpPayload),
    CheckPositions(CheckPositionsPayload),
    HealthCheck(HealthCheckPayload),
    MaintainPool,
    ProfileNurture(ProfileNurturePayload),
    Unknown(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WarmupProfilePayload {
    /// 为空时表示创建并预热一个新profile
    #[serde(default)]
    pub profile_id: Option<Uuid>,
    #[serde(default = "default_device")]
    pub device_type: DeviceClass,
    /// 任务消费profile后自动补热产生的级联任务带此标记
    #[serde(default)]
    pub cascade_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParseSerpPayload {
    pub keyword: String,
    #[serde(default = "default_device")]
    pub device_type: DeviceClass,
    #[serde(default = "default_pages")]
    pub pages: u32,
    #[serde(default = "default_region")]
    pub region_code: String,
    #[serde(default)]
    pub profile_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub cascade_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckPositionsPayload {
    pub keyword_ids: Vec<Uuid>,
    #[serde(default = "default_device")]
    pub device_type: DeviceClass,
    #[serde(default = "default_true")]
    pub cascade_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheckPayload {
    #[serde(default)]
    pub device_type: Option<DeviceClass>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileNurturePayload {
    pub profile_id: Uuid,
    #[serde(default)]
    pub target_cookies: Option<u32>,
}

fn default_device() -> DeviceClass {
    DeviceClass::Desktop
}

fn default_pages() -> u32 {
    10
}

fn default_region() -> String {
    "213".to_string()
}

fn default_true() -> bool {
    true
}

impl TaskPayload {
    /// 在分发边界解码任务参数
    pub fn decode(task_type: &TaskType, parameters: &Value) -> FarmResult<Self> {
        let decoded = match task_type {
            TaskType::WarmupProfile => TaskPayload::WarmupProfile(
                serde_json::from_value(parameters.clone())
                    .map_err(|e| FarmError::invalid_params(format!("warmup_profile: {e}")))?,
            ),
            TaskType::ParseSerp => TaskPayload::ParseSerp(
                serde_json::from_value(parameters.clone())
                    .map_err(|e| FarmError::invalid_params(format!("parse_serp: {e}")))?,
            ),
            TaskType::CheckPositions => TaskPayload::CheckPositions(
                serde_json::from_value(parameters.clone())
                    .map_err(|e| FarmError::invalid_params(format!("check_positions: {e}")))?,
            ),
            TaskType::HealthCheck => TaskPayload::HealthCheck(
                serde_json::from_value(parameters.clone())
                    .map_err(|e| FarmError::invalid_params(format!("health_check: {e}")))?,
            ),
            TaskType::MaintainPool => TaskPayload::MaintainPool,
            TaskType::ProfileNurture => TaskPayload::ProfileNurture(
                serde_json::from_value(parameters.clone())
                    .map_err(|e| FarmError::invalid_params(format!("profile_nurture: {e}")))?,
            ),
            TaskType::Other(_) => TaskPayload::Unknown(parameters.clone()),
        };
        Ok(decoded)
    }
}

/// 读取参数中的重试计数，缺省为0
pub fn retry_count(parameters: &Value) -> u32 {
    parameters
        .get("retry_count")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32
}

/// 返回带有递增后重试计数的参数副本
pub fn with_retry_count(parameters: &Value, count: u32) -> Value {
    let mut params = match parameters {
        Value::Object(map) => Value::Object(map.clone()),
        _ => serde_json::json!({}),
    };
    params["retry_count"] = serde_json::json!(count);
    params
}

/// 调试标记
///
/// 挂在任务 `parameters` 上的调试会话控制与审计字段。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebugFlags {
    #[serde(default)]
    pub debug_enabled: bool,
    #[serde(default)]
    pub debug_device_type: Option<DeviceClass>,
    #[serde(default)]
    pub debug_started_by: Option<String>,
    #[serde(default)]
    pub debug_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub debug_stopped_by: Option<String>,
    #[serde(default)]
    pub debug_stopped_at: Option<DateTime<Utc>>,
}

impl DebugFlags {
    pub fn from_parameters(parameters: &Value) -> Self {
        serde_json::from_value(parameters.clone()).unwrap_or_default()
    }

    pub fn device_class(&self) -> DeviceClass {
        self.debug_device_type.unwrap_or(DeviceClass::Desktop)
    }

    /// 打开调试标记并记录审计信息
    pub fn enable(parameters: &mut Value, device: DeviceClass, started_by: &str) {
        ensure_object(parameters);
        parameters["debug_enabled"] = serde_json::json!(true);
        parameters["debug_device_type"] = serde_json::json!(device.as_str());
        parameters["debug_started_by"] = serde_json::json!(started_by);
        parameters["debug_started_at"] = serde_json::json!(Utc::now());
    }

    /// 清除调试标记并记录审计信息
    pub fn disable(parameters: &mut Value, stopped_by: &str) {
        ensure_object(parameters);
        parameters["debug_enabled"] = serde_json::json!(false);
        parameters["debug_stopped_by"] = serde_json::json!(stopped_by);
        parameters["debug_stopped_at"] = serde_json::json!(Utc::now());
    }
}

fn ensure_object(parameters: &mut Value) {
    if !parameters.is_object() {
        *parameters = serde_json::json!({});
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_parse_serp_defaults() {
        let params = serde_json::json!({"keyword": "купить слона"});
        let payload = TaskPayload::decode(&TaskType::ParseSerp, &params).unwrap();
        match payload {
            TaskPayload::ParseSerp(p) => {
                assert_eq!(p.keyword, "купить слона");
                assert_eq!(p.device_type, DeviceClass::Desktop);
                assert_eq!(p.pages, 10);
                assert_eq!(p.region_code, "213");
                assert!(p.cascade_enabled);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_missing_keyword() {
        let params = serde_json::json!({"pages": 3});
        let err = TaskPayload::decode(&TaskType::ParseSerp, &params).unwrap_err();
        assert!(matches!(err, FarmError::InvalidTaskParams(_)));
    }

    #[test]
    fn test_decode_ignores_retry_and_debug_fields() {
        let params = serde_json::json!({
            "keyword": "тест",
            "retry_count": 2,
            "debug_enabled": true,
            "debug_device_type": "mobile"
        });
        let payload = TaskPayload::decode(&TaskType::ParseSerp, &params).unwrap();
        assert!(matches!(payload, TaskPayload::ParseSerp(_)));
        assert_eq!(retry_count(&params), 2);

        let flags = DebugFlags::from_parameters(&params);
        assert!(flags.debug_enabled);
        assert_eq!(flags.device_class(), DeviceClass::Mobile);
    }

    #[test]
    fn test_unknown_task_type_falls_back() {
        let params = serde_json::json!({"anything": 1});
        let payload =
            TaskPayload::decode(&TaskType::Other("future".to_string()), &params).unwrap();
        assert!(matches!(payload, TaskPayload::Unknown(_)));
    }

    #[test]
    fn test_retry_count_roundtrip() {
        let params = serde_json::json!({"keyword": "x"});
        assert_eq!(retry_count(&params), 0);
        let bumped = with_retry_count(&params, 1);
        assert_eq!(retry_count(&bumped), 1);
        // 原负载字段保持不变
        assert_eq!(bumped["keyword"], "x");
    }

    #[test]
    fn test_debug_flags_enable_disable() {
        let mut params = serde_json::json!({"keyword": "x"});
        DebugFlags::enable(&mut params, DeviceClass::Tablet, "admin-1");
        let flags = DebugFlags::from_parameters(&params);
        assert!(flags.debug_enabled);
        assert_eq!(flags.device_class(), DeviceClass::Tablet);
        assert_eq!(flags.debug_started_by.as_deref(), Some("admin-1"));
        assert!(flags.debug_started_at.is_some());

        DebugFlags::disable(&mut params, "admin-2");
        let flags = DebugFlags::from_parameters(&params);
        assert!(!flags.debug_enabled);
        assert_eq!(flags.debug_stopped_by.as_deref(), Some("admin-2"));
        assert!(flags.debug_stopped_at.is_some());
    }
}
