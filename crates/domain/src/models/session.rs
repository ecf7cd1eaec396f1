use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 设备类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    #[serde(rename = "desktop")]
    Desktop,
    #[serde(rename = "mobile")]
    Mobile,
    #[serde(rename = "tablet")]
    Tablet,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Tablet => "tablet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(DeviceClass::Desktop),
            "mobile" => Some(DeviceClass::Mobile),
            "tablet" => Some(DeviceClass::Tablet),
            _ => None,
        }
    }

    /// 调试会话的显示分辨率
    ///
    /// 固定查表而不是协商值：移动端调试画面反而需要更大的桌面。
    pub fn session_resolution(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "1920x1080",
            DeviceClass::Mobile => "1366x768",
            DeviceClass::Tablet => "1600x900",
        }
    }
}

impl std::fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话健康状态
///
/// active: 两个守护进程都存活；degraded: 恰好一个存活；inactive: 都不存活。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionHealth {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "degraded")]
    Degraded,
    #[serde(rename = "inactive")]
    Inactive,
}

impl SessionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionHealth::Active => "active",
            SessionHealth::Degraded => "degraded",
            SessionHealth::Inactive => "inactive",
        }
    }

    pub fn from_liveness(display_alive: bool, framebuffer_alive: bool) -> Self {
        match (display_alive, framebuffer_alive) {
            (true, true) => SessionHealth::Active,
            (false, false) => SessionHealth::Inactive,
            _ => SessionHealth::Degraded,
        }
    }
}

/// 会话回收原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReclaimReason {
    /// 超过不活跃超时
    Timeout,
    /// 超过绝对最大存活时间
    MaxDurationExceeded,
    /// 守护进程已死亡
    BrokenProcess,
    /// 调用方指定的原因（手动停止、shutdown等）
    Requested(String),
}

impl ReclaimReason {
    pub fn as_str(&self) -> &str {
        match self {
            ReclaimReason::Timeout => "timeout",
            ReclaimReason::MaxDurationExceeded => "max_duration_exceeded",
            ReclaimReason::BrokenProcess => "broken_process",
            ReclaimReason::Requested(reason) => reason.as_str(),
        }
    }
}

impl std::fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 返回给调用方的会话描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub task_id: Uuid,
    pub display_slot: u32,
    pub port: u16,
    pub host: String,
    pub resolution: String,
    pub device_class: DeviceClass,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionHealth,
    pub uptime_seconds: i64,
    /// 原始VNC查看器地址
    pub vnc_url: String,
    /// 反向隧道提示，供不在可信边界内的操作员使用
    pub tunnel_hint: String,
}

impl SessionInfo {
    pub fn connection_command(&self) -> String {
        format!("vncviewer {}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_class_parse() {
        assert_eq!(DeviceClass::parse("tablet"), Some(DeviceClass::Tablet));
        assert_eq!(DeviceClass::parse("watch"), None);
        assert_eq!(DeviceClass::Mobile.session_resolution(), "1366x768");
    }

    #[test]
    fn test_session_health_derivation() {
        assert_eq!(
            SessionHealth::from_liveness(true, true),
            SessionHealth::Active
        );
        assert_eq!(
            SessionHealth::from_liveness(true, false),
            SessionHealth::Degraded
        );
        assert_eq!(
            SessionHealth::from_liveness(false, true),
            SessionHealth::Degraded
        );
        assert_eq!(
            SessionHealth::from_liveness(false, false),
            SessionHealth::Inactive
        );
    }

    #[test]
    fn test_reclaim_reason_tags() {
        assert_eq!(ReclaimReason::Timeout.as_str(), "timeout");
        assert_eq!(
            ReclaimReason::MaxDurationExceeded.as_str(),
            "max_duration_exceeded"
        );
        assert_eq!(ReclaimReason::BrokenProcess.as_str(), "broken_process");
        assert_eq!(
            ReclaimReason::Requested("shutdown".to_string()).as_str(),
            "shutdown"
        );
    }
}
