use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::DeviceClass;

/// Worker节点
///
/// 节点在启动时自注册（按 node_id 幂等upsert），之后周期性刷新心跳。
/// 心跳只是参考性遥测：本核心不会因心跳过期而驱逐节点或回收其任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub node_id: String,
    pub hostname: String,
    /// 申报的最大并发认领数
    pub max_concurrent_tasks: i32,
    pub current_task_count: i32,
    pub device_classes: Vec<DeviceClass>,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "offline")]
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(WorkerStatus::Online),
            "offline" => Some(WorkerStatus::Offline),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for WorkerStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WorkerStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        WorkerStatus::parse(s).ok_or_else(|| format!("Invalid worker status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for WorkerStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl WorkerNode {
    pub fn new(
        node_id: String,
        hostname: String,
        max_concurrent_tasks: i32,
        device_classes: Vec<DeviceClass>,
    ) -> Self {
        let now = Utc::now();
        Self {
            node_id,
            hostname,
            max_concurrent_tasks,
            current_task_count: 0,
            device_classes,
            status: WorkerStatus::Online,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self.status, WorkerStatus::Online)
    }

    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}
