use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务定义
///
/// 浏览器农场中一次可调度的工作单元。`parameters` 是开放的JSON负载，
/// 由执行器在分发边界解码为强类型的 [`crate::payload::TaskPayload`]。
///
/// 不变量：
/// - 同一任务同时最多被一个Worker置为 `running`；
/// - `started_at` 仅在 running/completed/failed 状态下非空；
/// - `result` / `error_message` 只在终态转换时写入一次；
/// - 任务由本核心创建与流转，但从不删除（归档属于外部职责）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub parameters: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 任务类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskType {
    #[serde(rename = "warmup_profile")]
    WarmupProfile,
    #[serde(rename = "parse_serp")]
    ParseSerp,
    #[serde(rename = "check_positions")]
    CheckPositions,
    #[serde(rename = "health_check")]
    HealthCheck,
    #[serde(rename = "maintain_pool")]
    MaintainPool,
    #[serde(rename = "profile_nurture")]
    ProfileNurture,
    /// 未知类型，向前兼容
    #[serde(untagged)]
    Other(String),
}

impl TaskType {
    pub fn as_str(&self) -> &str {
        match self {
            TaskType::WarmupProfile => "warmup_profile",
            TaskType::ParseSerp => "parse_serp",
            TaskType::CheckPositions => "check_positions",
            TaskType::HealthCheck => "health_check",
            TaskType::MaintainPool => "maintain_pool",
            TaskType::ProfileNurture => "profile_nurture",
            TaskType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "warmup_profile" => TaskType::WarmupProfile,
            "parse_serp" => TaskType::ParseSerp,
            "check_positions" => TaskType::CheckPositions,
            "health_check" => TaskType::HealthCheck,
            "maintain_pool" => TaskType::MaintainPool,
            "profile_nurture" => TaskType::ProfileNurture,
            other => TaskType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(TaskType::parse(s))
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务状态
///
/// 取消没有独立状态：它是带固定错误消息的 `Failed` 终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        TaskStatus::parse(s).ok_or_else(|| format!("Invalid task status: {s}").into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 任务优先级
///
/// 数值越大越先被认领。
pub struct TaskPriority;

impl TaskPriority {
    pub const LOW: i32 = 1;
    pub const NORMAL: i32 = 5;
    pub const HIGH: i32 = 10;
    pub const URGENT: i32 = 15;
    pub const CRITICAL: i32 = 20;

    pub fn is_valid(value: i32) -> bool {
        (0..=20).contains(&value)
    }
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Task {
    /// 创建一个待认领的新任务
    pub fn new(task_type: TaskType, priority: i32, parameters: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type,
            status: TaskStatus::Pending,
            priority,
            parameters,
            result: None,
            error_message: None,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 允许挂接调试会话的状态
    pub fn can_be_debugged(&self) -> bool {
        matches!(
            self.status,
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Failed
        )
    }

    pub fn entity_description(&self) -> String {
        format!("任务 {} (类型: {})", self.id, self.task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_roundtrip() {
        assert_eq!(TaskType::parse("parse_serp"), TaskType::ParseSerp);
        assert_eq!(TaskType::ParseSerp.as_str(), "parse_serp");
        assert_eq!(
            TaskType::parse("future_type"),
            TaskType::Other("future_type".to_string())
        );
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new(TaskType::MaintainPool, TaskPriority::NORMAL, serde_json::json!({}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
        assert!(task.worker_id.is_none());
        assert!(task.can_be_debugged());
    }

    #[test]
    fn test_completed_task_cannot_be_debugged() {
        let mut task = Task::new(TaskType::ParseSerp, TaskPriority::NORMAL, serde_json::json!({}));
        task.status = TaskStatus::Completed;
        assert!(!task.can_be_debugged());
        assert!(task.is_terminal());
    }
}
