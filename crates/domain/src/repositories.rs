//! 仓储抽象
//!
//! 数据访问的抽象接口。任务存储支持行级"认领"语义：并发认领者之间
//! 跳过已被他人锁定的行，避免惊群竞争。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use serpfarm_core::FarmResult;

use crate::models::session::DeviceClass;
use crate::models::task::{Task, TaskFilter, TaskType};
use crate::models::worker::WorkerNode;

/// 任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> FarmResult<Task>;
    async fn get_by_id(&self, id: Uuid) -> FarmResult<Option<Task>>;
    async fn list(&self, filter: &TaskFilter) -> FarmResult<Vec<Task>>;

    /// 认领下一个待执行任务
    ///
    /// 在 pending 任务中选优先级最高者（同优先级按 created_at FIFO），
    /// 原子地置为 running 并记录 started_at 与认领的 worker_id。
    /// 并发认领者之间对同一行最多只有一个成功。
    async fn claim_next(&self, worker_id: &str) -> FarmResult<Option<Task>>;

    /// 成功终态转换（running -> completed），result 只写入这一次
    async fn complete(&self, id: Uuid, result: &Value) -> FarmResult<()>;

    /// 失败终态转换（running -> failed），error_message 只写入这一次
    async fn fail(&self, id: Uuid, error_message: &str) -> FarmResult<()>;

    /// 覆盖任务参数（调试标记、审计字段）
    async fn update_parameters(&self, id: Uuid, parameters: &Value) -> FarmResult<()>;

    /// 重置任务到待执行状态，清空执行痕迹（restart-debug 用）
    async fn reset_to_pending(&self, id: Uuid) -> FarmResult<()>;

    /// 某类型最近创建的任务（维护任务去重用）
    async fn latest_of_type(&self, task_type: &TaskType) -> FarmResult<Option<Task>>;

    /// 某设备类型最近创建的 health_check 任务
    async fn latest_health_check(&self, device: DeviceClass) -> FarmResult<Option<Task>>;
}

/// Worker仓储抽象
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    /// 幂等注册（按 node_id upsert）
    async fn register(&self, worker: &WorkerNode) -> FarmResult<()>;

    /// 刷新心跳并上报当前任务数
    async fn heartbeat(
        &self,
        node_id: &str,
        current_task_count: i32,
        at: DateTime<Utc>,
    ) -> FarmResult<()>;

    async fn get_by_id(&self, node_id: &str) -> FarmResult<Option<WorkerNode>>;
    async fn list(&self) -> FarmResult<Vec<WorkerNode>>;
}
