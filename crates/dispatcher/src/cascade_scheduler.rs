use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::task::{Task, TaskPriority, TaskType};
use serpfarm_domain::repositories::TaskRepository;

/// 级联调度
///
/// 消费过可复用profile的任务成功完成后，追加一个低优先级的暖场
/// 任务把该profile重新养好。创建是尽力而为的：失败只记日志，
/// 绝不影响原任务已经落盘的成功终态。
pub struct CascadeScheduler {
    task_repo: Arc<dyn TaskRepository>,
}

impl CascadeScheduler {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { task_repo }
    }

    pub async fn handle_completed_task(&self, task: &Task) {
        if !matches!(
            task.task_type,
            TaskType::ParseSerp | TaskType::CheckPositions
        ) {
            return;
        }

        let cascade_enabled = task
            .parameters
            .get("cascade_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !cascade_enabled {
            debug!("任务 {} 关闭了级联，跳过", task.id);
            return;
        }

        let Some(profile_id) = Self::consumed_profile(task) else {
            debug!("任务 {} 的结果里没有profile，跳过级联", task.id);
            return;
        };

        let device_type = task
            .parameters
            .get("device_type")
            .and_then(Value::as_str)
            .and_then(DeviceClass::parse)
            .unwrap_or(DeviceClass::Desktop);

        let cascade_task = Task::new(
            TaskType::WarmupProfile,
            TaskPriority::LOW,
            serde_json::json!({
                "profile_id": profile_id,
                "device_type": device_type.as_str(),
                "cascade_mode": true,
            }),
        );

        match self.task_repo.create(&cascade_task).await {
            Ok(created) => {
                info!(
                    "为任务 {} 消费的profile {} 创建级联暖场任务 {}",
                    task.id, profile_id, created.id
                );
            }
            Err(e) => {
                error!("为任务 {} 创建级联任务失败: {e}", task.id);
            }
        }
    }

    fn consumed_profile(task: &Task) -> Option<Uuid> {
        task.result
            .as_ref()?
            .get("profile_id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}
