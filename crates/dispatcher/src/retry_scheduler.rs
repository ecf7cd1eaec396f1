use std::sync::Arc;

use tracing::{debug, error, info};

use serpfarm_core::config::DispatcherConfig;
use serpfarm_core::FarmResult;
use serpfarm_domain::models::task::{Task, TaskType};
use serpfarm_domain::payload;
use serpfarm_domain::repositories::TaskRepository;

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 允许重试的任务类型
    pub retryable_types: Vec<TaskType>,
    /// 重试任务优先级每次降一档，不低于这个下限
    pub priority_floor: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retryable_types: vec![
                TaskType::WarmupProfile,
                TaskType::ParseSerp,
                TaskType::CheckPositions,
                TaskType::ProfileNurture,
            ],
            priority_floor: 0,
        }
    }
}

impl RetryConfig {
    pub fn from_dispatcher(config: &DispatcherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ..Default::default()
        }
    }
}

/// 重试调度
///
/// 失败的任务不做原地复活：满足条件时追加一个同负载的新任务，
/// 重试计数加一、优先级降一档。失败任务本身保持不变，重试链
/// 因此完整可审计。
pub struct RetryScheduler {
    task_repo: Arc<dyn TaskRepository>,
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: RetryConfig) -> Self {
        Self { task_repo, config }
    }

    /// 处理失败任务，返回是否追加了重试任务
    pub async fn handle_failed_task(&self, task: &Task, fatal: bool) -> FarmResult<bool> {
        if fatal {
            debug!("任务 {} 的失败是致命的，不重试", task.id);
            return Ok(false);
        }

        if !self.config.retryable_types.contains(&task.task_type) {
            debug!(
                "任务类型 {} 不在重试允许列表内，任务 {} 不重试",
                task.task_type, task.id
            );
            return Ok(false);
        }

        let count = payload::retry_count(&task.parameters);
        if count >= self.config.max_retries {
            info!(
                "任务 {} 已达到最大重试次数 {}，不再重试",
                task.id, self.config.max_retries
            );
            return Ok(false);
        }

        let retry_parameters = payload::with_retry_count(&task.parameters, count + 1);
        let priority = (task.priority - 1).max(self.config.priority_floor);
        let retry_task = Task::new(task.task_type.clone(), priority, retry_parameters);

        match self.task_repo.create(&retry_task).await {
            Ok(created) => {
                info!(
                    "为失败任务 {} 创建重试任务 {}，重试次数: {}，优先级: {}",
                    task.id,
                    created.id,
                    count + 1,
                    priority
                );
                Ok(true)
            }
            Err(e) => {
                error!("为失败任务 {} 创建重试任务失败: {e}", task.id);
                Err(e)
            }
        }
    }
}
