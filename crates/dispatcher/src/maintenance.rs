use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};

use serpfarm_core::config::DispatcherConfig;
use serpfarm_core::FarmResult;
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::task::{Task, TaskPriority, TaskType};
use serpfarm_domain::repositories::TaskRepository;

/// 维护任务调度
///
/// 低频循环补充两类后台任务：profile池维护（maintain_pool）和按
/// 设备类型的健康检查（health_check）。两者都带去重检查：最近一个
/// 同类任务创建时间在窗口内就不再追加，避免无限堆积。
pub struct MaintenanceScheduler {
    task_repo: Arc<dyn TaskRepository>,
    config: DispatcherConfig,
}

impl MaintenanceScheduler {
    /// 健康检查按这些设备类型分别排期
    const HEALTH_CHECK_DEVICES: [DeviceClass; 2] = [DeviceClass::Desktop, DeviceClass::Mobile];

    pub fn new(task_repo: Arc<dyn TaskRepository>, config: DispatcherConfig) -> Self {
        Self { task_repo, config }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = interval(Duration::from_secs(self.config.maintenance_interval_seconds));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.schedule_once().await {
                        error!("维护任务调度失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("维护调度循环收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 执行一轮补充检查
    pub async fn schedule_once(&self) -> FarmResult<()> {
        self.ensure_maintain_pool_task().await?;
        self.ensure_health_check_tasks().await?;
        Ok(())
    }

    async fn ensure_maintain_pool_task(&self) -> FarmResult<()> {
        let last = self.task_repo.latest_of_type(&TaskType::MaintainPool).await?;
        let should_create = match last {
            Some(task) => {
                (Utc::now() - task.created_at).num_seconds()
                    > self.config.maintain_pool_debounce_seconds
            }
            None => true,
        };

        if should_create {
            let task = Task::new(
                TaskType::MaintainPool,
                TaskPriority::NORMAL,
                serde_json::json!({}),
            );
            let created = self.task_repo.create(&task).await?;
            info!("已排期池维护任务: {}", created.id);
        }
        Ok(())
    }

    async fn ensure_health_check_tasks(&self) -> FarmResult<()> {
        for device in Self::HEALTH_CHECK_DEVICES {
            let last = self.task_repo.latest_health_check(device).await?;
            let should_create = match last {
                Some(task) => {
                    (Utc::now() - task.created_at).num_seconds()
                        > self.config.health_check_debounce_seconds
                }
                None => true,
            };

            if should_create {
                let task = Task::new(
                    TaskType::HealthCheck,
                    3,
                    serde_json::json!({"device_type": device.as_str()}),
                );
                let created = self.task_repo.create(&task).await?;
                info!("已排期健康检查任务: {} ({})", created.id, device);
            }
        }
        Ok(())
    }
}
