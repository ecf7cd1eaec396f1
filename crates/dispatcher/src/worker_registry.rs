use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{error, info};

use serpfarm_core::config::WorkerConfig;
use serpfarm_core::FarmResult;
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::worker::WorkerNode;
use serpfarm_domain::repositories::WorkerRepository;

/// Worker注册与心跳
///
/// 启动时自注册一次（幂等upsert），之后按固定间隔刷新心跳并上报
/// 当前执行中的任务数。心跳只是遥测：发送失败记日志后继续，
/// 不会让循环退出。
pub struct WorkerRegistry {
    worker_repo: Arc<dyn WorkerRepository>,
    node: WorkerNode,
    heartbeat_interval: Duration,
    active_tasks: Arc<AtomicUsize>,
}

impl WorkerRegistry {
    pub fn new(
        worker_repo: Arc<dyn WorkerRepository>,
        config: &WorkerConfig,
        max_concurrent_tasks: usize,
        active_tasks: Arc<AtomicUsize>,
    ) -> Self {
        let device_classes: Vec<DeviceClass> = config
            .device_classes
            .iter()
            .filter_map(|s| DeviceClass::parse(s))
            .collect();

        let node = WorkerNode::new(
            config.worker_id.clone(),
            config.hostname.clone(),
            max_concurrent_tasks as i32,
            device_classes,
        );

        Self {
            worker_repo,
            node,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            active_tasks,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.node.node_id
    }

    /// 启动时注册本节点
    pub async fn register(&self) -> FarmResult<()> {
        self.worker_repo.register(&self.node).await?;
        info!(
            "Worker节点已注册: {} (容量 {}, 设备类型 {:?})",
            self.node.node_id,
            self.node.max_concurrent_tasks,
            self.node
                .device_classes
                .iter()
                .map(|d| d.as_str())
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    /// 心跳循环
    pub async fn run_heartbeat(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut tick = interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let current = self.active_tasks.load(Ordering::SeqCst) as i32;
                    if let Err(e) = self
                        .worker_repo
                        .heartbeat(&self.node.node_id, current, Utc::now())
                        .await
                    {
                        error!("发送心跳失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("心跳循环收到关闭信号");
                    break;
                }
            }
        }
    }
}
