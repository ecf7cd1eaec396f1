//! 结果事件循环
//!
//! 终态转换事件的唯一消费端：失败事件交给重试调度，成功事件交给
//! 级联调度。两个调度器都不回写原任务，只追加新任务。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use serpfarm_domain::events::TaskOutcome;

use crate::cascade_scheduler::CascadeScheduler;
use crate::retry_scheduler::RetryScheduler;

pub async fn run_outcome_loop(
    mut outcome_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    retry: Arc<RetryScheduler>,
    cascade: Arc<CascadeScheduler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            outcome = outcome_rx.recv() => {
                match outcome {
                    Some(TaskOutcome::Failed { task, fatal }) => {
                        if let Err(e) = retry.handle_failed_task(&task, fatal).await {
                            error!("重试调度处理任务 {} 失败: {e}", task.id);
                        }
                    }
                    Some(TaskOutcome::Completed { task }) => {
                        cascade.handle_completed_task(&task).await;
                    }
                    None => {
                        info!("结果事件通道已关闭");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("结果事件循环收到关闭信号");
                break;
            }
        }
    }
}
