//! 任务分发
//!
//! 主循环按固定间隔轮询：在执行槽位未满时从任务存储认领优先级最高
//! 的 pending 任务，放入独立的执行单元。认领是跨并发认领者唯一要求
//! 无竞态的操作，由存储层的"跳过已锁定行"条件更新保证。执行包装器
//! 负责调试会话挂接、终态转换和结果事件的发出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use serpfarm_core::config::DispatcherConfig;
use serpfarm_core::FarmResult;
use serpfarm_domain::events::TaskOutcome;
use serpfarm_domain::models::task::{Task, TaskStatus};
use serpfarm_domain::payload::{DebugFlags, TaskPayload};
use serpfarm_domain::repositories::TaskRepository;
use serpfarm_session::SessionManager;

use crate::executors::{ExecutionContext, ExecutorRegistry};

pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    registry: Arc<ExecutorRegistry>,
    sessions: Arc<SessionManager>,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    worker_id: String,
    config: DispatcherConfig,
    running: Mutex<HashMap<Uuid, tokio::task::JoinHandle<()>>>,
    active_count: Arc<AtomicUsize>,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        registry: Arc<ExecutorRegistry>,
        sessions: Arc<SessionManager>,
        outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
        worker_id: String,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            task_repo,
            registry,
            sessions,
            outcome_tx,
            worker_id,
            config,
            running: Mutex::new(HashMap::new()),
            active_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 当前占用的执行槽位数，心跳上报用
    pub fn active_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.active_count)
    }

    /// 主分发循环
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "任务分发循环启动: worker={} max_concurrent={}",
            self.worker_id, self.config.max_concurrent_tasks
        );

        let mut poll = interval(Duration::from_secs(self.config.poll_interval_seconds));
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("分发循环出错: {e}");
                        sleep(Duration::from_secs(self.config.error_backoff_seconds)).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("任务分发循环收到关闭信号");
                    break;
                }
            }
        }

        self.drain().await;
        info!("任务分发循环已停止");
    }

    /// 认领一个任务（若有空闲槽位）并异步执行，返回是否认领到
    pub async fn poll_once(self: &Arc<Self>) -> FarmResult<bool> {
        // 清掉已经结束的执行单元
        self.running.lock().unwrap().retain(|_, h| !h.is_finished());

        let active = self.active_count.load(Ordering::SeqCst);
        if active >= self.config.max_concurrent_tasks {
            debug!("执行槽位已满 ({active})，本轮跳过认领");
            return Ok(false);
        }

        let Some(task) = self.task_repo.claim_next(&self.worker_id).await? else {
            return Ok(false);
        };

        info!(
            "认领任务: {} (类型 {}, 优先级 {}, 活跃 {})",
            task.id,
            task.task_type,
            task.priority,
            active + 1
        );

        let task_id = task.id;
        let dispatcher = Arc::clone(self);
        self.active_count.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            dispatcher.clone().execute_task(task).await;
            dispatcher.running.lock().unwrap().remove(&task_id);
            dispatcher.active_count.fetch_sub(1, Ordering::SeqCst);
        });
        self.running.lock().unwrap().insert(task_id, handle);
        Ok(true)
    }

    /// 等待所有在执行的任务自然结束
    pub async fn drain(&self) {
        let handles: Vec<_> = {
            let mut running = self.running.lock().unwrap();
            running.drain().collect()
        };
        if handles.is_empty() {
            return;
        }
        info!("等待 {} 个执行中的任务结束", handles.len());
        for (task_id, handle) in handles {
            if let Err(e) = handle.await {
                error!("等待任务 {task_id} 结束时出错: {e}");
            }
        }
    }

    /// 执行包装器
    ///
    /// 调试会话挂接失败只终结本次调试尝试，不污染任务自身的
    /// 执行与重试语义。
    async fn execute_task(self: Arc<Self>, mut task: Task) {
        let debug_flags = DebugFlags::from_parameters(&task.parameters);
        if debug_flags.debug_enabled {
            match self
                .sessions
                .create_session(task.id, debug_flags.device_class())
                .await
            {
                Ok(info) => {
                    info!(
                        "调试会话已挂接: task={} vnc={} ({})",
                        task.id,
                        info.vnc_url,
                        info.connection_command()
                    );
                }
                Err(e) => {
                    error!("任务 {} 的调试会话挂接失败，降级为普通执行: {e}", task.id);
                }
            }
        }

        match self.run_executor(&task).await {
            Ok(result) => {
                if let Err(e) = self.task_repo.complete(task.id, &result).await {
                    error!("任务 {} 的完成转换失败: {e}", task.id);
                    return;
                }
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.completed_at = Some(Utc::now());
                counter!("farm_tasks_completed_total").increment(1);
                info!("任务执行成功: {}", task.id);

                if self
                    .outcome_tx
                    .send(TaskOutcome::Completed { task })
                    .is_err()
                {
                    warn!("结果事件通道已关闭，级联调度不会运行");
                }
            }
            Err(e) => {
                let fatal = e.is_fatal();
                let message = e.to_string();
                if let Err(te) = self.task_repo.fail(task.id, &message).await {
                    error!("任务 {} 的失败转换失败: {te}", task.id);
                    return;
                }
                task.status = TaskStatus::Failed;
                task.error_message = Some(message.clone());
                task.completed_at = Some(Utc::now());
                counter!("farm_tasks_failed_total").increment(1);
                counter!("farm_dispatch_failures_total").increment(1);
                error!("任务执行失败: {} - {message}", task.id);

                if self
                    .outcome_tx
                    .send(TaskOutcome::Failed { task, fatal })
                    .is_err()
                {
                    warn!("结果事件通道已关闭，重试调度不会运行");
                }
            }
        }
    }

    async fn run_executor(&self, task: &Task) -> FarmResult<serde_json::Value> {
        let payload = TaskPayload::decode(&task.task_type, &task.parameters)?;
        let executor = self.registry.get(&task.task_type).ok_or_else(|| {
            serpfarm_core::FarmError::invalid_params(format!(
                "没有注册 {} 类型的执行器",
                task.task_type
            ))
        })?;
        let ctx = ExecutionContext {
            task: task.clone(),
            payload,
            worker_id: self.worker_id.clone(),
        };
        executor.execute(&ctx).await
    }
}
