use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use serpfarm_core::{AppConfig, SystemClock};
use serpfarm_dispatcher::{
    run_outcome_loop, CascadeScheduler, CommandAutomation, ExecutorRegistry, MaintenanceScheduler,
    RetryConfig, RetryScheduler, TaskDispatcher, WorkerRegistry,
};
use serpfarm_domain::repositories::{TaskRepository, WorkerRepository};
use serpfarm_infrastructure::{
    observability, DatabaseManager, InMemoryTaskRepository, InMemoryWorkerRepository,
    PostgresTaskRepository, PostgresWorkerRepository,
};
use serpfarm_session::{CleanupReaper, SessionManager, XvfbSupervisor};

use crate::shutdown::ShutdownManager;

/// 任务存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// 生产模式：Postgres
    Postgres,
    /// 嵌入式/演示模式：进程内存储
    Memory,
}

/// 主应用程序
///
/// 显式构造的服务注册表：仓储、会话管理器、回收服务在这里创建一次，
/// 之后按引用传给分发循环、运维命令和清理循环。
pub struct Application {
    pub config: AppConfig,
    pub task_repo: Arc<dyn TaskRepository>,
    pub worker_repo: Arc<dyn WorkerRepository>,
    pub sessions: Arc<SessionManager>,
    reaper: Mutex<CleanupReaper>,
}

impl Application {
    pub async fn new(config: AppConfig, backend: StoreBackend) -> Result<Self> {
        info!("初始化应用程序，存储后端: {:?}", backend);

        let (task_repo, worker_repo): (Arc<dyn TaskRepository>, Arc<dyn WorkerRepository>) =
            match backend {
                StoreBackend::Postgres => {
                    let database = DatabaseManager::new(&config.database)
                        .await
                        .context("连接任务存储失败")?;
                    database.migrate().await.context("数据库迁移失败")?;
                    let pool = database.pool();
                    (
                        Arc::new(PostgresTaskRepository::new(pool.clone())),
                        Arc::new(PostgresWorkerRepository::new(pool)),
                    )
                }
                StoreBackend::Memory => (
                    Arc::new(InMemoryTaskRepository::new()),
                    Arc::new(InMemoryWorkerRepository::new()),
                ),
            };

        let clock = Arc::new(SystemClock);
        let supervisor = Arc::new(XvfbSupervisor::new(&config.session));
        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            supervisor,
            clock.clone(),
        ));
        let reaper = Mutex::new(CleanupReaper::new(
            sessions.clone(),
            clock,
            config.session.clone(),
        ));

        Ok(Self {
            config,
            task_repo,
            worker_repo,
            sessions,
            reaper,
        })
    }

    /// 回收所有调试会话（运维批量清理、优雅关闭）
    pub async fn cleanup_all_sessions(&self, reason: &str) -> usize {
        self.reaper.lock().await.cleanup_all(reason).await
    }

    /// 运行Worker进程：分发、心跳、维护、回收四个循环并发运行
    pub async fn run_worker(&self, shutdown: &ShutdownManager) -> Result<()> {
        if !self.config.dispatcher.enabled {
            anyhow::bail!("Dispatcher被禁用，请检查配置");
        }
        if self.config.observability.metrics_enabled {
            observability::init_metrics(&self.config.observability.metrics_bind_address)
                .context("初始化指标导出失败")?;
        }

        let automation = Arc::new(CommandAutomation::new(&self.config.executor));
        let registry = Arc::new(ExecutorRegistry::with_automation(automation));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(TaskDispatcher::new(
            self.task_repo.clone(),
            registry,
            self.sessions.clone(),
            outcome_tx,
            self.config.worker.worker_id.clone(),
            self.config.dispatcher.clone(),
        ));

        let worker_registry = Arc::new(WorkerRegistry::new(
            self.worker_repo.clone(),
            &self.config.worker,
            self.config.dispatcher.max_concurrent_tasks,
            dispatcher.active_counter(),
        ));
        worker_registry.register().await.context("Worker注册失败")?;

        let retry = Arc::new(RetryScheduler::new(
            self.task_repo.clone(),
            RetryConfig::from_dispatcher(&self.config.dispatcher),
        ));
        let cascade = Arc::new(CascadeScheduler::new(self.task_repo.clone()));
        let maintenance = Arc::new(MaintenanceScheduler::new(
            self.task_repo.clone(),
            self.config.dispatcher.clone(),
        ));

        self.reaper.lock().await.start().await?;

        let mut handles = Vec::new();
        handles.push(tokio::spawn(
            dispatcher.clone().run(shutdown.subscribe().await),
        ));
        handles.push(tokio::spawn(
            worker_registry.run_heartbeat(shutdown.subscribe().await),
        ));
        handles.push(tokio::spawn(maintenance.run(shutdown.subscribe().await)));
        handles.push(tokio::spawn(run_outcome_loop(
            outcome_rx,
            retry,
            cascade,
            shutdown.subscribe().await,
        )));

        info!("Worker进程已启动: {}", self.config.worker.worker_id);

        for handle in handles {
            if let Err(e) = handle.await {
                error!("组件退出异常: {e}");
            }
        }

        // 所有循环退出后：回收全部调试会话再停掉回收服务
        let stopped = self.cleanup_all_sessions("shutdown").await;
        if stopped > 0 {
            info!("关闭时回收了 {stopped} 个调试会话");
        }
        self.reaper.lock().await.stop().await;

        Ok(())
    }
}
