use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};

use serpfarm_core::config::{DispatcherConfig, SessionConfig};
use serpfarm_core::ManualClock;
use serpfarm_domain::models::task::{Task, TaskStatus, TaskType};
use serpfarm_domain::payload;
use serpfarm_domain::repositories::TaskRepository;
use serpfarm_dispatcher::test_support::StubAutomation;
use serpfarm_dispatcher::{
    run_outcome_loop, CascadeScheduler, ExecutorRegistry, RetryConfig, RetryScheduler,
    TaskDispatcher,
};
use serpfarm_infrastructure::InMemoryTaskRepository;
use serpfarm_session::testing::FakeProcessSupervisor;
use serpfarm_session::SessionManager;

/// 失败任务经过结果事件循环后，重试调度补出降级优先级的新任务
#[tokio::test]
async fn test_failure_flows_into_retry_chain() {
    let repo = InMemoryTaskRepository::new();
    let automation = Arc::new(StubAutomation::new());
    automation.fail_with("network hiccup");

    let sessions = Arc::new(SessionManager::new(
        SessionConfig {
            max_sessions: 5,
            display_base: 100,
            display_range: 10,
            port_base: 5900,
            host: "127.0.0.1".to_string(),
            inactivity_timeout_seconds: 3600,
            max_lifetime_seconds: 7200,
            cleanup_interval_seconds: 300,
            settle_delay_ms: 0,
            terminate_grace_seconds: 5,
            log_dir: "/tmp/serpfarm-vnc-test".to_string(),
        },
        Arc::new(FakeProcessSupervisor::new()),
        Arc::new(ManualClock::new(Utc::now())),
    ));

    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::new(repo.clone()),
        Arc::new(ExecutorRegistry::with_automation(automation.clone())),
        sessions,
        outcome_tx,
        "worker-test".to_string(),
        DispatcherConfig {
            enabled: true,
            poll_interval_seconds: 1,
            max_concurrent_tasks: 2,
            error_backoff_seconds: 1,
            max_retries: 3,
            maintenance_interval_seconds: 300,
            maintain_pool_debounce_seconds: 1800,
            health_check_debounce_seconds: 3600,
        },
    ));

    let retry = Arc::new(RetryScheduler::new(
        Arc::new(repo.clone()),
        RetryConfig::default(),
    ));
    let cascade = Arc::new(CascadeScheduler::new(Arc::new(repo.clone())));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(run_outcome_loop(outcome_rx, retry, cascade, shutdown_rx));

    let original = repo
        .create(&Task::new(
            TaskType::ParseSerp,
            5,
            json!({"keyword": "retry me"}),
        ))
        .await
        .unwrap();

    assert!(dispatcher.poll_once().await.unwrap());
    dispatcher.drain().await;

    // 给事件循环一点处理时间
    tokio::time::sleep(Duration::from_millis(100)).await;

    let failed = repo.get_by_id(original.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    let retry_task = repo
        .all_tasks()
        .into_iter()
        .find(|t| t.id != original.id)
        .expect("retry task must exist");
    assert_eq!(retry_task.status, TaskStatus::Pending);
    assert_eq!(retry_task.priority, 4);
    assert_eq!(payload::retry_count(&retry_task.parameters), 1);

    shutdown_tx.send(()).unwrap();
    loop_handle.await.unwrap();
}
