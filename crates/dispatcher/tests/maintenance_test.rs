use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use serpfarm_core::config::DispatcherConfig;
use serpfarm_domain::models::task::{Task, TaskFilter, TaskType};
use serpfarm_domain::repositories::TaskRepository;
use serpfarm_dispatcher::MaintenanceScheduler;
use serpfarm_infrastructure::InMemoryTaskRepository;

fn config() -> DispatcherConfig {
    DispatcherConfig {
        enabled: true,
        poll_interval_seconds: 2,
        max_concurrent_tasks: 5,
        error_backoff_seconds: 5,
        max_retries: 3,
        maintenance_interval_seconds: 300,
        maintain_pool_debounce_seconds: 1800,
        health_check_debounce_seconds: 3600,
    }
}

async fn count_of(repo: &InMemoryTaskRepository, task_type: TaskType) -> usize {
    repo.list(&TaskFilter {
        task_type: Some(task_type),
        ..Default::default()
    })
    .await
    .unwrap()
    .len()
}

#[tokio::test]
async fn test_first_round_creates_all_maintenance_tasks() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = MaintenanceScheduler::new(Arc::new(repo.clone()), config());

    scheduler.schedule_once().await.unwrap();

    assert_eq!(count_of(&repo, TaskType::MaintainPool).await, 1);
    // desktop + mobile 各一个健康检查
    assert_eq!(count_of(&repo, TaskType::HealthCheck).await, 2);
}

#[tokio::test]
async fn test_debounce_prevents_duplicates() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = MaintenanceScheduler::new(Arc::new(repo.clone()), config());

    scheduler.schedule_once().await.unwrap();
    scheduler.schedule_once().await.unwrap();
    scheduler.schedule_once().await.unwrap();

    // 窗口内重复执行不会堆积任务
    assert_eq!(count_of(&repo, TaskType::MaintainPool).await, 1);
    assert_eq!(count_of(&repo, TaskType::HealthCheck).await, 2);
}

#[tokio::test]
async fn test_stale_maintain_pool_is_replaced() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = MaintenanceScheduler::new(Arc::new(repo.clone()), config());

    // 上一个池维护任务创建于31分钟前，超出30分钟窗口
    let mut old = Task::new(TaskType::MaintainPool, 5, json!({}));
    old.created_at = Utc::now() - Duration::seconds(1860);
    repo.create(&old).await.unwrap();

    scheduler.schedule_once().await.unwrap();
    assert_eq!(count_of(&repo, TaskType::MaintainPool).await, 2);
}

#[tokio::test]
async fn test_health_check_debounce_is_per_device() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = MaintenanceScheduler::new(Arc::new(repo.clone()), config());

    // desktop 的健康检查刚跑过，mobile 的已经过期
    let fresh = Task::new(TaskType::HealthCheck, 3, json!({"device_type": "desktop"}));
    repo.create(&fresh).await.unwrap();
    let mut stale = Task::new(TaskType::HealthCheck, 3, json!({"device_type": "mobile"}));
    stale.created_at = Utc::now() - Duration::hours(2);
    repo.create(&stale).await.unwrap();

    scheduler.schedule_once().await.unwrap();

    let checks = repo
        .list(&TaskFilter {
            task_type: Some(TaskType::HealthCheck),
            ..Default::default()
        })
        .await
        .unwrap();
    // 只为 mobile 新增了一个
    assert_eq!(checks.len(), 3);
    let fresh_mobile = checks
        .iter()
        .filter(|t| t.parameters["device_type"] == "mobile")
        .count();
    assert_eq!(fresh_mobile, 2);
}
