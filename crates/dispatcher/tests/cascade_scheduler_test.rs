use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use serpfarm_domain::models::task::{Task, TaskPriority, TaskStatus, TaskType};
use serpfarm_domain::repositories::TaskRepository;
use serpfarm_dispatcher::CascadeScheduler;
use serpfarm_infrastructure::InMemoryTaskRepository;

fn completed_task(task_type: TaskType, parameters: serde_json::Value, result: serde_json::Value) -> Task {
    let mut task = Task::new(task_type, 5, parameters);
    task.status = TaskStatus::Completed;
    task.result = Some(result);
    task
}

#[tokio::test]
async fn test_serp_completion_enqueues_profile_rewarm() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = CascadeScheduler::new(Arc::new(repo.clone()));
    let profile_id = Uuid::new_v4();

    let task = completed_task(
        TaskType::ParseSerp,
        json!({"keyword": "x", "device_type": "mobile"}),
        json!({"profile_id": profile_id, "results_count": 42}),
    );
    scheduler.handle_completed_task(&task).await;

    let tasks = repo.all_tasks();
    assert_eq!(tasks.len(), 1);
    let cascade = &tasks[0];
    assert_eq!(cascade.task_type, TaskType::WarmupProfile);
    assert_eq!(cascade.priority, TaskPriority::LOW);
    assert_eq!(cascade.parameters["profile_id"], json!(profile_id));
    assert_eq!(cascade.parameters["device_type"], "mobile");
    assert_eq!(cascade.parameters["cascade_mode"], true);
}

#[tokio::test]
async fn test_cascade_disabled_by_parameter() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = CascadeScheduler::new(Arc::new(repo.clone()));

    let task = completed_task(
        TaskType::CheckPositions,
        json!({"keyword_ids": [], "cascade_enabled": false}),
        json!({"profile_id": Uuid::new_v4()}),
    );
    scheduler.handle_completed_task(&task).await;
    assert_eq!(repo.count(), 0);
}

#[tokio::test]
async fn test_non_profile_task_types_do_not_cascade() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = CascadeScheduler::new(Arc::new(repo.clone()));

    let task = completed_task(
        TaskType::MaintainPool,
        json!({}),
        json!({"profile_id": Uuid::new_v4()}),
    );
    scheduler.handle_completed_task(&task).await;
    assert_eq!(repo.count(), 0);
}

#[tokio::test]
async fn test_result_without_profile_does_not_cascade() {
    let repo = InMemoryTaskRepository::new();
    let scheduler = CascadeScheduler::new(Arc::new(repo.clone()));

    let task = completed_task(
        TaskType::ParseSerp,
        json!({"keyword": "x"}),
        json!({"results_count": 0}),
    );
    scheduler.handle_completed_task(&task).await;
    assert_eq!(repo.count(), 0);
}
