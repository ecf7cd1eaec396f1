//! 内存仓储实现
//!
//! 与Postgres实现语义一致的内存版本，用于嵌入式单进程部署和
//! 确定性测试。认领在一个互斥临界区内完成比较与置位，保证并发
//! 认领者对同一任务最多一个成功。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::task::{Task, TaskFilter, TaskStatus, TaskType};
use serpfarm_domain::models::worker::{WorkerNode, WorkerStatus};
use serpfarm_domain::repositories::{TaskRepository, WorkerRepository};

struct TaskEntry {
    task: Task,
    /// 插入序号，created_at 相同（同一毫秒创建）时的FIFO决胜
    seq: u64,
}

#[derive(Clone)]
pub struct InMemoryTaskRepository {
    inner: Arc<Mutex<TaskStore>>,
}

struct TaskStore {
    tasks: HashMap<Uuid, TaskEntry>,
    next_seq: u64,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskStore {
                tasks: HashMap::new(),
                next_seq: 0,
            })),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().tasks.len()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .map(|e| e.task.clone())
            .collect()
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> FarmResult<Task> {
        let mut store = self.inner.lock().unwrap();
        let seq = store.next_seq;
        store.next_seq += 1;
        store.tasks.insert(
            task.id,
            TaskEntry {
                task: task.clone(),
                seq,
            },
        );
        Ok(task.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> FarmResult<Option<Task>> {
        let store = self.inner.lock().unwrap();
        Ok(store.tasks.get(&id).map(|e| e.task.clone()))
    }

    async fn list(&self, filter: &TaskFilter) -> FarmResult<Vec<Task>> {
        let store = self.inner.lock().unwrap();
        let mut entries: Vec<&TaskEntry> = store
            .tasks
            .values()
            .filter(|e| {
                filter.status.map_or(true, |s| e.task.status == s)
                    && filter
                        .task_type
                        .as_ref()
                        .map_or(true, |t| &e.task.task_type == t)
            })
            .collect();
        entries.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.task.clone())
            .collect())
    }

    async fn claim_next(&self, worker_id: &str) -> FarmResult<Option<Task>> {
        let mut store = self.inner.lock().unwrap();
        let candidate = store
            .tasks
            .values()
            .filter(|e| e.task.status == TaskStatus::Pending)
            .max_by(|a, b| {
                a.task
                    .priority
                    .cmp(&b.task.priority)
                    .then(b.task.created_at.cmp(&a.task.created_at))
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|e| e.task.id);

        if let Some(id) = candidate {
            if let Some(entry) = store.tasks.get_mut(&id) {
                entry.task.status = TaskStatus::Running;
                entry.task.started_at = Some(Utc::now());
                entry.task.worker_id = Some(worker_id.to_string());
                return Ok(Some(entry.task.clone()));
            }
        }
        Ok(None)
    }

    async fn complete(&self, id: Uuid, result: &Value) -> FarmResult<()> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .tasks
            .get_mut(&id)
            .ok_or(FarmError::TaskNotFound { id })?;
        if entry.task.status != TaskStatus::Running {
            return Err(FarmError::database_error(format!(
                "任务 {id} 不在 running 状态，拒绝终态转换"
            )));
        }
        entry.task.status = TaskStatus::Completed;
        entry.task.result = Some(result.clone());
        entry.task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, id: Uuid, error_message: &str) -> FarmResult<()> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .tasks
            .get_mut(&id)
            .ok_or(FarmError::TaskNotFound { id })?;
        if entry.task.status != TaskStatus::Running {
            return Err(FarmError::database_error(format!(
                "任务 {id} 不在 running 状态，拒绝终态转换"
            )));
        }
        entry.task.status = TaskStatus::Failed;
        entry.task.error_message = Some(error_message.to_string());
        entry.task.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn update_parameters(&self, id: Uuid, parameters: &Value) -> FarmResult<()> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .tasks
            .get_mut(&id)
            .ok_or(FarmError::TaskNotFound { id })?;
        entry.task.parameters = parameters.clone();
        Ok(())
    }

    async fn reset_to_pending(&self, id: Uuid) -> FarmResult<()> {
        let mut store = self.inner.lock().unwrap();
        let entry = store
            .tasks
            .get_mut(&id)
            .ok_or(FarmError::TaskNotFound { id })?;
        entry.task.status = TaskStatus::Pending;
        entry.task.started_at = None;
        entry.task.completed_at = None;
        entry.task.worker_id = None;
        entry.task.result = None;
        entry.task.error_message = None;
        Ok(())
    }

    async fn latest_of_type(&self, task_type: &TaskType) -> FarmResult<Option<Task>> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .tasks
            .values()
            .filter(|e| &e.task.task_type == task_type)
            .max_by(|a, b| {
                a.task
                    .created_at
                    .cmp(&b.task.created_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|e| e.task.clone()))
    }

    async fn latest_health_check(&self, device: DeviceClass) -> FarmResult<Option<Task>> {
        let store = self.inner.lock().unwrap();
        Ok(store
            .tasks
            .values()
            .filter(|e| {
                e.task.task_type == TaskType::HealthCheck
                    && e.task
                        .parameters
                        .get("device_type")
                        .and_then(Value::as_str)
                        == Some(device.as_str())
            })
            .max_by(|a, b| {
                a.task
                    .created_at
                    .cmp(&b.task.created_at)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|e| e.task.clone()))
    }
}

#[derive(Clone)]
pub struct InMemoryWorkerRepository {
    workers: Arc<Mutex<HashMap<String, WorkerNode>>>,
}

impl InMemoryWorkerRepository {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryWorkerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn register(&self, worker: &WorkerNode) -> FarmResult<()> {
        let mut workers = self.workers.lock().unwrap();
        // upsert：重复注册保留原 registered_at
        let registered_at = workers
            .get(&worker.node_id)
            .map(|w| w.registered_at)
            .unwrap_or(worker.registered_at);
        let mut node = worker.clone();
        node.registered_at = registered_at;
        node.status = WorkerStatus::Online;
        workers.insert(node.node_id.clone(), node);
        Ok(())
    }

    async fn heartbeat(
        &self,
        node_id: &str,
        current_task_count: i32,
        at: DateTime<Utc>,
    ) -> FarmResult<()> {
        let mut workers = self.workers.lock().unwrap();
        let worker = workers
            .get_mut(node_id)
            .ok_or_else(|| FarmError::worker_not_found(node_id))?;
        worker.last_heartbeat = at;
        worker.current_task_count = current_task_count;
        worker.status = WorkerStatus::Online;
        Ok(())
    }

    async fn get_by_id(&self, node_id: &str) -> FarmResult<Option<WorkerNode>> {
        Ok(self.workers.lock().unwrap().get(node_id).cloned())
    }

    async fn list(&self) -> FarmResult<Vec<WorkerNode>> {
        Ok(self.workers.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use serpfarm_domain::models::task::TaskPriority;

    fn pending_task(priority: i32, created_offset_secs: i64) -> Task {
        let mut task = Task::new(TaskType::ParseSerp, priority, json!({"keyword": "t"}));
        task.created_at = Utc::now() + Duration::seconds(created_offset_secs);
        task
    }

    #[tokio::test]
    async fn test_claim_orders_by_priority_then_fifo() {
        let repo = InMemoryTaskRepository::new();
        // 创建顺序 T1(5), T2(1), T3(5)
        let t1 = repo.create(&pending_task(5, 0)).await.unwrap();
        let t2 = repo.create(&pending_task(1, 1)).await.unwrap();
        let t3 = repo.create(&pending_task(5, 2)).await.unwrap();

        let claimed: Vec<Uuid> = [
            repo.claim_next("w").await.unwrap().unwrap().id,
            repo.claim_next("w").await.unwrap().unwrap().id,
            repo.claim_next("w").await.unwrap().unwrap().id,
        ]
        .to_vec();
        assert_eq!(claimed, vec![t1.id, t3.id, t2.id]);
        assert!(repo.claim_next("w").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let repo = InMemoryTaskRepository::new();
        repo.create(&pending_task(TaskPriority::NORMAL, 0))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.claim_next(&format!("worker-{i}")).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_claim_sets_running_fields() {
        let repo = InMemoryTaskRepository::new();
        repo.create(&pending_task(5, 0)).await.unwrap();
        let claimed = repo.claim_next("worker-9").await.unwrap().unwrap();
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-9"));
    }

    #[tokio::test]
    async fn test_terminal_transition_requires_running() {
        let repo = InMemoryTaskRepository::new();
        let task = repo.create(&pending_task(5, 0)).await.unwrap();
        assert!(repo.complete(task.id, &json!({})).await.is_err());

        let claimed = repo.claim_next("w").await.unwrap().unwrap();
        repo.complete(claimed.id, &json!({"ok": true})).await.unwrap();
        // 已完成的任务不允许再次转换
        assert!(repo.fail(claimed.id, "late").await.is_err());

        let stored = repo.get_by_id(claimed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.unwrap() >= stored.started_at.unwrap());
    }

    #[tokio::test]
    async fn test_latest_health_check_filters_device() {
        let repo = InMemoryTaskRepository::new();
        let mut desktop = Task::new(TaskType::HealthCheck, 3, json!({"device_type": "desktop"}));
        desktop.created_at = Utc::now() - Duration::hours(2);
        repo.create(&desktop).await.unwrap();

        assert!(repo
            .latest_health_check(DeviceClass::Mobile)
            .await
            .unwrap()
            .is_none());
        let found = repo
            .latest_health_check(DeviceClass::Desktop)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, desktop.id);
    }

    #[tokio::test]
    async fn test_worker_register_is_idempotent() {
        let repo = InMemoryWorkerRepository::new();
        let worker = WorkerNode::new(
            "worker-a".to_string(),
            "host-a".to_string(),
            5,
            vec![DeviceClass::Desktop],
        );
        repo.register(&worker).await.unwrap();
        let first = repo.get_by_id("worker-a").await.unwrap().unwrap();

        repo.register(&worker).await.unwrap();
        let second = repo.get_by_id("worker-a").await.unwrap().unwrap();
        assert_eq!(first.registered_at, second.registered_at);

        repo.heartbeat("worker-a", 2, Utc::now()).await.unwrap();
        let after = repo.get_by_id("worker-a").await.unwrap().unwrap();
        assert_eq!(after.current_task_count, 2);
        assert!(after.last_heartbeat >= first.last_heartbeat);
    }
}
