use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::task::{Task, TaskFilter, TaskType};
use serpfarm_domain::repositories::TaskRepository;

const TASK_COLUMNS: &str = "id, task_type, status, priority, parameters, result, \
     error_message, worker_id, created_at, started_at, completed_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> FarmResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            parameters: row.try_get("parameters")?,
            result: row.try_get("result")?,
            error_message: row.try_get("error_message")?,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn create(&self, task: &Task) -> FarmResult<Task> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tasks (id, task_type, status, priority, parameters, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(task.id)
        .bind(&task.task_type)
        .bind(task.status)
        .bind(task.priority)
        .bind(&task.parameters)
        .bind(task.created_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_task(&row)?;
        debug!("创建任务成功: {}", created.entity_description());
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> FarmResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, filter), fields(status = ?filter.status, task_type = ?filter.task_type))]
    async fn list(&self, filter: &TaskFilter) -> FarmResult<Vec<Task>> {
        let mut query = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        if filter.status.is_some() {
            query.push_str(" AND status = $1");
        }
        if filter.task_type.is_some() {
            query.push_str(if filter.status.is_some() {
                " AND task_type = $2"
            } else {
                " AND task_type = $1"
            });
        }
        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {}", limit.max(0)));
        }
        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {}", offset.max(0)));
        }

        let mut sqlx_query = sqlx::query(&query);
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status);
        }
        if let Some(task_type) = &filter.task_type {
            sqlx_query = sqlx_query.bind(task_type);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        let tasks: FarmResult<Vec<Task>> = rows.iter().map(Self::row_to_task).collect();
        let result = tasks?;
        debug!("查询任务列表成功，返回 {} 个任务", result.len());
        Ok(result)
    }

    /// 跳过锁定行的原子认领
    ///
    /// 子查询用 FOR UPDATE SKIP LOCKED 选出优先级最高的 pending 任务，
    /// 多个并发认领者不会互相阻塞，也不会重复认领同一行。
    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_next(&self, worker_id: &str) -> FarmResult<Option<Task>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'running', started_at = NOW(), worker_id = $1
            WHERE id = (
                SELECT id FROM tasks
                WHERE status = 'pending'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("认领任务: {} (优先级 {})", task.id, task.priority);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, result), fields(task_id = %id))]
    async fn complete(&self, id: Uuid, result: &Value) -> FarmResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(FarmError::database_error(format!(
                "任务 {id} 不在 running 状态，拒绝终态转换"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn fail(&self, id: Uuid, error_message: &str) -> FarmResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(FarmError::database_error(format!(
                "任务 {id} 不在 running 状态，拒绝终态转换"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, parameters), fields(task_id = %id))]
    async fn update_parameters(&self, id: Uuid, parameters: &Value) -> FarmResult<()> {
        let updated = sqlx::query("UPDATE tasks SET parameters = $2 WHERE id = $1")
            .bind(id)
            .bind(parameters)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(FarmError::task_not_found(id));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn reset_to_pending(&self, id: Uuid) -> FarmResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'pending', started_at = NULL, completed_at = NULL,
                worker_id = NULL, result = NULL, error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(FarmError::task_not_found(id));
        }
        Ok(())
    }

    async fn latest_of_type(&self, task_type: &TaskType) -> FarmResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_type = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(task_type)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn latest_health_check(&self, device: DeviceClass) -> FarmResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE task_type = 'health_check' AND parameters->>'device_type' = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(device.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }
}
