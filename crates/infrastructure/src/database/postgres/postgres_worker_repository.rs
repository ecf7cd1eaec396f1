use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use serpfarm_core::{FarmError, FarmResult};
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::worker::WorkerNode;
use serpfarm_domain::repositories::WorkerRepository;

pub struct PostgresWorkerRepository {
    pool: PgPool,
}

impl PostgresWorkerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::postgres::PgRow) -> FarmResult<WorkerNode> {
        let device_classes: Vec<String> = row.try_get("device_classes")?;
        Ok(WorkerNode {
            node_id: row.try_get("node_id")?,
            hostname: row.try_get("hostname")?,
            max_concurrent_tasks: row.try_get("max_concurrent_tasks")?,
            current_task_count: row.try_get("current_task_count")?,
            device_classes: device_classes
                .iter()
                .filter_map(|s| DeviceClass::parse(s))
                .collect(),
            status: row.try_get("status")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for PostgresWorkerRepository {
    /// 幂等注册：重复注册刷新能力申报但保留首次注册时间
    #[instrument(skip(self, worker), fields(node_id = %worker.node_id))]
    async fn register(&self, worker: &WorkerNode) -> FarmResult<()> {
        let device_classes: Vec<String> = worker
            .device_classes
            .iter()
            .map(|d| d.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO worker_nodes
                (node_id, hostname, max_concurrent_tasks, current_task_count,
                 device_classes, status, last_heartbeat, registered_at)
            VALUES ($1, $2, $3, 0, $4, 'online', NOW(), NOW())
            ON CONFLICT (node_id) DO UPDATE SET
                hostname = EXCLUDED.hostname,
                max_concurrent_tasks = EXCLUDED.max_concurrent_tasks,
                device_classes = EXCLUDED.device_classes,
                status = 'online',
                last_heartbeat = NOW()
            "#,
        )
        .bind(&worker.node_id)
        .bind(&worker.hostname)
        .bind(worker.max_concurrent_tasks)
        .bind(&device_classes)
        .execute(&self.pool)
        .await?;

        debug!("Worker节点已注册: {}", worker.node_id);
        Ok(())
    }

    #[instrument(skip(self), fields(node_id = %node_id))]
    async fn heartbeat(
        &self,
        node_id: &str,
        current_task_count: i32,
        at: DateTime<Utc>,
    ) -> FarmResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE worker_nodes
            SET last_heartbeat = $2, current_task_count = $3, status = 'online'
            WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .bind(at)
        .bind(current_task_count)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(FarmError::worker_not_found(node_id));
        }
        Ok(())
    }

    async fn get_by_id(&self, node_id: &str) -> FarmResult<Option<WorkerNode>> {
        let row = sqlx::query("SELECT * FROM worker_nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_worker).transpose()
    }

    async fn list(&self) -> FarmResult<Vec<WorkerNode>> {
        let rows = sqlx::query("SELECT * FROM worker_nodes ORDER BY registered_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }
}
