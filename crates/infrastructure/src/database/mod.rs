pub mod postgres;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use serpfarm_core::config::DatabaseConfig;
use serpfarm_core::FarmResult;

/// 数据库连接管理
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> FarmResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            "数据库连接池已建立: max_connections={}",
            config.max_connections
        );
        Ok(Self { pool })
    }

    /// 执行内嵌迁移
    pub async fn migrate(&self) -> FarmResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| serpfarm_core::FarmError::database_error(format!("迁移失败: {e}")))?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}
