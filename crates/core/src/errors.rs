use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FarmError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },
    #[error("Worker节点未找到: {id}")]
    WorkerNotFound { id: String },
    #[error("调试会话未找到: 任务 {task_id}")]
    SessionNotFound { task_id: Uuid },
    #[error("资源不足: {0}")]
    ResourceExhausted(String),
    #[error("守护进程启动失败: {daemon} - {message}")]
    ProcessSpawn { daemon: String, message: String },
    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type FarmResult<T> = Result<T, FarmError>;

impl FarmError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn task_not_found(id: Uuid) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }
    pub fn session_not_found(task_id: Uuid) -> Self {
        Self::SessionNotFound { task_id }
    }
    pub fn process_spawn<D: Into<String>, M: Into<String>>(daemon: D, message: M) -> Self {
        Self::ProcessSpawn {
            daemon: daemon.into(),
            message: message.into(),
        }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 致命错误不进入重试链
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FarmError::Internal(_)
                | FarmError::Configuration(_)
                | FarmError::ResourceExhausted(_)
                | FarmError::InvalidTaskParams(_)
                | FarmError::ProcessSpawn { .. }
        )
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FarmError::Database(_)
                | FarmError::DatabaseOperation(_)
                | FarmError::TaskExecution(_)
                | FarmError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for FarmError {
    fn from(err: serde_json::Error) -> Self {
        FarmError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for FarmError {
    fn from(err: anyhow::Error) -> Self {
        FarmError::Internal(err.to_string())
    }
}
