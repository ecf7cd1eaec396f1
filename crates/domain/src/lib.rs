pub mod events;
pub mod models;
pub mod payload;
pub mod repositories;

pub use events::TaskOutcome;
pub use models::{
    DeviceClass, ReclaimReason, SessionHealth, SessionInfo, Task, TaskFilter, TaskPriority,
    TaskStatus, TaskType, WorkerNode, WorkerStatus,
};
pub use payload::{DebugFlags, TaskPayload};
pub use repositories::{TaskRepository, WorkerRepository};
