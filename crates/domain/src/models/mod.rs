pub mod session;
pub mod task;
pub mod worker;

pub use session::{DeviceClass, ReclaimReason, SessionHealth, SessionInfo};
pub use task::{Task, TaskFilter, TaskPriority, TaskStatus, TaskType};
pub use worker::{WorkerNode, WorkerStatus};
