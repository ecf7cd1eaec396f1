pub mod automation;
pub mod cascade_scheduler;
pub mod dispatcher;
pub mod executors;
pub mod maintenance;
pub mod outcome_loop;
pub mod retry_scheduler;
pub mod test_support;
pub mod worker_registry;

pub use automation::{BrowserAutomation, CommandAutomation};
pub use cascade_scheduler::CascadeScheduler;
pub use dispatcher::TaskDispatcher;
pub use executors::{ExecutionContext, ExecutorRegistry, TaskExecutor};
pub use maintenance::MaintenanceScheduler;
pub use outcome_loop::run_outcome_loop;
pub use retry_scheduler::{RetryConfig, RetryScheduler};
pub use worker_registry::WorkerRegistry;
