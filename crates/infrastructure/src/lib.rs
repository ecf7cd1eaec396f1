pub mod database;
pub mod in_memory;
pub mod observability;

pub use database::postgres::{PostgresTaskRepository, PostgresWorkerRepository};
pub use database::DatabaseManager;
pub use in_memory::{InMemoryTaskRepository, InMemoryWorkerRepository};
