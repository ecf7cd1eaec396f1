pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, ConfigValidator, DatabaseConfig, DispatcherConfig, ExecutorConfig,
    ObservabilityConfig, SessionConfig, WorkerConfig,
};
pub use errors::{FarmError, FarmResult};
