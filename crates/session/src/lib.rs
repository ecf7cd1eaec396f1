pub mod manager;
pub mod metrics;
pub mod reaper;
pub mod supervisor;
pub mod testing;

pub use manager::{DebugSession, SessionManager, SessionSnapshot};
pub use reaper::{CleanupReaper, SweepStats};
pub use supervisor::{DaemonKind, ProcessHandle, ProcessSupervisor, XvfbSupervisor};
