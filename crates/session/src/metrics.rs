use metrics::{counter, gauge, Counter, Gauge};

use serpfarm_domain::models::session::ReclaimReason;

/// 会话指标收集器
#[derive(Clone)]
pub struct SessionMetrics {
    sessions_created: Counter,
    active_sessions: Gauge,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            sessions_created: counter!("farm_sessions_created_total"),
            active_sessions: gauge!("farm_active_sessions"),
        }
    }

    pub fn record_created(&self) {
        self.sessions_created.increment(1);
    }

    pub fn record_terminated(&self, reason: &ReclaimReason) {
        counter!(
            "farm_sessions_terminated_total",
            "reason" => reason.as_str().to_string()
        )
        .increment(1);
    }

    pub fn record_failure(&self, kind: &'static str) {
        counter!("farm_session_failures_total", "kind" => kind).increment(1);
    }

    pub fn set_active(&self, count: usize) {
        self.active_sessions.set(count as f64);
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
