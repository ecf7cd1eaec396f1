//! 会话回收
//!
//! 周期性巡检所有活跃会话：不活跃超时、超过最大存活时间、守护进程
//! 损坏三类情况会被回收并打上对应的原因标签。巡检自身的错误不会
//! 阻塞槽位/端口的释放。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use serpfarm_core::config::SessionConfig;
use serpfarm_core::{Clock, FarmResult};
use serpfarm_domain::models::session::{ReclaimReason, SessionHealth};

use crate::manager::SessionManager;

/// 会话回收服务
pub struct CleanupReaper {
    manager: Arc<SessionManager>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    reaper_handle: Option<tokio::task::JoinHandle<()>>,
}

/// 单次巡检统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepStats {
    pub examined: usize,
    pub reclaimed_timeout: usize,
    pub reclaimed_max_duration: usize,
    pub reclaimed_broken: usize,
}

impl SweepStats {
    pub fn total_reclaimed(&self) -> usize {
        self.reclaimed_timeout + self.reclaimed_max_duration + self.reclaimed_broken
    }
}

impl CleanupReaper {
    pub fn new(manager: Arc<SessionManager>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            manager,
            clock,
            config,
            shutdown_tx: None,
            reaper_handle: None,
        }
    }

    /// 启动回收循环
    pub async fn start(&mut self) -> FarmResult<()> {
        if self.reaper_handle.is_some() {
            warn!("cleanup reaper already running");
            return Ok(());
        }

        info!(
            "Starting cleanup reaper: interval={}s timeout={}s max_lifetime={}s",
            self.config.cleanup_interval_seconds,
            self.config.inactivity_timeout_seconds,
            self.config.max_lifetime_seconds
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let manager = Arc::clone(&self.manager);
        let clock = Arc::clone(&self.clock);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut sweep_interval =
                interval(Duration::from_secs(config.cleanup_interval_seconds));

            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        let stats = Self::perform_sweep(&manager, clock.as_ref(), &config).await;
                        if stats.total_reclaimed() > 0 {
                            info!(
                                "Cleanup sweep reclaimed {} sessions (timeout: {}, max_duration: {}, broken: {})",
                                stats.total_reclaimed(),
                                stats.reclaimed_timeout,
                                stats.reclaimed_max_duration,
                                stats.reclaimed_broken
                            );
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Cleanup reaper shutdown requested");
                        break;
                    }
                }
            }

            info!("Cleanup reaper stopped");
        });

        self.reaper_handle = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.reaper_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for cleanup reaper to stop: {e}");
            }
        }
    }

    /// 执行一次巡检
    pub async fn sweep_once(&self) -> SweepStats {
        Self::perform_sweep(&self.manager, self.clock.as_ref(), &self.config).await
    }

    /// 回收所有会话，不论年龄，原因由调用方给定
    pub async fn cleanup_all(&self, reason: &str) -> usize {
        info!("Force cleaning all debug sessions: reason={reason}");
        self.manager
            .stop_all(&ReclaimReason::Requested(reason.to_string()))
            .await
    }

    async fn perform_sweep(
        manager: &SessionManager,
        clock: &dyn Clock,
        config: &SessionConfig,
    ) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = clock.now();

        for snapshot in manager.snapshot().await {
            stats.examined += 1;
            let age = (now - snapshot.created_at).num_seconds();
            let inactive = (now - snapshot.last_activity_at).num_seconds();

            let reason = if age > config.max_lifetime_seconds {
                Some(ReclaimReason::MaxDurationExceeded)
            } else if inactive > config.inactivity_timeout_seconds {
                Some(ReclaimReason::Timeout)
            } else {
                match manager.session_health(snapshot.task_id).await {
                    // 巡检间隙被手动停止，无需处理
                    None => None,
                    Some(SessionHealth::Active) => None,
                    Some(_) => Some(ReclaimReason::BrokenProcess),
                }
            };

            let Some(reason) = reason else {
                continue;
            };

            debug!(
                task_id = %snapshot.task_id,
                reason = reason.as_str(),
                age_seconds = age,
                "session selected for reclamation"
            );

            if !manager
                .stop_with_reason(snapshot.task_id, &reason)
                .await
            {
                error!(task_id = %snapshot.task_id, "failed to reclaim session");
                continue;
            }

            match reason {
                ReclaimReason::Timeout => stats.reclaimed_timeout += 1,
                ReclaimReason::MaxDurationExceeded => stats.reclaimed_max_duration += 1,
                ReclaimReason::BrokenProcess => stats.reclaimed_broken += 1,
                ReclaimReason::Requested(_) => {}
            }
        }

        stats
    }
}
