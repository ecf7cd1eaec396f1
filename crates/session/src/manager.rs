//! 调试会话分配
//!
//! 会话与任务一一对应：一个有界的显示槽位池、由槽位派生并显式查重
//! 的端口、两个被监督的守护进程。管理器是槽位/端口占用集的唯一
//! 改写者，所有状态在一把异步互斥锁之后，分配因此在进程内天然
//! 无竞态（跨进程分配不在职责范围内，部署上保证单写者）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use serpfarm_core::config::SessionConfig;
use serpfarm_core::{Clock, FarmError, FarmResult};
use serpfarm_domain::models::session::{DeviceClass, ReclaimReason, SessionHealth, SessionInfo};

use crate::metrics::SessionMetrics;
use crate::supervisor::{ProcessHandle, ProcessSupervisor};

/// 一个存活中的调试会话
#[derive(Debug, Clone)]
pub struct DebugSession {
    pub task_id: Uuid,
    pub display_slot: u32,
    pub port: u16,
    pub resolution: String,
    pub device_class: DeviceClass,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub display: ProcessHandle,
    pub framebuffer: ProcessHandle,
}

/// 回收判定所需的最小快照
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<Uuid, DebugSession>,
    used_slots: HashSet<u32>,
}

pub struct SessionManager {
    config: SessionConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
    clock: Arc<dyn Clock>,
    metrics: SessionMetrics,
    state: Mutex<SessionTable>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            supervisor,
            clock,
            metrics: SessionMetrics::new(),
            state: Mutex::new(SessionTable::default()),
        }
    }

    /// 为任务创建调试会话
    ///
    /// 幂等：同一任务已有会话时原样返回，不会再拉起第二套守护进程。
    /// 任何一步失败都会把本次尝试已占用的资源全部释放后再上抛。
    pub async fn create_session(
        &self,
        task_id: Uuid,
        device_class: DeviceClass,
    ) -> FarmResult<SessionInfo> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.sessions.get(&task_id) {
            warn!(task_id = %task_id, "debug session already exists");
            let health = self.health_of(existing).await;
            return Ok(self.describe(existing, health));
        }

        if state.sessions.len() >= self.config.max_sessions {
            self.metrics.record_failure("session_limit_exceeded");
            return Err(FarmError::ResourceExhausted(format!(
                "已达到调试会话上限: {}",
                self.config.max_sessions
            )));
        }

        let slot = self
            .find_free_slot(&state)
            .ok_or_else(|| {
                self.metrics.record_failure("no_available_display");
                FarmError::ResourceExhausted("没有空闲的显示槽位".to_string())
            })?;

        let port = self.config.port_base + (slot - self.config.display_base) as u16;
        if state.sessions.values().any(|s| s.port == port) {
            // 端口由槽位唯一派生，撞上说明占用表已经失真
            return Err(FarmError::Internal(format!(
                "端口 {port} 已被其他活跃会话占用"
            )));
        }

        let resolution = device_class.session_resolution().to_string();
        state.used_slots.insert(slot);

        let display = match self.supervisor.spawn_display(slot, &resolution).await {
            Ok(handle) => handle,
            Err(e) => {
                state.used_slots.remove(&slot);
                self.metrics.record_failure("display_spawn_failed");
                error!(task_id = %task_id, slot = slot, "failed to start virtual display: {e}");
                return Err(e);
            }
        };

        let framebuffer = match self
            .supervisor
            .spawn_framebuffer(slot, port, task_id)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // 回滚：终止已启动的显示进程并释放槽位
                if let Err(te) = self.supervisor.terminate(&display).await {
                    error!(task_id = %task_id, "rollback terminate failed: {te}");
                }
                if let Err(ae) = self
                    .supervisor
                    .remove_session_artifacts(slot, task_id)
                    .await
                {
                    warn!(task_id = %task_id, "rollback artifact cleanup failed: {ae}");
                }
                state.used_slots.remove(&slot);
                self.metrics.record_failure("framebuffer_spawn_failed");
                error!(task_id = %task_id, port = port, "failed to start framebuffer: {e}");
                return Err(e);
            }
        };

        let now = self.clock.now();
        let session = DebugSession {
            task_id,
            display_slot: slot,
            port,
            resolution,
            device_class,
            created_at: now,
            last_activity_at: now,
            display,
            framebuffer,
        };
        let info = self.describe(&session, SessionHealth::Active);
        state.sessions.insert(task_id, session);

        self.metrics.record_created();
        self.metrics.set_active(state.sessions.len());

        info!(
            task_id = %task_id,
            slot = slot,
            port = port,
            device = device_class.as_str(),
            "debug session created"
        );
        Ok(info)
    }

    /// 停止任务的调试会话，无会话时返回 false
    pub async fn stop_session(&self, task_id: Uuid) -> bool {
        self.stop_with_reason(task_id, &ReclaimReason::Requested("manual".to_string()))
            .await
    }

    pub async fn stop_with_reason(&self, task_id: Uuid, reason: &ReclaimReason) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.sessions.remove(&task_id) else {
            warn!(task_id = %task_id, "debug session not found for stop");
            return false;
        };
        let success = self.teardown(&mut state, session, reason).await;
        self.metrics.set_active(state.sessions.len());
        success
    }

    /// 停止所有会话（优雅关闭、运维批量清理）
    pub async fn stop_all(&self, reason: &ReclaimReason) -> usize {
        let mut state = self.state.lock().await;
        let task_ids: Vec<Uuid> = state.sessions.keys().copied().collect();
        let mut stopped = 0;
        for task_id in task_ids {
            if let Some(session) = state.sessions.remove(&task_id) {
                self.teardown(&mut state, session, reason).await;
                stopped += 1;
            }
        }
        self.metrics.set_active(state.sessions.len());
        stopped
    }

    pub async fn get_session(&self, task_id: Uuid) -> Option<SessionInfo> {
        let state = self.state.lock().await;
        let session = state.sessions.get(&task_id)?;
        let health = self.health_of(session).await;
        Some(self.describe(session, health))
    }

    /// 列出活跃会话
    ///
    /// 列表只反映通过了本次存活检查的会话：死掉的先回收再返回，
    /// 而不是读取时过滤。存活会话顺带刷新活动时间。
    pub async fn list_active(&self) -> Vec<SessionInfo> {
        let mut state = self.state.lock().await;
        let task_ids: Vec<Uuid> = state.sessions.keys().copied().collect();
        let mut infos = Vec::new();

        for task_id in task_ids {
            let health = match state.sessions.get(&task_id) {
                Some(session) => self.health_of(session).await,
                None => continue,
            };
            if health == SessionHealth::Active {
                let now = self.clock.now();
                if let Some(session) = state.sessions.get_mut(&task_id) {
                    session.last_activity_at = now;
                    infos.push(self.describe(session, SessionHealth::Active));
                }
            } else {
                warn!(task_id = %task_id, health = health.as_str(), "removing dead debug session");
                if let Some(session) = state.sessions.remove(&task_id) {
                    self.teardown(&mut state, session, &ReclaimReason::BrokenProcess)
                        .await;
                }
            }
        }

        self.metrics.set_active(state.sessions.len());
        infos
    }

    /// 刷新会话活动时间
    pub async fn touch(&self, task_id: Uuid) -> FarmResult<()> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(&task_id)
            .ok_or_else(|| FarmError::session_not_found(task_id))?;
        session.last_activity_at = self.clock.now();
        Ok(())
    }

    pub async fn session_health(&self, task_id: Uuid) -> Option<SessionHealth> {
        let state = self.state.lock().await;
        let session = state.sessions.get(&task_id)?;
        Some(self.health_of(session).await)
    }

    /// 回收判定用快照
    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .map(|s| SessionSnapshot {
                task_id: s.task_id,
                created_at: s.created_at,
                last_activity_at: s.last_activity_at,
            })
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    fn find_free_slot(&self, state: &SessionTable) -> Option<u32> {
        let base = self.config.display_base;
        (base..base + self.config.display_range).find(|slot| {
            // 占用集之外再对照一次锁文件，防御上个进程不干净退出的残留
            !state.used_slots.contains(slot) && !self.supervisor.slot_artifact_present(*slot)
        })
    }

    async fn health_of(&self, session: &DebugSession) -> SessionHealth {
        let display_alive = self.supervisor.is_alive(&session.display).await;
        let framebuffer_alive = self.supervisor.is_alive(&session.framebuffer).await;
        SessionHealth::from_liveness(display_alive, framebuffer_alive)
    }

    /// 终止两个守护进程并释放槽位
    ///
    /// 即使其中一个已经死掉也都会尝试终止；残留文件清理失败只记日志，
    /// 槽位/端口的释放永远执行。
    async fn teardown(
        &self,
        state: &mut SessionTable,
        session: DebugSession,
        reason: &ReclaimReason,
    ) -> bool {
        let mut success = true;

        for handle in [&session.framebuffer, &session.display] {
            if let Err(e) = self.supervisor.terminate(handle).await {
                error!(
                    task_id = %session.task_id,
                    kind = handle.kind.as_str(),
                    "failed to terminate daemon: {e}"
                );
                success = false;
            }
        }

        if let Err(e) = self
            .supervisor
            .remove_session_artifacts(session.display_slot, session.task_id)
            .await
        {
            warn!(task_id = %session.task_id, "session artifact cleanup failed: {e}");
        }

        state.used_slots.remove(&session.display_slot);
        self.metrics.record_terminated(reason);

        info!(
            task_id = %session.task_id,
            slot = session.display_slot,
            reason = reason.as_str(),
            success = success,
            "debug session stopped"
        );
        success
    }

    fn describe(&self, session: &DebugSession, health: SessionHealth) -> SessionInfo {
        let host = &self.config.host;
        let port = session.port;
        SessionInfo {
            task_id: session.task_id,
            display_slot: session.display_slot,
            port,
            host: host.clone(),
            resolution: session.resolution.clone(),
            device_class: session.device_class,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            status: health,
            uptime_seconds: (self.clock.now() - session.created_at).num_seconds(),
            vnc_url: format!("vnc://{host}:{port}"),
            tunnel_hint: format!("ssh -N -L {port}:{host}:{port} <farm-host>"),
        }
    }
}
