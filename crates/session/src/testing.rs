//! 测试用监督器
//!
//! 内存版的进程监督实现：不碰真实显示和端口，支持脚本化的启动失败、
//! 外部杀死进程、伪造锁文件，让会话生命周期逻辑可以离线验证。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use serpfarm_core::{FarmError, FarmResult};

use crate::supervisor::{DaemonKind, ProcessHandle, ProcessSupervisor};

#[derive(Default)]
struct FakeState {
    next_token: u64,
    alive: HashMap<u64, DaemonKind>,
    locked_slots: HashSet<u32>,
    fail_next_display: Option<String>,
    fail_next_framebuffer: Option<String>,
    terminated: Vec<ProcessHandle>,
    artifacts_removed: Vec<(u32, Uuid)>,
    display_spawns: u32,
    framebuffer_spawns: u32,
}

#[derive(Default)]
pub struct FakeProcessSupervisor {
    state: Mutex<FakeState>,
}

impl FakeProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟守护进程被外部杀死
    pub fn kill(&self, handle: &ProcessHandle) {
        self.state.lock().unwrap().alive.remove(&handle.token);
    }

    pub fn set_slot_locked(&self, slot: u32, locked: bool) {
        let mut state = self.state.lock().unwrap();
        if locked {
            state.locked_slots.insert(slot);
        } else {
            state.locked_slots.remove(&slot);
        }
    }

    pub fn fail_next_display<S: Into<String>>(&self, message: S) {
        self.state.lock().unwrap().fail_next_display = Some(message.into());
    }

    pub fn fail_next_framebuffer<S: Into<String>>(&self, message: S) {
        self.state.lock().unwrap().fail_next_framebuffer = Some(message.into());
    }

    pub fn alive_count(&self) -> usize {
        self.state.lock().unwrap().alive.len()
    }

    pub fn display_spawns(&self) -> u32 {
        self.state.lock().unwrap().display_spawns
    }

    pub fn framebuffer_spawns(&self) -> u32 {
        self.state.lock().unwrap().framebuffer_spawns
    }

    pub fn terminated_handles(&self) -> Vec<ProcessHandle> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn removed_artifacts(&self) -> Vec<(u32, Uuid)> {
        self.state.lock().unwrap().artifacts_removed.clone()
    }
}

#[async_trait]
impl ProcessSupervisor for FakeProcessSupervisor {
    async fn spawn_display(&self, _slot: u32, _resolution: &str) -> FarmResult<ProcessHandle> {
        let mut state = self.state.lock().unwrap();
        state.display_spawns += 1;
        if let Some(message) = state.fail_next_display.take() {
            return Err(FarmError::process_spawn("display", message));
        }
        state.next_token += 1;
        let token = state.next_token;
        state.alive.insert(token, DaemonKind::Display);
        Ok(ProcessHandle {
            token,
            pid: 10_000 + token as u32,
            kind: DaemonKind::Display,
        })
    }

    async fn spawn_framebuffer(
        &self,
        _slot: u32,
        _port: u16,
        _task_id: Uuid,
    ) -> FarmResult<ProcessHandle> {
        let mut state = self.state.lock().unwrap();
        state.framebuffer_spawns += 1;
        if let Some(message) = state.fail_next_framebuffer.take() {
            return Err(FarmError::process_spawn("framebuffer", message));
        }
        state.next_token += 1;
        let token = state.next_token;
        state.alive.insert(token, DaemonKind::Framebuffer);
        Ok(ProcessHandle {
            token,
            pid: 10_000 + token as u32,
            kind: DaemonKind::Framebuffer,
        })
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.state.lock().unwrap().alive.contains_key(&handle.token)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> FarmResult<()> {
        let mut state = self.state.lock().unwrap();
        state.alive.remove(&handle.token);
        state.terminated.push(*handle);
        Ok(())
    }

    fn slot_artifact_present(&self, slot: u32) -> bool {
        self.state.lock().unwrap().locked_slots.contains(&slot)
    }

    async fn remove_session_artifacts(&self, slot: u32, task_id: Uuid) -> FarmResult<()> {
        self.state
            .lock()
            .unwrap()
            .artifacts_removed
            .push((slot, task_id));
        Ok(())
    }
}
