//! 守护进程监督
//!
//! 每个调试会话由两个协作的守护进程支撑：虚拟显示（Xvfb）和绑定在
//! 该显示上的远程帧缓冲服务（x11vnc）。监督器负责拉起、存活检查与
//! 终止，并在启动前完成"排挤"：把上次不干净退出残留的同槽位守护
//! 进程强制清掉、删除锁文件，再启动新的。

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use serpfarm_core::config::SessionConfig;
use serpfarm_core::{FarmError, FarmResult};

/// 守护进程种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    Display,
    Framebuffer,
}

impl DaemonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonKind::Display => "display",
            DaemonKind::Framebuffer => "framebuffer",
        }
    }
}

/// 被监督进程的句柄
///
/// 句柄本身不持有子进程，真正的 `Child` 留在监督器内部，这样会话
/// 记录可以随意克隆而存活检查仍然指向同一个进程。
#[derive(Debug, Clone, Copy)]
pub struct ProcessHandle {
    pub token: u64,
    pub pid: u32,
    pub kind: DaemonKind,
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// 启动虚拟显示守护进程并确认其存活
    async fn spawn_display(&self, slot: u32, resolution: &str) -> FarmResult<ProcessHandle>;

    /// 启动远程帧缓冲守护进程，绑定到刚创建的显示
    async fn spawn_framebuffer(
        &self,
        slot: u32,
        port: u16,
        task_id: Uuid,
    ) -> FarmResult<ProcessHandle>;

    async fn is_alive(&self, handle: &ProcessHandle) -> bool;

    /// 优雅终止：TERM信号，限时等待，超时强杀
    async fn terminate(&self, handle: &ProcessHandle) -> FarmResult<()>;

    /// 槽位是否留有上次运行的锁文件
    fn slot_artifact_present(&self, slot: u32) -> bool;

    /// 清除会话级残留文件（锁文件、日志）
    async fn remove_session_artifacts(&self, slot: u32, task_id: Uuid) -> FarmResult<()>;
}

/// 基于 Xvfb + x11vnc 的监督器实现
pub struct XvfbSupervisor {
    children: Mutex<HashMap<u64, Child>>,
    next_token: AtomicU64,
    settle_delay: Duration,
    terminate_grace: Duration,
    log_dir: PathBuf,
}

impl XvfbSupervisor {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            children: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            terminate_grace: Duration::from_secs(config.terminate_grace_seconds),
            log_dir: PathBuf::from(&config.log_dir),
        }
    }

    fn lock_file(slot: u32) -> PathBuf {
        PathBuf::from(format!("/tmp/.X{slot}-lock"))
    }

    fn framebuffer_log(&self, task_id: Uuid) -> PathBuf {
        self.log_dir.join(format!("x11vnc-{task_id}.log"))
    }

    /// 排挤残留的显示守护进程
    async fn displace_display(&self, slot: u32) {
        let pattern = format!("Xvfb :{slot}");
        let _ = Command::new("pkill").arg("-f").arg(&pattern).output().await;
        let lock = Self::lock_file(slot);
        if lock.exists() {
            warn!("removing stale display lock {}", lock.display());
            if let Err(e) = std::fs::remove_file(&lock) {
                warn!("failed to remove stale lock {}: {}", lock.display(), e);
            }
        }
    }

    /// 排挤占用目标端口的残留帧缓冲守护进程
    async fn displace_framebuffer(&self, port: u16) {
        let pattern = format!("rfbport {port}");
        let _ = Command::new("pkill").arg("-f").arg(&pattern).output().await;
    }

    /// 注册子进程并返回句柄
    async fn track(&self, child: Child, kind: DaemonKind) -> ProcessHandle {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let pid = child.id().unwrap_or_default();
        self.children.lock().await.insert(token, child);
        ProcessHandle { token, pid, kind }
    }

    /// 稳定等待后确认进程没有立即退出；退出则带stderr诊断报错
    async fn verify_settled(&self, token: u64, daemon: &str) -> FarmResult<()> {
        sleep(self.settle_delay).await;
        let mut children = self.children.lock().await;
        let child = match children.get_mut(&token) {
            Some(child) => child,
            None => return Err(FarmError::process_spawn(daemon, "进程句柄丢失")),
        };
        match child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => {
                let mut diagnostic = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut diagnostic).await;
                }
                children.remove(&token);
                Err(FarmError::process_spawn(
                    daemon,
                    format!("启动后立即退出 ({status}): {}", diagnostic.trim()),
                ))
            }
            Err(e) => Err(FarmError::process_spawn(daemon, e.to_string())),
        }
    }

    async fn probe_port(&self, port: u16) -> bool {
        matches!(
            timeout(
                Duration::from_secs(5),
                TcpStream::connect(("127.0.0.1", port)),
            )
            .await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl ProcessSupervisor for XvfbSupervisor {
    async fn spawn_display(&self, slot: u32, resolution: &str) -> FarmResult<ProcessHandle> {
        self.displace_display(slot).await;

        let child = Command::new("Xvfb")
            .arg(format!(":{slot}"))
            .args(["-screen", "0"])
            .arg(format!("{resolution}x24"))
            .arg("-ac")
            .args(["-nolisten", "tcp"])
            .args(["+extension", "GLX"])
            .args(["+extension", "RANDR"])
            .args(["-dpi", "96"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FarmError::process_spawn("display", e.to_string()))?;

        let handle = self.track(child, DaemonKind::Display).await;
        self.verify_settled(handle.token, "display").await?;

        info!(
            slot = slot,
            resolution = resolution,
            pid = handle.pid,
            "virtual display started"
        );
        Ok(handle)
    }

    async fn spawn_framebuffer(
        &self,
        slot: u32,
        port: u16,
        task_id: Uuid,
    ) -> FarmResult<ProcessHandle> {
        self.displace_framebuffer(port).await;

        if let Err(e) = std::fs::create_dir_all(&self.log_dir) {
            return Err(FarmError::process_spawn(
                "framebuffer",
                format!("创建日志目录失败: {e}"),
            ));
        }
        let log_file = self.framebuffer_log(task_id);

        // 无本地认证：端口只应在可信网络边界内可达
        let child = Command::new("x11vnc")
            .args(["-display", &format!(":{slot}")])
            .arg("-forever")
            .arg("-nopw")
            .arg("-localhost")
            .args(["-rfbport", &port.to_string()])
            .arg("-shared")
            .arg("-no6")
            .arg("-norc")
            .arg("-quiet")
            .args(["-o", &log_file.to_string_lossy()])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| FarmError::process_spawn("framebuffer", e.to_string()))?;

        let handle = self.track(child, DaemonKind::Framebuffer).await;
        self.verify_settled(handle.token, "framebuffer").await?;

        if !self.probe_port(port).await {
            let _ = self.terminate(&handle).await;
            return Err(FarmError::process_spawn(
                "framebuffer",
                format!("端口 {port} 未在限定时间内可达"),
            ));
        }

        info!(slot = slot, port = port, pid = handle.pid, "framebuffer server started");
        Ok(handle)
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        let mut children = self.children.lock().await;
        match children.get_mut(&handle.token) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn terminate(&self, handle: &ProcessHandle) -> FarmResult<()> {
        let child = self.children.lock().await.remove(&handle.token);
        let Some(mut child) = child else {
            // 已经终止过或从未归我们管
            return Ok(());
        };

        if child.try_wait().map(|s| s.is_some()).unwrap_or(false) {
            return Ok(());
        }

        let _ = Command::new("kill")
            .arg("-TERM")
            .arg(handle.pid.to_string())
            .output()
            .await;

        match timeout(self.terminate_grace, child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(
                    pid = handle.pid,
                    kind = handle.kind.as_str(),
                    "daemon didn't terminate gracefully, killing"
                );
                child
                    .kill()
                    .await
                    .map_err(|e| FarmError::Internal(format!("强杀守护进程失败: {e}")))?;
            }
        }
        Ok(())
    }

    fn slot_artifact_present(&self, slot: u32) -> bool {
        Self::lock_file(slot).exists()
    }

    async fn remove_session_artifacts(&self, slot: u32, task_id: Uuid) -> FarmResult<()> {
        let mut failures = Vec::new();
        let lock = Self::lock_file(slot);
        if lock.exists() {
            if let Err(e) = std::fs::remove_file(&lock) {
                failures.push(format!("{}: {e}", lock.display()));
            }
        }
        let log_file = self.framebuffer_log(task_id);
        if log_file.exists() {
            if let Err(e) = std::fs::remove_file(&log_file) {
                failures.push(format!("{}: {e}", log_file.display()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FarmError::Internal(format!(
                "清理会话残留失败: {}",
                failures.join(", ")
            )))
        }
    }
}
