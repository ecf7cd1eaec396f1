//! 运维命令
//!
//! 对操作员工具暴露的命令面。每个命令返回 Result，main 把错误映射为
//! 非零退出码。命令直接作用于共享的服务注册表：任务存储负责跨进程
//! 可见的调试标记，会话管理器负责本进程内的活跃会话。

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use serpfarm_domain::models::session::DeviceClass;
use serpfarm_domain::models::task::{Task, TaskFilter, TaskPriority, TaskStatus, TaskType};
use serpfarm_domain::payload::DebugFlags;

use crate::app::Application;

fn parse_task_id(task_id: &str) -> Result<Uuid> {
    Uuid::parse_str(task_id).with_context(|| format!("无效的任务ID: {task_id}"))
}

fn parse_device(device: &str) -> DeviceClass {
    DeviceClass::parse(device).unwrap_or(DeviceClass::Desktop)
}

async fn load_task(app: &Application, id: Uuid) -> Result<Task> {
    app.task_repo
        .get_by_id(id)
        .await?
        .with_context(|| format!("任务不存在: {id}"))
}

/// `list [--status S] [--limit N]`
pub async fn list_tasks(app: &Application, status: Option<&str>, limit: i64) -> Result<()> {
    let status = match status {
        Some(s) => Some(
            TaskStatus::parse(s).with_context(|| format!("无效的状态过滤器: {s}"))?,
        ),
        None => None,
    };

    let tasks = app
        .task_repo
        .list(&TaskFilter {
            status,
            task_type: None,
            limit: Some(limit),
            offset: None,
        })
        .await?;

    println!("{:<38} {:<16} {:<10} {:>4}  {}", "ID", "TYPE", "STATUS", "PRI", "CREATED");
    for task in &tasks {
        let debug_mark = if DebugFlags::from_parameters(&task.parameters).debug_enabled {
            " [debug]"
        } else {
            ""
        };
        println!(
            "{:<38} {:<16} {:<10} {:>4}  {}{}",
            task.id,
            task.task_type.as_str(),
            task.status.as_str(),
            task.priority,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            debug_mark
        );
    }
    println!("共 {} 个任务", tasks.len());
    Ok(())
}

/// `enable-debug <task_id> [--device ...]`
pub async fn enable_debug(
    app: &Application,
    task_id: &str,
    device: &str,
    operator: &str,
) -> Result<()> {
    let id = parse_task_id(task_id)?;
    let task = load_task(app, id).await?;

    if !task.can_be_debugged() {
        bail!(
            "任务 {id} 当前状态为 {}，不能进入调试模式",
            task.status.as_str()
        );
    }

    let device = parse_device(device);
    let mut parameters = task.parameters.clone();
    DebugFlags::enable(&mut parameters, device, operator);
    app.task_repo.update_parameters(id, &parameters).await?;

    println!("任务 {id} 已标记为调试模式 (设备类型: {device})");
    println!("Worker 会在下一个认领周期内接起该任务并自动创建调试会话");
    println!("用 `serpfarm sessions` 查看连接信息");
    Ok(())
}

/// `disable-debug <task_id>`
pub async fn disable_debug(app: &Application, task_id: &str, operator: &str) -> Result<()> {
    let id = parse_task_id(task_id)?;
    let task = load_task(app, id).await?;

    let mut parameters = task.parameters.clone();
    DebugFlags::disable(&mut parameters, operator);
    app.task_repo.update_parameters(id, &parameters).await?;

    // 本进程内有活跃会话就顺带停掉
    if app.sessions.stop_session(id).await {
        println!("任务 {id} 的调试会话已停止");
    }
    println!("任务 {id} 的调试模式已关闭");
    Ok(())
}

/// `restart-debug <task_id> [--device ...]`
///
/// 幂等：先停掉已有会话，再把任务重置回 pending 并重新打上调试标记。
pub async fn restart_debug(
    app: &Application,
    task_id: &str,
    device: &str,
    operator: &str,
) -> Result<()> {
    let id = parse_task_id(task_id)?;
    let task = load_task(app, id).await?;

    if app.sessions.stop_session(id).await {
        println!("已停止任务 {id} 的既有调试会话");
    }

    app.task_repo.reset_to_pending(id).await?;

    let device = parse_device(device);
    let mut parameters = task.parameters.clone();
    DebugFlags::enable(&mut parameters, device, operator);
    app.task_repo.update_parameters(id, &parameters).await?;

    println!("任务 {id} 已重置为 pending 并进入调试模式 (设备类型: {device})");
    Ok(())
}

/// `sessions`
pub async fn show_sessions(app: &Application) -> Result<()> {
    let sessions = app.sessions.list_active().await;
    if sessions.is_empty() {
        println!("没有活跃的调试会话");
        return Ok(());
    }

    for info in &sessions {
        println!("任务 {}", info.task_id);
        println!("  显示槽位 :{}  端口 {}  分辨率 {}", info.display_slot, info.port, info.resolution);
        println!("  设备类型 {}  状态 {}  已运行 {}s", info.device_class, info.status.as_str(), info.uptime_seconds);
        println!("  连接: {}", info.connection_command());
        println!("  隧道: {}", info.tunnel_hint);
    }
    println!("共 {} 个活跃会话", sessions.len());
    Ok(())
}

/// `cleanup [--reason R]`
pub async fn cleanup_sessions(app: &Application, reason: &str) -> Result<()> {
    let stopped = app.cleanup_all_sessions(reason).await;
    println!("已回收 {stopped} 个调试会话 (原因: {reason})");
    Ok(())
}

/// `create-parse <keyword> [--device ...] [--pages N] [--region CODE]`
pub async fn create_parse_task(
    app: &Application,
    keyword: &str,
    device: &str,
    pages: u32,
    region: &str,
) -> Result<()> {
    let device = parse_device(device);
    let task = Task::new(
        TaskType::ParseSerp,
        TaskPriority::NORMAL,
        serde_json::json!({
            "keyword": keyword,
            "device_type": device.as_str(),
            "pages": pages,
            "region_code": region,
        }),
    );
    let created = app.task_repo.create(&task).await?;
    println!("SERP解析任务已创建: {}", created.id);
    Ok(())
}

/// `create-warmup [--device ...]`
pub async fn create_warmup_task(app: &Application, device: &str) -> Result<()> {
    let device = parse_device(device);
    let task = Task::new(
        TaskType::WarmupProfile,
        2,
        serde_json::json!({"device_type": device.as_str()}),
    );
    let created = app.task_repo.create(&task).await?;
    println!("Profile暖场任务已创建: {}", created.id);
    Ok(())
}
