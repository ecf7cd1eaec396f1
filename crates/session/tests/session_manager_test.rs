use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use serpfarm_core::config::SessionConfig;
use serpfarm_core::{FarmError, ManualClock};
use serpfarm_domain::models::session::{DeviceClass, SessionHealth};
use serpfarm_session::testing::FakeProcessSupervisor;
use serpfarm_session::SessionManager;

fn test_config(max_sessions: usize) -> SessionConfig {
    SessionConfig {
        max_sessions,
        display_base: 100,
        display_range: 50,
        port_base: 5900,
        host: "127.0.0.1".to_string(),
        inactivity_timeout_seconds: 3600,
        max_lifetime_seconds: 7200,
        cleanup_interval_seconds: 300,
        settle_delay_ms: 0,
        terminate_grace_seconds: 5,
        log_dir: "/tmp/serpfarm-vnc-test".to_string(),
    }
}

fn build_manager(max_sessions: usize) -> (Arc<SessionManager>, Arc<FakeProcessSupervisor>) {
    let supervisor = Arc::new(FakeProcessSupervisor::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager = Arc::new(SessionManager::new(
        test_config(max_sessions),
        supervisor.clone(),
        clock,
    ));
    (manager, supervisor)
}

#[tokio::test]
async fn test_create_session_allocates_lowest_slot() {
    let (manager, _supervisor) = build_manager(10);
    let info = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();

    assert_eq!(info.display_slot, 100);
    assert_eq!(info.port, 5900);
    assert_eq!(info.resolution, "1920x1080");
    assert_eq!(info.status, SessionHealth::Active);
    assert_eq!(info.vnc_url, "vnc://127.0.0.1:5900");
}

#[tokio::test]
async fn test_create_session_is_idempotent() {
    let (manager, supervisor) = build_manager(10);
    let task_id = Uuid::new_v4();

    let first = manager
        .create_session(task_id, DeviceClass::Mobile)
        .await
        .unwrap();
    let second = manager
        .create_session(task_id, DeviceClass::Mobile)
        .await
        .unwrap();

    assert_eq!(first.display_slot, second.display_slot);
    assert_eq!(first.port, second.port);
    // 第二次调用不会再拉起守护进程
    assert_eq!(supervisor.display_spawns(), 1);
    assert_eq!(supervisor.framebuffer_spawns(), 1);
    assert_eq!(manager.active_count().await, 1);
}

#[tokio::test]
async fn test_no_two_sessions_share_slot_or_port() {
    let (manager, _supervisor) = build_manager(10);
    let mut slots = std::collections::HashSet::new();
    let mut ports = std::collections::HashSet::new();

    for _ in 0..5 {
        let info = manager
            .create_session(Uuid::new_v4(), DeviceClass::Desktop)
            .await
            .unwrap();
        assert!(slots.insert(info.display_slot));
        assert!(ports.insert(info.port));
    }
}

#[tokio::test]
async fn test_session_cap_rejects_with_resource_exhausted() {
    let (manager, _supervisor) = build_manager(2);
    manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();
    manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();

    let err = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap_err();
    assert!(matches!(err, FarmError::ResourceExhausted(_)));
    assert_eq!(manager.active_count().await, 2);
}

#[tokio::test]
async fn test_locked_slot_is_skipped() {
    let (manager, supervisor) = build_manager(10);
    // 槽位100留有上次运行的锁文件
    supervisor.set_slot_locked(100, true);

    let info = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();
    assert_eq!(info.display_slot, 101);
    assert_eq!(info.port, 5901);
}

#[tokio::test]
async fn test_framebuffer_spawn_failure_rolls_back() {
    let (manager, supervisor) = build_manager(10);
    supervisor.fail_next_framebuffer("port never became reachable");

    let err = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap_err();
    assert!(matches!(err, FarmError::ProcessSpawn { .. }));

    // 已启动的显示进程被终止，没有存活的守护进程残留
    assert_eq!(supervisor.alive_count(), 0);
    assert_eq!(manager.active_count().await, 0);

    // 槽位已释放：下一次分配重新拿到最低槽位
    let info = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();
    assert_eq!(info.display_slot, 100);
}

#[tokio::test]
async fn test_display_spawn_failure_releases_slot() {
    let (manager, supervisor) = build_manager(10);
    supervisor.fail_next_display("Xvfb exited immediately");

    let err = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap_err();
    assert!(matches!(err, FarmError::ProcessSpawn { .. }));
    assert_eq!(supervisor.alive_count(), 0);

    let info = manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();
    assert_eq!(info.display_slot, 100);
}

#[tokio::test]
async fn test_stop_then_create_reuses_released_resources() {
    let (manager, supervisor) = build_manager(10);
    let task_id = Uuid::new_v4();

    let first = manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();
    assert!(manager.stop_session(task_id).await);
    assert_eq!(supervisor.alive_count(), 0);

    let second = manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();
    assert_eq!(second.display_slot, first.display_slot);
    assert_eq!(second.port, first.port);
}

#[tokio::test]
async fn test_stop_unknown_session_returns_false() {
    let (manager, _supervisor) = build_manager(10);
    assert!(!manager.stop_session(Uuid::new_v4()).await);
}

#[tokio::test]
async fn test_stop_terminates_both_daemons_even_if_one_is_dead() {
    let (manager, supervisor) = build_manager(10);
    let task_id = Uuid::new_v4();
    manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    // 帧缓冲进程先被外部杀死
    supervisor.kill(&serpfarm_session::ProcessHandle {
        token: 2,
        pid: 10_002,
        kind: serpfarm_session::DaemonKind::Framebuffer,
    });
    let health = manager.session_health(task_id).await.unwrap();
    assert_eq!(health, SessionHealth::Degraded);

    assert!(manager.stop_session(task_id).await);
    // 两个守护进程都走了终止路径
    assert_eq!(supervisor.terminated_handles().len(), 2);
    // 会话级残留文件被清理
    assert_eq!(supervisor.removed_artifacts().len(), 1);
}

#[tokio::test]
async fn test_list_active_drops_dead_sessions() {
    let (manager, supervisor) = build_manager(10);
    let healthy = Uuid::new_v4();
    let broken = Uuid::new_v4();

    manager
        .create_session(healthy, DeviceClass::Desktop)
        .await
        .unwrap();
    manager
        .create_session(broken, DeviceClass::Mobile)
        .await
        .unwrap();

    // 杀掉第二个会话的显示进程
    let broken_session = manager.get_session(broken).await.unwrap();
    assert_eq!(broken_session.status, SessionHealth::Active);
    supervisor.kill(&serpfarm_session::ProcessHandle {
        token: 3,
        pid: 10_003,
        kind: serpfarm_session::DaemonKind::Display,
    });

    let listed = manager.list_active().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task_id, healthy);
    assert_eq!(manager.active_count().await, 1);
}

#[tokio::test]
async fn test_get_session_reports_degraded_health() {
    let (manager, supervisor) = build_manager(10);
    let task_id = Uuid::new_v4();
    manager
        .create_session(task_id, DeviceClass::Tablet)
        .await
        .unwrap();

    // 第一个会话的句柄token是1（显示）和2（帧缓冲）
    supervisor.kill(&serpfarm_session::ProcessHandle {
        token: 2,
        pid: 10_002,
        kind: serpfarm_session::DaemonKind::Framebuffer,
    });

    let info = manager.get_session(task_id).await.unwrap();
    assert_eq!(info.status, SessionHealth::Degraded);
}

#[tokio::test]
async fn test_touch_refreshes_activity() {
    let supervisor = Arc::new(FakeProcessSupervisor::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let manager = SessionManager::new(test_config(5), supervisor, clock.clone());

    let task_id = Uuid::new_v4();
    let info = manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    clock.advance(chrono::Duration::minutes(10));
    manager.touch(task_id).await.unwrap();

    let refreshed = manager.get_session(task_id).await.unwrap();
    assert!(refreshed.last_activity_at > info.last_activity_at);
    assert_eq!(refreshed.uptime_seconds, 600);
}
