use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use serpfarm_core::config::SessionConfig;
use serpfarm_core::ManualClock;
use serpfarm_domain::models::session::DeviceClass;
use serpfarm_session::testing::FakeProcessSupervisor;
use serpfarm_session::{CleanupReaper, DaemonKind, ProcessHandle, SessionManager};

fn test_config() -> SessionConfig {
    SessionConfig {
        max_sessions: 10,
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

struct Fixture {
    manager: Arc<SessionManager>,
    supervisor: Arc<FakeProcessSupervisor>,
    clock: Arc<ManualClock>,
    reaper: CleanupReaper,
}

fn build_fixture() -> Fixture {
    let supervisor = Arc::new(FakeProcessSupervisor::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let config = test_config();
    let manager = Arc::new(SessionManager::new(
        config.clone(),
        supervisor.clone(),
        clock.clone(),
    ));
    let reaper = CleanupReaper::new(manager.clone(), clock.clone(), config);
    Fixture {
        manager,
        supervisor,
        clock,
        reaper,
    }
}

#[tokio::test]
async fn test_fresh_session_survives_sweep() {
    let fx = build_fixture();
    fx.manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();

    let stats = fx.reaper.sweep_once().await;
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.total_reclaimed(), 0);
    assert_eq!(fx.manager.active_count().await, 1);
}

#[tokio::test]
async fn test_inactive_session_reclaimed_and_slot_reusable() {
    let fx = build_fixture();
    let task_id = Uuid::new_v4();
    let info = fx
        .manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    // 超过不活跃超时但未到最大存活时间
    fx.clock.advance(Duration::seconds(3601));

    let stats = fx.reaper.sweep_once().await;
    assert_eq!(stats.reclaimed_timeout, 1);
    assert_eq!(stats.reclaimed_max_duration, 0);
    assert_eq!(fx.manager.active_count().await, 0);

    // 释放的槽位/端口可被后续分配复用
    let reused = fx
        .manager
        .create_session(Uuid::new_v4(), DeviceClass::Desktop)
        .await
        .unwrap();
    assert_eq!(reused.display_slot, info.display_slot);
    assert_eq!(reused.port, info.port);
}

#[tokio::test]
async fn test_touched_session_is_not_timed_out() {
    let fx = build_fixture();
    let task_id = Uuid::new_v4();
    fx.manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    fx.clock.advance(Duration::seconds(3000));
    fx.manager.touch(task_id).await.unwrap();
    fx.clock.advance(Duration::seconds(3000));

    // 活动时间被刷新过，不活跃时长只有3000秒
    let stats = fx.reaper.sweep_once().await;
    assert_eq!(stats.reclaimed_timeout, 0);
    assert_eq!(fx.manager.active_count().await, 1);
}

#[tokio::test]
async fn test_max_lifetime_overrides_activity() {
    let fx = build_fixture();
    let task_id = Uuid::new_v4();
    fx.manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    // 持续有活动，但绝对年龄超过上限
    for _ in 0..3 {
        fx.clock.advance(Duration::seconds(2500));
        fx.manager.touch(task_id).await.unwrap();
    }

    let stats = fx.reaper.sweep_once().await;
    assert_eq!(stats.reclaimed_max_duration, 1);
    assert_eq!(fx.manager.active_count().await, 0);
}

#[tokio::test]
async fn test_killed_daemon_reclaimed_as_broken_process() {
    let fx = build_fixture();
    let task_id = Uuid::new_v4();
    fx.manager
        .create_session(task_id, DeviceClass::Desktop)
        .await
        .unwrap();

    // 外部杀死帧缓冲守护进程，状态降级
    fx.supervisor.kill(&ProcessHandle {
        token: 2,
        pid: 10_002,
        kind: DaemonKind::Framebuffer,
    });
    assert_eq!(
        fx.manager.session_health(task_id).await.unwrap(),
        serpfarm_domain::models::session::SessionHealth::Degraded
    );

    let stats = fx.reaper.sweep_once().await;
    assert_eq!(stats.reclaimed_broken, 1);
    assert_eq!(fx.manager.active_count().await, 0);
}

#[tokio::test]
async fn test_cleanup_all_reclaims_everything() {
    let fx = build_fixture();
    for _ in 0..3 {
        fx.manager
            .create_session(Uuid::new_v4(), DeviceClass::Desktop)
            .await
            .unwrap();
    }

    let stopped = fx.reaper.cleanup_all("shutdown").await;
    assert_eq!(stopped, 3);
    assert_eq!(fx.manager.active_count().await, 0);
    assert_eq!(fx.supervisor.alive_count(), 0);
}

#[tokio::test]
async fn test_reaper_start_stop() {
    let mut fx = build_fixture();
    fx.reaper.start().await.unwrap();
    // 重复启动是无害的
    fx.reaper.start().await.unwrap();
    fx.reaper.stop().await;
}
