// Runtime control: shutdown modes, bulk hangup and live tunables

mod common;

use common::*;
use rvoip_switch_core::{
    CallDirection, ChannelState, CtlResponse, EventType, HangupCause, OriginateFlags, RuntimeFlag, SessionCtl,
    ShutdownMode, SwitchError,
};
use std::time::Duration;

#[tokio::test]
async fn test_graceful_shutdown_waits_for_sessions() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();
    let session = originate_inline(&runtime, "answer,park").await;
    wait_for_state(&session, ChannelState::Park).await;

    runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Graceful)).await.unwrap();
    assert!(runtime.flags().test(RuntimeFlag::ShutdownRequested));
    let err = runtime
        .originate("loopback", rvoip_switch_core::CallerProfile::new("park"), OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::NotAccepting { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!runtime.is_stopped());
    assert!(session.channel().ready());

    session.hangup(HangupCause::NormalClearing);
    join(&session).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.unwrap();
            if event.event_type == EventType::Shutdown {
                break;
            }
        }
    })
    .await
    .expect("runtime did not stop after the last session ended");

    assert!(runtime.is_stopped());
    assert!(!runtime.flags().test(RuntimeFlag::Running));
    assert!(runtime.modules().module_names().is_empty());
}

#[tokio::test]
async fn test_shutdown_asap_hangs_up_sessions() {
    let runtime = start_runtime(test_config()).await;
    let first = originate_inline(&runtime, "answer,park").await;
    let second = originate_inline(&runtime, "answer,sleep:60000").await;
    wait_for_state(&first, ChannelState::Park).await;
    wait_for_state(&second, ChannelState::Execute).await;

    assert_eq!(
        runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Asap)).await.unwrap(),
        CtlResponse::Ok
    );
    join(&first).await;
    join(&second).await;

    assert!(runtime.is_stopped());
    assert_eq!(first.channel().cause(), HangupCause::SystemShutdown);
    assert_eq!(second.channel().cause(), HangupCause::SystemShutdown);
    assert_eq!(runtime.sessions().count(), 0);

    let err = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert_eq!(err.hangup_cause(), Some(HangupCause::SystemShutdown));
    assert!(runtime.ctl(SessionCtl::Resume(rvoip_switch_core::PauseDirection::Both)).await.is_err());
}

#[tokio::test]
async fn test_ctl_hupall_and_counters() {
    let runtime = start_runtime(test_config()).await;
    let first = originate_inline(&runtime, "park").await;
    let second = originate_inline(&runtime, "park").await;
    wait_for_state(&first, ChannelState::Park).await;
    wait_for_state(&second, ChannelState::Park).await;

    assert_eq!(runtime.ctl(SessionCtl::SessionCount).await.unwrap(), CtlResponse::Int(2));
    assert_eq!(runtime.ctl(SessionCtl::Ready).await.unwrap(), CtlResponse::Bool(true));
    assert_eq!(
        runtime.ctl(SessionCtl::Hupall(HangupCause::ManagerRequest)).await.unwrap(),
        CtlResponse::Int(2)
    );
    join(&first).await;
    join(&second).await;

    assert_eq!(first.channel().cause(), HangupCause::ManagerRequest);
    assert_eq!(runtime.ctl(SessionCtl::SessionCount).await.unwrap(), CtlResponse::Int(0));
    assert_eq!(runtime.ctl(SessionCtl::SessionsPeak).await.unwrap(), CtlResponse::Int(2));
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_ctl_max_sessions_applies_to_new_requests() {
    let runtime = start_runtime(test_config()).await;
    runtime.ctl(SessionCtl::MaxSessions(Some(1))).await.unwrap();

    let first = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap();
    let err = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::SessionLimit { max: 1 }));
    assert_eq!(err.hangup_cause(), Some(HangupCause::SwitchCongestion));

    runtime.sessions().destroy(&runtime, &first).await;
    runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_follows_interval_changes() {
    let mut config = test_config();
    config.switchname = "edge-1".to_string();
    let runtime = start_runtime(config).await;
    let mut rx = runtime.subscribe_events();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(drain(&mut rx).iter().all(|e| e.event_type != EventType::Heartbeat));

    assert_eq!(runtime.ctl(SessionCtl::Heartbeat(Some(2))).await.unwrap(), CtlResponse::Int(2));
    tokio::time::sleep(Duration::from_secs(6)).await;
    let beats: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event_type == EventType::Heartbeat)
        .collect();
    assert!(beats.len() >= 2, "expected heartbeats, got {}", beats.len());
    assert_eq!(beats[0].header("Switchname"), Some("edge-1"));
    assert_eq!(beats[0].header("Session-Count"), Some("0"));
    let uuid = runtime.core_uuid().to_string();
    assert_eq!(beats[0].header("Core-UUID"), Some(uuid.as_str()));

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_module_events() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    runtime.unload_module("core_dptools").await.unwrap();
    runtime
        .load_module(std::sync::Arc::new(rvoip_switch_core::modules::dptools::DptoolsModule))
        .await
        .unwrap();

    let events = drain(&mut rx);
    let unload = events.iter().find(|e| e.event_type == EventType::ModuleUnload).unwrap();
    assert_eq!(unload.header("module"), Some("core_dptools"));
    assert!(events.iter().any(|e| e.event_type == EventType::ModuleLoad));
    assert!(runtime.modules().application("park").is_some());

    runtime.stop().await.unwrap();
}
