// Session admission: caps, the per-second throttle, pauses and bulk hangup

mod common;

use common::*;
use rvoip_switch_core::{
    CallDirection, ChannelState, CoreRuntime, HangupCause, OriginateFlags, PauseDirection, Session, SessionCtl,
    SwitchError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

async fn request(runtime: &Arc<CoreRuntime>, flags: OriginateFlags) -> rvoip_switch_core::Result<Arc<Session>> {
    runtime
        .request_session("loopback", CallDirection::Inbound, flags)
        .await
}

async fn destroy_all(runtime: &Arc<CoreRuntime>, sessions: &[Arc<Session>]) {
    for session in sessions {
        runtime.sessions().destroy(runtime, session).await;
    }
}

#[tokio::test]
async fn test_session_cap_boundary() {
    let mut config = test_config();
    config.limits.max_sessions = 2;
    let runtime = start_runtime(config).await;

    let first = request(&runtime, OriginateFlags::NONE).await.unwrap();
    let second = request(&runtime, OriginateFlags::NONE).await.unwrap();
    let err = request(&runtime, OriginateFlags::NONE).await.unwrap_err();
    assert!(matches!(err, SwitchError::SessionLimit { max: 2 }));
    assert_eq!(runtime.sessions().count(), 2);

    let unlimited = request(&runtime, OriginateFlags::NO_LIMITS).await.unwrap();
    assert_eq!(runtime.sessions().count(), 3);

    runtime.sessions().destroy(&runtime, &first).await;
    runtime.sessions().destroy(&runtime, &unlimited).await;
    let third = request(&runtime, OriginateFlags::NONE).await.unwrap();
    assert_eq!(runtime.sessions().sessions_peak(), 3);

    destroy_all(&runtime, &[second, third]).await;
    assert_eq!(runtime.sessions().count(), 0);
    runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sessions_per_second_spreads_requests() {
    let mut config = test_config();
    config.limits.sessions_per_second = 5;
    let runtime = start_runtime(config).await;

    let started = Instant::now();
    let shared = &runtime;
    let requests = (0..20).map(move |_| async move {
        let session = request(shared, OriginateFlags::NONE).await?;
        Ok::<_, SwitchError>((session, started.elapsed()))
    });
    let mut sessions = Vec::new();
    let mut per_window = [0usize; 5];
    for admitted in futures::future::join_all(requests).await {
        let (session, admitted_after) = admitted.unwrap();
        per_window[admitted_after.as_secs() as usize] += 1;
        sessions.push(session);
    }

    assert_eq!(sessions.len(), 20);
    assert_eq!(per_window, [5, 5, 5, 5, 0]);
    assert_eq!(runtime.sessions().sps_peak(), 5);

    destroy_all(&runtime, &sessions).await;
    runtime.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_throttle_wait_is_bounded() {
    let mut config = test_config();
    config.limits.sessions_per_second = 1;
    config.limits.throttle_wait_ms = 500;
    let runtime = start_runtime(config).await;

    let first = request(&runtime, OriginateFlags::NONE).await.unwrap();
    let err = request(&runtime, OriginateFlags::NONE).await.unwrap_err();
    assert!(matches!(err, SwitchError::RateLimited { sps: 1 }));
    let bypass = request(&runtime, OriginateFlags::NO_LIMITS).await.unwrap();

    destroy_all(&runtime, &[first, bypass]).await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_paused_direction_refuses_requests() {
    let runtime = start_runtime(test_config()).await;
    runtime.ctl(SessionCtl::Pause(PauseDirection::Inbound)).await.unwrap();

    let err = request(&runtime, OriginateFlags::NONE).await.unwrap_err();
    assert!(matches!(err, SwitchError::NotAccepting { .. }));
    assert_eq!(err.hangup_cause(), Some(HangupCause::NormalTemporaryFailure));

    let outbound = runtime
        .request_session("loopback", CallDirection::Outbound, OriginateFlags::NONE)
        .await
        .unwrap();

    runtime.ctl(SessionCtl::Resume(PauseDirection::Inbound)).await.unwrap();
    let inbound = request(&runtime, OriginateFlags::NONE).await.unwrap();

    destroy_all(&runtime, &[outbound, inbound]).await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_endpoint() {
    let runtime = start_runtime(test_config()).await;
    let err = runtime
        .request_session("sofia", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::NotFound { .. }));
    assert_eq!(runtime.sessions().count(), 0);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_hupall_matching_var() {
    let runtime = start_runtime(test_config()).await;
    let mut sessions = Vec::new();
    for group in ["sales", "sales", "support"] {
        let session = request(&runtime, OriginateFlags::NONE).await.unwrap();
        session.channel().set_variable("group", group);
        sessions.push(session);
    }

    let hung = runtime
        .sessions()
        .hupall_matching_var("group", "sales", HangupCause::ManagerRequest);
    assert_eq!(hung, 2);
    assert_eq!(sessions[0].channel().state(), ChannelState::Hangup);
    assert_eq!(sessions[1].channel().cause(), HangupCause::ManagerRequest);
    assert!(sessions[2].channel().ready());
    assert!(runtime.sessions().locate(&sessions[0].id()).is_none());
    assert!(runtime.sessions().locate(&sessions[2].id()).is_some());

    assert_eq!(
        runtime
            .sessions()
            .hupall_matching_var("group", "sales", HangupCause::ManagerRequest),
        0
    );

    destroy_all(&runtime, &sessions).await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_module_in_use_by_session() {
    let runtime = start_runtime(test_config()).await;
    let session = originate_inline(&runtime, "answer,park").await;
    wait_for_state(&session, ChannelState::Park).await;

    let err = runtime.unload_module("core_loopback").await.unwrap_err();
    assert!(matches!(err, SwitchError::InUse { .. }));

    session.hangup(HangupCause::NormalClearing);
    join(&session).await;

    runtime.unload_module("core_loopback").await.unwrap();
    let err = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::NotFound { .. }));
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_originate_leaves_no_session() {
    init_tracing();
    let runtime = CoreRuntime::new(test_config());
    runtime.start().unwrap();
    runtime
        .load_module(Arc::new(rvoip_switch_core::modules::loopback::LoopbackModule))
        .await
        .unwrap();

    let profile = rvoip_switch_core::CallerProfile::new("park").with_dialplan("inline");
    let err = runtime
        .originate("loopback", profile, OriginateFlags::NONE)
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchError::NotFound { .. }));
    assert_eq!(runtime.sessions().count(), 0);
    assert!(runtime.sessions().list_uuids().is_empty());

    runtime.unload_module("core_loopback").await.unwrap();
    runtime.stop().await.unwrap();
}
