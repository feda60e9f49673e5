// Session lifecycle through the state machine driver
//
// Drives loopback legs from NEW to DESTROY with inline dialplans and checks
// the state sequence announced on the event bus.

mod common;

use common::*;
use rvoip_switch_core::state_machine::StateMachine;
use rvoip_switch_core::{
    CallDirection, CallerProfile, ChannelState, EventType, HangupCause, Message, MessageKind, OriginateFlags, Signal,
    SwitchError,
};

#[tokio::test]
async fn test_inline_call_runs_to_destroy() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    let session = originate_inline(&runtime, "answer,set:greeting=hello,hangup").await;
    let id = session.id();
    assert!(session.channel().name().starts_with("loopback/"));
    join(&session).await;

    assert_eq!(
        states_of(&drain(&mut rx), id),
        vec!["CS_NEW", "CS_INIT", "CS_ROUTING", "CS_EXECUTE", "CS_HANGUP", "CS_REPORTING", "CS_DESTROY"]
    );
    assert_eq!(session.channel().cause(), HangupCause::NormalClearing);
    assert!(runtime.sessions().locate(&id).is_none());
    assert!(runtime.sessions().force_locate(&id).is_none());
    assert_eq!(runtime.sessions().count(), 0);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_hangup_complete_carries_variables() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    let session = originate_inline(&runtime, "set:greeting=hello,hangup:USER_BUSY").await;
    let id = session.id();
    join(&session).await;

    let events = drain(&mut rx);
    let complete = events_of(&events, id, EventType::ChannelHangupComplete);
    assert_eq!(complete.len(), 1);
    assert_eq!(complete[0].header("variable_greeting"), Some("hello"));
    assert_eq!(complete[0].header("Hangup-Cause"), Some("USER_BUSY"));
    assert_eq!(events_of(&events, id, EventType::ChannelCreate).len(), 1);
    assert_eq!(events_of(&events, id, EventType::ChannelDestroy).len(), 1);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_kill_during_execute_skips_routing() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    let session = originate_inline(&runtime, "answer,sleep:60000,transfer:park inline").await;
    let id = session.id();
    wait_for_state(&session, ChannelState::Execute).await;

    session.signal(Signal::Kill);
    join(&session).await;

    let states = states_of(&drain(&mut rx), id);
    let execute = states.iter().position(|s| s == "CS_EXECUTE").unwrap();
    assert_eq!(&states[execute..], ["CS_EXECUTE", "CS_HANGUP", "CS_REPORTING", "CS_DESTROY"]);
    assert_eq!(states.iter().filter(|s| *s == "CS_ROUTING").count(), 1);
    assert!(session.channel().profile_history().is_empty());

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_application_hangs_up() {
    let runtime = start_runtime(test_config()).await;
    let session = originate_inline(&runtime, "answer,no_such_app,park").await;
    join(&session).await;
    assert_eq!(session.channel().cause(), HangupCause::DestinationOutOfOrder);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_route_hangs_up() {
    let runtime = start_runtime(test_config()).await;
    let profile = CallerProfile::new("1000").with_dialplan("no_such_dialplan");
    let session = runtime.originate("loopback", profile, OriginateFlags::NONE).await.unwrap();
    join(&session).await;
    assert_eq!(session.channel().cause(), HangupCause::NoRouteDestination);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_transfer_routes_again() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    let session = originate_inline(&runtime, "answer,transfer:park inline").await;
    let id = session.id();
    wait_for_state(&session, ChannelState::Park).await;

    let channel = session.channel();
    assert_eq!(channel.profile_history().len(), 1);
    assert_eq!(channel.caller_profile().unwrap().destination_number, "park");
    assert!(channel.variable("transfer_history").unwrap().ends_with(":park"));

    session.hangup(HangupCause::NormalClearing);
    join(&session).await;

    let events = drain(&mut rx);
    let states = states_of(&events, id);
    assert_eq!(states.iter().filter(|s| *s == "CS_ROUTING").count(), 2);
    assert_eq!(states.last().map(String::as_str), Some("CS_DESTROY"));
    assert_eq!(events_of(&events, id, EventType::ChannelTransfer).len(), 1);
    assert_eq!(events_of(&events, id, EventType::ChannelPark).len(), 1);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_queued_application_runs_while_parked() {
    let runtime = start_runtime(test_config()).await;
    let session = originate_inline(&runtime, "park").await;
    wait_for_state(&session, ChannelState::Park).await;

    session.queue_application("set", "queued=yes").unwrap();
    session.queue_application("hangup", "CALL_REJECTED").unwrap();
    join(&session).await;

    assert_eq!(session.channel().variable("queued").as_deref(), Some("yes"));
    assert_eq!(session.channel().cause(), HangupCause::CallRejected);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_one_driver_per_session() {
    let runtime = start_runtime(test_config()).await;
    let session = originate_inline(&runtime, "answer,park").await;
    wait_for_state(&session, ChannelState::Park).await;

    let err = StateMachine::run(session.clone()).await.unwrap_err();
    assert!(matches!(err, SwitchError::InUse { .. }));
    assert!(matches!(session.launch_thread(), Err(SwitchError::InUse { .. })));
    assert!(session.is_driver_running());

    session.hangup(HangupCause::NormalClearing);
    join(&session).await;
    assert!(!session.is_driver_running());
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_driver_walks_hangup_without_routing() {
    let runtime = start_runtime(test_config()).await;
    let mut rx = runtime.subscribe_events();

    let session = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap();
    let id = session.id();
    session.hangup(HangupCause::OriginatorCancel);
    session.launch_thread().unwrap();
    join(&session).await;

    assert_eq!(
        states_of(&drain(&mut rx), id),
        vec!["CS_HANGUP", "CS_REPORTING", "CS_DESTROY"]
    );
    assert_eq!(session.channel().cause(), HangupCause::OriginatorCancel);
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_deferred_message_survives_full_queue() {
    let mut config = test_config();
    config.queues.message_queue_len = 2;
    let runtime = start_runtime(config).await;
    let session = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap();

    let later = tokio::time::Instant::now() + std::time::Duration::from_secs(60);
    session
        .queue_message(Message::new(MessageKind::Hold).deliver_at(later))
        .unwrap();
    session.queue_message(Message::new(MessageKind::Ringing)).unwrap();
    assert!(session.queue_message(Message::new(MessageKind::Progress)).is_err());

    assert_eq!(session.dequeue_message().map(|m| m.kind), Some(MessageKind::Ringing));
    session.queue_message(Message::new(MessageKind::Progress)).unwrap();
    assert_eq!(session.dequeue_message().map(|m| m.kind), Some(MessageKind::Progress));
    assert!(session.dequeue_message().is_none());
    assert_eq!(session.message_count(), 1);

    runtime.sessions().destroy(&runtime, &session).await;
    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn test_hangup_message_with_out_of_range_cause() {
    let runtime = start_runtime(test_config()).await;
    let session = runtime
        .request_session("loopback", CallDirection::Inbound, OriginateFlags::NONE)
        .await
        .unwrap();

    // 65536 + 42 would wrap to SWITCH_CONGESTION
    session
        .receive_message(Message::new(MessageKind::Hangup).with_numeric(65_578))
        .await
        .unwrap();
    assert_eq!(session.channel().cause(), HangupCause::NormalClearing);

    runtime.sessions().destroy(&runtime, &session).await;
    runtime.stop().await.unwrap();
}
