//! Shared helpers for switch-core integration tests

#![allow(dead_code)]

use rvoip_switch_core::{
    modules, CallerProfile, ChannelState, CoreConfig, CoreRuntime, Event, EventType, OriginateFlags,
    Session, SessionId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Route logs to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with the runtime heartbeat off and no admission throttle
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.heartbeat_interval_secs = 0;
    config.limits.sessions_per_second = 0;
    config.shutdown_grace_secs = 2;
    config
}

/// A started runtime with every built-in module loaded
pub async fn start_runtime(config: CoreConfig) -> Arc<CoreRuntime> {
    init_tracing();
    let runtime = CoreRuntime::new(config);
    runtime.start().unwrap();
    modules::load_builtin(&runtime).await.unwrap();
    runtime
}

/// Originate a loopback leg running an inline application list
pub async fn originate_inline(runtime: &Arc<CoreRuntime>, apps: &str) -> Arc<Session> {
    let profile = CallerProfile::new(apps).with_dialplan("inline");
    runtime
        .originate("loopback", profile, OriginateFlags::NONE)
        .await
        .unwrap()
}

/// Poll until the driver is running `state`
pub async fn wait_for_state(session: &Arc<Session>, state: ChannelState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.channel().running_state() != state {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "session never reached {} (running {})",
            state,
            session.channel().running_state()
        )
    });
}

/// Join the driver, failing the test if it hangs
pub async fn join(session: &Arc<Session>) {
    tokio::time::timeout(Duration::from_secs(5), session.join())
        .await
        .expect("driver did not finish")
        .unwrap();
}

/// Every event already delivered to `rx`
pub fn drain(rx: &mut broadcast::Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// States the driver announced for one session, in order
pub fn states_of(events: &[Arc<Event>], id: SessionId) -> Vec<String> {
    let uuid = id.to_string();
    events
        .iter()
        .filter(|e| e.event_type == EventType::ChannelState && e.header("Unique-ID") == Some(uuid.as_str()))
        .filter_map(|e| e.header("Channel-Call-State").map(str::to_string))
        .collect()
}

/// Events of one type fired for one session
pub fn events_of(events: &[Arc<Event>], id: SessionId, event_type: EventType) -> Vec<Arc<Event>> {
    let uuid = id.to_string();
    events
        .iter()
        .filter(|e| e.event_type == event_type && e.header("Unique-ID") == Some(uuid.as_str()))
        .cloned()
        .collect()
}
