//! Runtime heartbeat: a HEARTBEAT event every configured interval

use super::CoreRuntime;
use crate::event::{Event, EventType};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Re-check period while the heartbeat is disabled
const DISABLED_POLL: Duration = Duration::from_secs(1);

/// Runs until `shutdown` fires or the runtime is dropped. The interval is
/// re-read from the configuration before every beat so it can be changed at
/// runtime; zero pauses the heartbeat.
pub(crate) async fn run(runtime: Weak<CoreRuntime>, shutdown: CancellationToken) {
    debug!("Heartbeat task started");
    loop {
        let interval = match runtime.upgrade() {
            Some(runtime) => runtime.config().heartbeat_interval(),
            None => break,
        };
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval.unwrap_or(DISABLED_POLL)) => {}
        }
        if interval.is_none() {
            continue;
        }
        let Some(runtime) = runtime.upgrade() else {
            break;
        };
        beat(&runtime);
    }
    debug!("Heartbeat task stopped");
}

fn beat(runtime: &Arc<CoreRuntime>) {
    let config = runtime.config();
    let mut event = Event::new(EventType::Heartbeat);
    event
        .add_header("Core-UUID", runtime.core_uuid().to_string())
        .add_header("Switchname", config.switchname.clone())
        .add_header("Up-Time", format_uptime(runtime.uptime()))
        .add_header("Uptime-msec", runtime.uptime().as_millis().to_string())
        .add_header("Session-Count", runtime.sessions().count().to_string())
        .add_header("Max-Sessions", config.limits.max_sessions.to_string())
        .add_header("Session-Per-Sec", runtime.sessions().sps_last().to_string())
        .add_header("Session-Per-Sec-Max", config.limits.sessions_per_second.to_string())
        .add_header("Session-Per-Sec-Peak", runtime.sessions().sps_peak().to_string())
        .add_header("Session-Peak-Max", runtime.sessions().sessions_peak().to_string())
        .add_header("Session-Since-Startup", runtime.sessions().sessions_created().to_string());
    runtime.fire_event(event);
}

pub(crate) fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3600;
    let minutes = secs % 3600 / 60;
    format!(
        "{} days, {} hours, {} minutes, {} seconds, {} milliseconds",
        days,
        hours,
        minutes,
        secs % 60,
        uptime.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        let uptime = Duration::from_millis(90_061_250);
        assert_eq!(
            format_uptime(uptime),
            "1 days, 1 hours, 1 minutes, 1 seconds, 250 milliseconds"
        );
    }
}
