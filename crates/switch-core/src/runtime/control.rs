//! The runtime control surface
//!
//! Admin tooling (the daemon's signal handling, a CLI, tests) drives the core
//! through [`CoreRuntime::ctl`]. Setters take `Option`: `None` only reads the
//! current value. Commands that would end the process return
//! [`CtlResponse::Exit`] or [`CtlResponse::Abort`]; the caller decides what
//! to do with them.

use super::{CoreRuntime, RuntimeFlag};
use crate::errors::{Result, SwitchError};
use crate::types::HangupCause;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Which new sessions `Pause`/`Resume` apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDirection {
    Inbound,
    Outbound,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting sessions and shut down once the last one is gone
    Graceful,
    /// Hang everything up and shut down now
    Asap,
    /// Tell the caller to exit the process immediately
    Now,
}

/// A control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCtl {
    Pause(PauseDirection),
    Resume(PauseDirection),
    Shutdown(ShutdownMode),
    /// Abandon a pending graceful shutdown
    ShutdownCancel,
    Hupall(HangupCause),
    /// Set the process-wide log level by name
    LogLevel(String),
    GetLogLevel,
    MaxSessions(Option<u32>),
    Sps(Option<u32>),
    MinDtmfDuration(Option<u32>),
    MaxDtmfDuration(Option<u32>),
    DefaultDtmfDuration(Option<u32>),
    /// Heartbeat interval in seconds; zero disables it
    Heartbeat(Option<u64>),
    DbPool(Option<u32>),
    SessionCount,
    SessionsPeak,
    LastSps,
    SpsPeak,
    Ready,
    Crash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlResponse {
    Ok,
    Int(i64),
    Bool(bool),
    Text(String),
    /// The process should exit with this code
    Exit(i32),
    /// The process should abort
    Abort,
}

impl fmt::Display for CtlResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtlResponse::Ok => f.write_str("+OK"),
            CtlResponse::Int(v) => write!(f, "{}", v),
            CtlResponse::Bool(v) => write!(f, "{}", v),
            CtlResponse::Text(v) => f.write_str(v),
            CtlResponse::Exit(code) => write!(f, "exit {}", code),
            CtlResponse::Abort => f.write_str("abort"),
        }
    }
}

impl PauseDirection {
    fn flags(self) -> &'static [RuntimeFlag] {
        match self {
            PauseDirection::Inbound => &[RuntimeFlag::NoNewInbound],
            PauseDirection::Outbound => &[RuntimeFlag::NoNewOutbound],
            PauseDirection::Both => &[RuntimeFlag::NoNewInbound, RuntimeFlag::NoNewOutbound],
        }
    }
}

impl CoreRuntime {
    /// Run a control command
    pub async fn ctl(self: &Arc<Self>, command: SessionCtl) -> Result<CtlResponse> {
        match command {
            SessionCtl::Pause(direction) => {
                self.flags.update(direction.flags(), &[]);
                info!(?direction, "New sessions paused");
                Ok(CtlResponse::Ok)
            }
            SessionCtl::Resume(direction) => {
                if self.flags.test(RuntimeFlag::ShuttingDown) {
                    return Err(SwitchError::NotAccepting {
                        reason: "system is shutting down".to_string(),
                        cause: HangupCause::SystemShutdown,
                    });
                }
                self.flags.update(&[], direction.flags());
                info!(?direction, "New sessions resumed");
                Ok(CtlResponse::Ok)
            }
            SessionCtl::Shutdown(ShutdownMode::Graceful) => {
                self.flags.update(
                    &[
                        RuntimeFlag::ShutdownRequested,
                        RuntimeFlag::NoNewInbound,
                        RuntimeFlag::NoNewOutbound,
                    ],
                    &[],
                );
                if self.spawn_shutdown_watch() {
                    info!(sessions = self.sessions.count(), "Graceful shutdown requested");
                }
                Ok(CtlResponse::Ok)
            }
            SessionCtl::Shutdown(ShutdownMode::Asap) => {
                self.stop().await?;
                Ok(CtlResponse::Ok)
            }
            SessionCtl::Shutdown(ShutdownMode::Now) => {
                warn!("Immediate shutdown requested");
                Ok(CtlResponse::Exit(0))
            }
            SessionCtl::ShutdownCancel => {
                if !self.cancel_shutdown_watch() {
                    return Ok(CtlResponse::Bool(false));
                }
                self.flags.update(
                    &[],
                    &[
                        RuntimeFlag::ShutdownRequested,
                        RuntimeFlag::NoNewInbound,
                        RuntimeFlag::NoNewOutbound,
                    ],
                );
                info!("Graceful shutdown cancelled");
                Ok(CtlResponse::Bool(true))
            }
            SessionCtl::Hupall(cause) => Ok(CtlResponse::Int(self.sessions.hupall(cause) as i64)),
            SessionCtl::LogLevel(name) => {
                let log = self
                    .log_handle()
                    .ok_or_else(|| SwitchError::Config("logging is not initialized".to_string()))?;
                let level = rvoip_infra_common::parse_log_level(&name)?;
                log.set_level(level)?;
                Ok(CtlResponse::Text(level.to_string()))
            }
            SessionCtl::GetLogLevel => {
                let log = self
                    .log_handle()
                    .ok_or_else(|| SwitchError::Config("logging is not initialized".to_string()))?;
                Ok(CtlResponse::Text(log.level().to_string()))
            }
            SessionCtl::MaxSessions(value) => {
                let max = self.update_config(|c| {
                    if let Some(max) = value {
                        c.limits.max_sessions = max;
                    }
                    c.limits.max_sessions
                });
                Ok(CtlResponse::Int(max.into()))
            }
            SessionCtl::Sps(value) => {
                let sps = self.update_config(|c| {
                    if let Some(sps) = value {
                        c.limits.sessions_per_second = sps;
                    }
                    c.limits.sessions_per_second
                });
                Ok(CtlResponse::Int(sps.into()))
            }
            SessionCtl::MinDtmfDuration(value) => {
                let min = self.update_config(|c| {
                    if let Some(min) = value {
                        let dtmf = &mut c.dtmf;
                        dtmf.min_duration = min;
                        dtmf.max_duration = dtmf.max_duration.max(min);
                        dtmf.default_duration = dtmf.default_duration.max(min);
                    }
                    c.dtmf.min_duration
                });
                Ok(CtlResponse::Int(min.into()))
            }
            SessionCtl::MaxDtmfDuration(value) => {
                let max = self.update_config(|c| {
                    if let Some(max) = value {
                        let dtmf = &mut c.dtmf;
                        dtmf.max_duration = max.max(dtmf.min_duration);
                        dtmf.default_duration = dtmf.default_duration.min(dtmf.max_duration);
                    }
                    c.dtmf.max_duration
                });
                Ok(CtlResponse::Int(max.into()))
            }
            SessionCtl::DefaultDtmfDuration(value) => {
                let default = self.update_config(|c| {
                    if let Some(default) = value {
                        let dtmf = &mut c.dtmf;
                        dtmf.default_duration = default.clamp(dtmf.min_duration, dtmf.max_duration);
                    }
                    c.dtmf.default_duration
                });
                Ok(CtlResponse::Int(default.into()))
            }
            SessionCtl::Heartbeat(value) => {
                let secs = self.update_config(|c| {
                    if let Some(secs) = value {
                        c.heartbeat_interval_secs = secs;
                    }
                    c.heartbeat_interval_secs
                });
                Ok(CtlResponse::Int(i64::try_from(secs).unwrap_or(i64::MAX)))
            }
            SessionCtl::DbPool(value) => {
                let size = self.update_config(|c| {
                    if let Some(size) = value {
                        c.db.pool_size = size.max(1);
                    }
                    c.db.pool_size
                });
                Ok(CtlResponse::Int(size.into()))
            }
            SessionCtl::SessionCount => Ok(CtlResponse::Int(self.sessions.count() as i64)),
            SessionCtl::SessionsPeak => Ok(CtlResponse::Int(self.sessions.sessions_peak() as i64)),
            SessionCtl::LastSps => Ok(CtlResponse::Int(self.sessions.sps_last().into())),
            SessionCtl::SpsPeak => Ok(CtlResponse::Int(self.sessions.sps_peak().into())),
            SessionCtl::Ready => Ok(CtlResponse::Bool(self.is_ready())),
            SessionCtl::Crash => {
                warn!("Crash requested through the control surface");
                Ok(CtlResponse::Abort)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::types::CallDirection;

    #[tokio::test]
    async fn test_pause_and_resume() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        runtime.ctl(SessionCtl::Pause(PauseDirection::Outbound)).await.unwrap();
        assert!(runtime.check_accepting(CallDirection::Outbound).is_err());
        assert!(runtime.check_accepting(CallDirection::Inbound).is_ok());

        runtime.ctl(SessionCtl::Resume(PauseDirection::Both)).await.unwrap();
        assert!(runtime.check_accepting(CallDirection::Outbound).is_ok());
    }

    #[tokio::test]
    async fn test_dtmf_bounds_stay_ordered() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        assert_eq!(
            runtime.ctl(SessionCtl::MinDtmfDuration(Some(3000))).await.unwrap(),
            CtlResponse::Int(3000)
        );
        let dtmf = runtime.config().dtmf;
        assert_eq!(dtmf.default_duration, 3000);

        assert_eq!(
            runtime.ctl(SessionCtl::MaxDtmfDuration(Some(100))).await.unwrap(),
            CtlResponse::Int(3000)
        );
        assert_eq!(
            runtime.ctl(SessionCtl::DefaultDtmfDuration(Some(9000))).await.unwrap(),
            CtlResponse::Int(3000)
        );
        let dtmf = runtime.config().dtmf;
        assert!(dtmf.min_duration <= dtmf.default_duration && dtmf.default_duration <= dtmf.max_duration);
    }

    #[tokio::test]
    async fn test_limits_read_and_write() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        assert_eq!(runtime.ctl(SessionCtl::MaxSessions(None)).await.unwrap(), CtlResponse::Int(1000));
        assert_eq!(runtime.ctl(SessionCtl::MaxSessions(Some(2))).await.unwrap(), CtlResponse::Int(2));
        assert_eq!(runtime.config().limits.max_sessions, 2);
        assert_eq!(runtime.ctl(SessionCtl::Sps(Some(5))).await.unwrap(), CtlResponse::Int(5));
        assert_eq!(runtime.ctl(SessionCtl::Heartbeat(Some(0))).await.unwrap(), CtlResponse::Int(0));
        assert!(runtime.config().heartbeat_interval().is_none());
        assert_eq!(runtime.ctl(SessionCtl::DbPool(Some(0))).await.unwrap(), CtlResponse::Int(1));
    }

    #[tokio::test]
    async fn test_log_level_needs_handle() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        let err = runtime.ctl(SessionCtl::GetLogLevel).await.unwrap_err();
        assert!(matches!(err, SwitchError::Config(_)));
    }

    #[tokio::test]
    async fn test_exit_commands_are_returned() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        assert_eq!(
            runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Now)).await.unwrap(),
            CtlResponse::Exit(0)
        );
        assert_eq!(runtime.ctl(SessionCtl::Crash).await.unwrap(), CtlResponse::Abort);
        assert!(!runtime.is_stopped());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_can_be_cancelled() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        runtime.ctl(SessionCtl::Pause(PauseDirection::Both)).await.unwrap();
        assert_eq!(runtime.ctl(SessionCtl::ShutdownCancel).await.unwrap(), CtlResponse::Bool(false));

        runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Graceful)).await.unwrap();
        assert!(runtime.flags().test(RuntimeFlag::ShutdownRequested));
        assert_eq!(runtime.ctl(SessionCtl::ShutdownCancel).await.unwrap(), CtlResponse::Bool(true));
        assert!(!runtime.flags().test(RuntimeFlag::ShutdownRequested));
        assert!(runtime.check_accepting(CallDirection::Inbound).is_ok());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_with_no_sessions_stops() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        runtime.start().unwrap();
        runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Graceful)).await.unwrap();
        for _ in 0..100 {
            if runtime.is_stopped() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(runtime.is_stopped());
        assert!(runtime.flags().test(RuntimeFlag::ShuttingDown));
    }
}
