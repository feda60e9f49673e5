//! Core configuration
//!
//! Boot-time values come from TOML plus `SWITCH_` environment overrides via
//! [`CoreConfig::load`]; every field stays mutable at runtime through the
//! control surface.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Session admission limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionLimits {
    /// Maximum concurrent sessions
    pub max_sessions: u32,
    /// New sessions admitted per one-second window
    pub sessions_per_second: u32,
    /// How long a request may wait for the throttle window before it is
    /// rejected
    pub throttle_wait_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            sessions_per_second: 30,
            throttle_wait_ms: 10_000,
        }
    }
}

/// DTMF duration bounds, in samples at 8kHz
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DtmfConfig {
    pub min_duration: u32,
    pub max_duration: u32,
    pub default_duration: u32,
}

impl Default for DtmfConfig {
    fn default() -> Self {
        Self {
            min_duration: 400,
            max_duration: 192_000,
            default_duration: 2000,
        }
    }
}

impl DtmfConfig {
    /// Clamp a requested duration into the configured bounds; zero selects the
    /// default duration
    pub fn clamp(&self, duration: u32) -> u32 {
        if duration == 0 {
            return self.default_duration;
        }
        duration.clamp(self.min_duration, self.max_duration.max(self.min_duration))
    }
}

/// Database handle pool tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DbConfig {
    pub pool_size: u32,
    pub timeout_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            timeout_ms: 5000,
        }
    }
}

/// Per-session queue capacities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub message_queue_len: usize,
    pub event_queue_len: usize,
    pub private_event_queue_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            message_queue_len: 5000,
            event_queue_len: 256,
            private_event_queue_len: 256,
        }
    }
}

/// Top-level configuration of the switching core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    /// Name this switch reports in events
    pub switchname: String,
    /// Fixed identity of this core; a random one is chosen when unset
    pub core_uuid: Option<uuid::Uuid>,
    pub limits: SessionLimits,
    pub dtmf: DtmfConfig,
    pub db: DbConfig,
    pub queues: QueueConfig,
    /// Runtime heartbeat interval; zero disables the heartbeat task
    pub heartbeat_interval_secs: u64,
    /// Destroyed pools kept for reuse
    pub pool_recycle_max: usize,
    /// Dialplan used when a caller profile names none
    pub default_dialplan: String,
    /// Context used when a caller profile names none
    pub default_context: String,
    /// Seconds a graceful shutdown waits for sessions to drain
    pub shutdown_grace_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            switchname: "rvoip-switch".to_string(),
            core_uuid: None,
            limits: SessionLimits::default(),
            dtmf: DtmfConfig::default(),
            db: DbConfig::default(),
            queues: QueueConfig::default(),
            heartbeat_interval_secs: 20,
            pool_recycle_max: 64,
            default_dialplan: "inline".to_string(),
            default_context: "default".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

impl CoreConfig {
    /// Load from an optional TOML file with `SWITCH_` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(rvoip_infra_common::load_config(path, "SWITCH")?)
    }

    /// Parse from a TOML document
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Ok(rvoip_infra_common::load_config_str(toml)?)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    pub fn throttle_wait(&self) -> Duration {
        Duration::from_millis(self.limits.throttle_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.limits.max_sessions, 1000);
        assert_eq!(config.queues.event_queue_len, 256);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoreConfig::from_toml_str(
            r#"
            heartbeat_interval_secs = 0
            [limits]
            max_sessions = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.limits.max_sessions, 50);
        assert_eq!(config.limits.sessions_per_second, 30);
        assert!(config.heartbeat_interval().is_none());
        assert_eq!(config.dtmf, DtmfConfig::default());
    }

    #[test]
    fn test_dtmf_clamp() {
        let dtmf = DtmfConfig::default();
        assert_eq!(dtmf.clamp(0), 2000);
        assert_eq!(dtmf.clamp(10), 400);
        assert_eq!(dtmf.clamp(1_000_000), 192_000);
        assert_eq!(dtmf.clamp(1600), 1600);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("SWITCH_LIMITS__MAX_SESSIONS", "321");
        std::env::set_var("SWITCH_SWITCHNAME", "edge-7");
        let config = CoreConfig::load(None);
        std::env::remove_var("SWITCH_LIMITS__MAX_SESSIONS");
        std::env::remove_var("SWITCH_SWITCHNAME");
        let config = config.unwrap();
        assert_eq!(config.limits.max_sessions, 321);
        assert_eq!(config.switchname, "edge-7");
        assert_eq!(config.limits.sessions_per_second, 30);
    }
}
