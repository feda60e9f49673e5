//! Error handling for the switching core
//!
//! Every fallible operation returns [`Result`]. Errors carry enough context to
//! log, and [`SwitchError::status`] folds them back onto the coarse status
//! taxonomy that modules branch on.

use crate::types::HangupCause;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, SwitchError>;

/// Coarse outcome of a core operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    /// Soft negative, nothing went wrong but the answer is no
    False,
    Timeout,
    Restart,
    /// Try again
    Intr,
    NotImpl,
    /// Allocation or bounded resource exhausted
    MemErr,
    GenErr,
    InUse,
    /// Non-fatal interruption
    Break,
    NotFound,
    Unload,
    NoUnload,
    /// Queue or stream terminated
    Eof,
}

impl Status {
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

/// Errors produced by the switching core
#[derive(Debug, Error)]
pub enum SwitchError {
    /// The configured session cap has been reached
    #[error("Session limit reached ({max} sessions)")]
    SessionLimit { max: u32 },

    /// The sessions-per-second throttle did not open up in time
    #[error("Session rate limit exceeded ({sps}/s)")]
    RateLimited { sps: u32 },

    /// New sessions are refused (paused or shutting down)
    #[error("New sessions are not accepted: {reason}")]
    NotAccepting { reason: String, cause: HangupCause },

    /// Lookup by name or uuid failed
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Resource is held by someone else
    #[error("{what} is in use")]
    InUse { what: String },

    /// A channel state change was refused
    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Operation requires a live channel
    #[error("Channel {uuid} is not ready")]
    ChannelNotReady { uuid: String },

    /// Queue push/pop after termination
    #[error("Queue terminated")]
    QueueTerminated,

    /// Non-blocking push on a full queue
    #[error("Queue full ({capacity} entries)")]
    QueueFull { capacity: usize },

    /// Bounded wait elapsed
    #[error("Operation timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Work interrupted by a BREAK or KILL signal
    #[error("Interrupted")]
    Break,

    /// Fixed-size per-session storage is exhausted
    #[error("Out of {what} slots (max {max})")]
    SlotsExhausted { what: &'static str, max: usize },

    /// Module lifecycle failure
    #[error("Module {name}: {reason}")]
    Module { name: String, reason: String },

    /// Module refused to unload
    #[error("Module {name} refused to unload")]
    NoUnload { name: String },

    /// Capability not provided by an interface
    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    /// Media bug rejected at attach time
    #[error("Media bug rejected: {reason}")]
    BugRejected { reason: String },

    /// Codec setup or transcoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// State handler reported a hard failure
    #[error("State handler failed: {0}")]
    Handler(String),

    /// Configuration problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn in_use(what: impl Into<String>) -> Self {
        Self::InUse { what: what.into() }
    }

    pub fn module(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Module {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Map onto the status taxonomy
    pub fn status(&self) -> Status {
        match self {
            SwitchError::SessionLimit { .. } | SwitchError::SlotsExhausted { .. } => Status::MemErr,
            SwitchError::RateLimited { .. } | SwitchError::QueueFull { .. } => Status::Intr,
            SwitchError::NotAccepting { .. } => Status::False,
            SwitchError::NotFound { .. } => Status::NotFound,
            SwitchError::InUse { .. } => Status::InUse,
            SwitchError::QueueTerminated => Status::Eof,
            SwitchError::Timeout { .. } => Status::Timeout,
            SwitchError::Break => Status::Break,
            SwitchError::NoUnload { .. } => Status::NoUnload,
            SwitchError::NotImplemented { .. } => Status::NotImpl,
            SwitchError::BugRejected { .. } | SwitchError::ChannelNotReady { .. } => Status::False,
            SwitchError::InvalidTransition { .. }
            | SwitchError::Module { .. }
            | SwitchError::Codec(_)
            | SwitchError::Handler(_)
            | SwitchError::Config(_)
            | SwitchError::Internal(_) => Status::GenErr,
        }
    }

    /// Cause reported to the peer when a new session is refused
    pub fn hangup_cause(&self) -> Option<HangupCause> {
        match self {
            SwitchError::SessionLimit { .. } | SwitchError::RateLimited { .. } => {
                Some(HangupCause::SwitchCongestion)
            }
            SwitchError::NotAccepting { cause, .. } => Some(*cause),
            SwitchError::NotFound { kind: "endpoint", .. } => Some(HangupCause::ChanNotImplemented),
            _ => None,
        }
    }
}

impl From<rvoip_infra_common::Error> for SwitchError {
    fn from(err: rvoip_infra_common::Error) -> Self {
        SwitchError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SwitchError::SessionLimit { max: 5 }.status(), Status::MemErr);
        assert_eq!(SwitchError::QueueTerminated.status(), Status::Eof);
        assert_eq!(SwitchError::not_found("session", "abc").status(), Status::NotFound);
        assert_eq!(SwitchError::Break.status(), Status::Break);
        assert!(!SwitchError::handler("boom").status().is_success());
    }

    #[test]
    fn test_rejection_causes() {
        assert_eq!(
            SwitchError::SessionLimit { max: 1 }.hangup_cause(),
            Some(HangupCause::SwitchCongestion)
        );
        let paused = SwitchError::NotAccepting {
            reason: "paused".into(),
            cause: HangupCause::SystemShutdown,
        };
        assert_eq!(paused.hangup_cause(), Some(HangupCause::SystemShutdown));
        assert_eq!(SwitchError::Break.hangup_cause(), None);
    }
}
