//! Call state and metadata owned by a session
//!
//! Modules hold `Arc<Channel>` references but never move the state machine
//! themselves: they *request* a state, and the session's driver task is the
//! only one that makes it the running state. Everything here is safe to call
//! from any task.

mod caller_profile;
mod flags;
mod state;

pub use caller_profile::{CallerProfile, Extension, ExtensionApp, Timetable};
pub use flags::{ChannelFlag, ChannelFlags};
pub use state::ChannelState;

use crate::errors::{Result, SwitchError};
use crate::state_machine::{Signal, SignalSet};
use crate::types::{CallDirection, HangupCause, SessionId};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct StateInfo {
    /// Requested state
    state: ChannelState,
    /// State the driver is currently executing
    running: ChannelState,
    /// Previous running state
    last: ChannelState,
}

#[derive(Debug, Default)]
struct Profiles {
    current: Option<Arc<CallerProfile>>,
    history: Vec<Arc<CallerProfile>>,
}

pub struct Channel {
    uuid: SessionId,
    direction: CallDirection,
    name: RwLock<String>,
    state: Mutex<StateInfo>,
    flags: ChannelFlags,
    cause: Mutex<HangupCause>,
    variables: RwLock<IndexMap<String, String>>,
    profiles: RwLock<Profiles>,
    extension: RwLock<Option<Arc<Extension>>>,
    timetable: Mutex<Timetable>,
    signals: Arc<SignalSet>,
    wake: Arc<Notify>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("uuid", &self.uuid)
            .field("name", &*self.name.read())
            .field("state", &self.state())
            .field("running_state", &self.running_state())
            .field("flags", &self.flags)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        uuid: SessionId,
        direction: CallDirection,
        signals: Arc<SignalSet>,
        wake: Arc<Notify>,
    ) -> Self {
        let flags = ChannelFlags::new();
        if direction == CallDirection::Outbound {
            flags.set(ChannelFlag::Outbound);
        }
        Self {
            uuid,
            direction,
            name: RwLock::new(format!("N/A/{}", uuid)),
            state: Mutex::new(StateInfo {
                state: ChannelState::New,
                running: ChannelState::New,
                last: ChannelState::New,
            }),
            flags,
            cause: Mutex::new(HangupCause::None),
            variables: RwLock::new(IndexMap::new()),
            profiles: RwLock::new(Profiles::default()),
            extension: RwLock::new(None),
            timetable: Mutex::new(Timetable {
                created: Some(Utc::now()),
                ..Timetable::default()
            }),
            signals,
            wake,
        }
    }

    pub fn uuid(&self) -> SessionId {
        self.uuid
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    /// The requested state
    pub fn state(&self) -> ChannelState {
        self.state.lock().state
    }

    /// The state the driver is executing
    pub fn running_state(&self) -> ChannelState {
        self.state.lock().running
    }

    pub fn last_state(&self) -> ChannelState {
        self.state.lock().last
    }

    /// Ask the driver to move to `next`.
    ///
    /// Re-requesting a hung-up channel's current state is accepted as a no-op;
    /// anything [`ChannelState::can_transition_to`] refuses is an error.
    pub fn request_state(&self, next: ChannelState) -> Result<ChannelState> {
        let mut info = self.state.lock();
        if !info.state.can_transition_to(next) {
            return Err(SwitchError::InvalidTransition {
                from: info.state.to_string(),
                to: next.to_string(),
            });
        }
        if info.state != next {
            debug!(uuid = %self.uuid, from = %info.state, to = %next, "State change requested");
            info.state = next;
        }
        drop(info);
        self.wake.notify_one();
        Ok(next)
    }

    /// Record what the driver is now running
    pub(crate) fn set_running_state(&self, running: ChannelState) {
        let mut info = self.state.lock();
        if info.running != running {
            info.last = info.running;
            info.running = running;
        }
        if info.state < running {
            info.state = running;
        }
    }

    /// Driver-only override used for HANGUP → REPORTING → DESTROY
    pub(crate) fn force_state(&self, state: ChannelState) {
        self.state.lock().state = state;
        self.wake.notify_one();
    }

    /// Live and not hung up
    pub fn ready(&self) -> bool {
        let info = *self.state.lock();
        !info.state.is_hungup()
            && !info.running.is_hungup()
            && !self.flags.test(ChannelFlag::DestroyRequested)
    }

    /// Move the channel to HANGUP with `cause`. The first cause recorded wins
    /// and later calls only re-raise KILL. Returns the state after the call.
    pub fn hangup(&self, cause: HangupCause) -> ChannelState {
        let mut info = self.state.lock();
        if info.state.is_hungup() {
            return info.state;
        }
        info.state = ChannelState::Hangup;
        drop(info);
        {
            let mut current = self.cause.lock();
            if *current == HangupCause::None {
                *current = cause;
            }
        }
        self.timetable.lock().hungup = Some(Utc::now());
        self.set_variable("hangup_cause", cause.as_str());
        info!(uuid = %self.uuid, name = %self.name(), %cause, "Hangup");
        self.signals.raise(Signal::Kill);
        self.wake.notify_one();
        ChannelState::Hangup
    }

    pub fn cause(&self) -> HangupCause {
        *self.cause.lock()
    }

    pub fn flags(&self) -> &ChannelFlags {
        &self.flags
    }

    pub fn set_flag(&self, flag: ChannelFlag) {
        self.flags.set(flag);
    }

    pub fn clear_flag(&self, flag: ChannelFlag) {
        self.flags.clear(flag);
    }

    pub fn test_flag(&self, flag: ChannelFlag) -> bool {
        self.flags.test(flag)
    }

    /// Mark answered; returns false if it already was
    pub fn mark_answered(&self) -> bool {
        if self.flags.test_and_set(ChannelFlag::Answered) {
            return false;
        }
        self.timetable.lock().answered = Some(Utc::now());
        true
    }

    pub fn mark_early_media(&self) -> bool {
        if self.flags.test_and_set(ChannelFlag::EarlyMedia) {
            return false;
        }
        self.timetable.lock().progress = Some(Utc::now());
        true
    }

    pub fn signals(&self) -> &SignalSet {
        &self.signals
    }

    pub fn raise(&self, signal: Signal) {
        self.signals.raise(signal);
        self.wake.notify_one();
    }

    pub fn set_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.write().insert(name.into(), value.into());
    }

    pub fn unset_variable(&self, name: &str) -> Option<String> {
        self.variables.write().shift_remove(name)
    }

    pub fn variable(&self, name: &str) -> Option<String> {
        self.variables.read().get(name).cloned()
    }

    /// All variables in insertion order
    pub fn variables(&self) -> Vec<(String, String)> {
        self.variables
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace each `${name}` in `input` with the channel variable, falling
    /// back to `globals`. Unknown names expand to nothing; an unterminated
    /// reference is copied through.
    pub fn expand_variables<F>(&self, input: &str, globals: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        if !input.contains("${") {
            return input.to_string();
        }
        let vars = self.variables.read();
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match vars.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            if let Some(value) = globals(name) {
                                out.push_str(&value);
                            }
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn caller_profile(&self) -> Option<Arc<CallerProfile>> {
        self.profiles.read().current.clone()
    }

    /// Install a new current profile; the previous one moves to history
    pub fn set_caller_profile(&self, profile: CallerProfile) {
        let mut profiles = self.profiles.write();
        if let Some(previous) = profiles.current.take() {
            profiles.history.push(previous);
        }
        profiles.current = Some(Arc::new(profile));
    }

    /// Profiles replaced by transfers, oldest first
    pub fn profile_history(&self) -> Vec<Arc<CallerProfile>> {
        self.profiles.read().history.clone()
    }

    pub fn extension(&self) -> Option<Arc<Extension>> {
        self.extension.read().clone()
    }

    pub fn set_extension(&self, extension: Option<Extension>) {
        *self.extension.write() = extension.map(Arc::new);
    }

    pub fn timetable(&self) -> Timetable {
        self.timetable.lock().clone()
    }

    pub(crate) fn mark_transferred(&self) {
        self.timetable.lock().transferred = Some(Utc::now());
    }
}
