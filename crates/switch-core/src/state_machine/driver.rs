//! The per-session driver loop

use super::handler::{dispatch, HandlerOutcome, StateHandler};
use super::standard::StandardHandlers;
use super::Signal;
use crate::channel::{ChannelFlag, ChannelState};
use crate::errors::{Result, SwitchError};
use crate::event::EventType;
use crate::session::Session;
use crate::types::HangupCause;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Longest the driver sleeps in an idle state without re-checking
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Clears the session's running flag when the driver exits, however it exits
struct RunningFlag<'a>(&'a Session);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.driver_flag().store(false, Ordering::Release);
    }
}

/// Drives one session's channel from NEW to DESTROY.
///
/// Each state entered runs the global handlers in registration order, then
/// the endpoint's handler, then the built-in behavior. Pending signals are
/// checked before every handler call. Once HANGUP is entered the driver
/// always walks REPORTING and DESTROY, whatever the handlers return.
pub struct StateMachine {
    session: Arc<Session>,
    endpoint_handler: Option<Arc<dyn StateHandler>>,
}

impl StateMachine {
    /// Run the driver to completion on the current task. Fails with `InUse`
    /// if another driver is already running for this session.
    pub async fn run(session: Arc<Session>) -> Result<()> {
        if session
            .driver_flag()
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SwitchError::in_use(format!("session {} state machine", session.id())));
        }
        let _running = RunningFlag(&session);

        if session.rwlock().is_closed() {
            return Err(SwitchError::ChannelNotReady {
                uuid: session.id().to_string(),
            });
        }

        let endpoint_handler = session.endpoint()?.state_handler();
        let machine = StateMachine {
            session: session.clone(),
            endpoint_handler,
        };
        debug!(uuid = %session.id(), name = %session.channel().name(), "State machine started");
        machine.drive().await;
        debug!(uuid = %session.id(), "State machine finished");
        Ok(())
    }

    async fn drive(&self) {
        let session = &self.session;
        let channel = session.channel();
        let mut entered: Option<ChannelState> = None;

        loop {
            self.check_signals().await;

            let state = channel.state();
            if entered != Some(state) {
                let previous = channel.running_state();
                channel.set_running_state(state);
                entered = Some(state);

                if previous == ChannelState::Park && state != ChannelState::Park {
                    channel.clear_flag(ChannelFlag::Park);
                    session.fire_channel_event(EventType::ChannelUnpark, |_| {});
                }
                debug!(
                    uuid = %session.id(),
                    name = %channel.name(),
                    "State change {} -> {}",
                    previous,
                    state
                );
                session.fire_channel_event(EventType::ChannelState, |_| {});

                self.run_state(state).await;

                match state {
                    ChannelState::New => {
                        if channel.state() == ChannelState::New {
                            if let Err(e) = channel.request_state(ChannelState::Init) {
                                warn!(uuid = %session.id(), error = %e, "Could not leave NEW");
                            }
                        }
                    }
                    ChannelState::Hangup => channel.force_state(ChannelState::Reporting),
                    ChannelState::Reporting => channel.force_state(ChannelState::Destroy),
                    ChannelState::Destroy => {
                        let runtime = session.runtime().clone();
                        runtime.sessions().destroy(&runtime, session).await;
                        return;
                    }
                    _ => {}
                }
                continue;
            }

            self.idle(state).await;
        }
    }

    /// Act on pending signals. KILL hangs the channel up; XFER sends a live
    /// channel back to ROUTING; BREAK only reaches the endpoint.
    async fn check_signals(&self) {
        let session = &self.session;
        let channel = session.channel();
        let signals = session.signals();
        if !signals.any_pending() {
            return;
        }

        if signals.take(Signal::Kill) {
            if !channel.state().is_hungup() {
                session.hangup(HangupCause::NormalClearing);
                signals.take(Signal::Kill);
            }
            self.notify_endpoint(Signal::Kill).await;
        }
        if signals.take(Signal::Xfer) {
            if channel.ready() && channel.state() != ChannelState::Routing {
                if let Err(e) = channel.request_state(ChannelState::Routing) {
                    debug!(uuid = %session.id(), error = %e, "Transfer signal ignored");
                }
            }
            self.notify_endpoint(Signal::Xfer).await;
        }
        if signals.take(Signal::Break) {
            self.notify_endpoint(Signal::Break).await;
        }
    }

    async fn notify_endpoint(&self, signal: Signal) {
        let endpoint = match self.session.endpoint() {
            Ok(endpoint) => endpoint,
            Err(_) => return,
        };
        if let Err(e) = endpoint.kill_channel(&self.session, signal).await {
            debug!(uuid = %self.session.id(), %signal, error = %e, "Endpoint kill_channel failed");
        }
    }

    /// Run every handler for `state`
    async fn run_state(&self, state: ChannelState) {
        let session = &self.session;
        let channel = session.channel();
        let unconditional = state.is_hungup();

        let mut handlers = session.runtime().state_handlers().snapshot();
        if let Some(handler) = &self.endpoint_handler {
            handlers.push(handler.clone());
        }

        for handler in &handlers {
            if !unconditional && self.must_stop(state) {
                return;
            }
            match dispatch(handler.as_ref(), state, session).await {
                Ok(HandlerOutcome::Continue) => {}
                Ok(HandlerOutcome::Exclusive) => return,
                Ok(HandlerOutcome::Transition(next)) => {
                    if unconditional {
                        warn!(uuid = %session.id(), handler = handler.name(), %next, "Transition ignored after hangup");
                        continue;
                    }
                    if let Err(e) = channel.request_state(next) {
                        warn!(uuid = %session.id(), handler = handler.name(), error = %e, "Handler requested an invalid transition");
                    }
                    return;
                }
                Err(e) => {
                    self.handler_failed(handler.name(), state, &e);
                    if !unconditional {
                        return;
                    }
                }
            }
        }

        if !unconditional && self.must_stop(state) {
            return;
        }
        if let Err(e) = dispatch(&StandardHandlers, state, session).await {
            self.handler_failed("standard", state, &e);
        }
    }

    fn must_stop(&self, state: ChannelState) -> bool {
        let session = &self.session;
        session.channel().state() != state || session.signals().is_pending(Signal::Kill)
    }

    fn handler_failed(&self, handler: &str, state: ChannelState, e: &SwitchError) {
        let session = &self.session;
        error!(uuid = %session.id(), handler, %state, error = %e, "State handler failed");
        if !session.channel().state().is_hungup() {
            let cause = e.hangup_cause().unwrap_or(HangupCause::NormalTemporaryFailure);
            session.hangup(cause);
        }
    }

    /// Nothing to run: deliver queued work, beat the heartbeat and wait for
    /// a wake-up
    async fn idle(&self, state: ChannelState) {
        let session = &self.session;

        session.dispatch_queued_messages().await;

        if matches!(state, ChannelState::SoftExecute | ChannelState::Park) {
            while let Some(app) = session.next_queued_application() {
                if session.interrupted(state) {
                    break;
                }
                if let Err(e) = session.execute_application(&app.application, &app.data).await {
                    if !matches!(e, SwitchError::Break) {
                        warn!(uuid = %session.id(), application = %app.application, error = %e, "Queued application failed");
                    }
                }
                session.signals().take(Signal::Break);
            }
        }

        let now = Instant::now();
        let mut deadline = now + IDLE_WAIT;
        if let Some(next) = session.heartbeat_tick(now) {
            deadline = deadline.min(next);
        }

        if session.channel().state() != state || session.signals().any_pending() {
            return;
        }
        let notified = session.wake().notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("session", &self.session.id())
            .finish()
    }
}

