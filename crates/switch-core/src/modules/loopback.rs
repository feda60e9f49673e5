//! The `loopback` endpoint
//!
//! A leg with no network behind it: every frame written is read back, paced
//! by the `soft` timer. With nothing queued a read yields silence. Used for
//! testing dialplans and for originating calls that only run applications.

use crate::channel::{CallerProfile, ChannelFlag};
use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use crate::interface::{Endpoint, InterfaceGuard, Module, ModuleInterfaces, TimerHandle, TimerInterface};
use crate::message::{Message, MessageKind};
use crate::runtime::CoreRuntime;
use crate::session::Session;
use crate::state_machine::{HandlerOutcome, Signal, StateHandler};
use crate::types::{CallDirection, HangupCause, OriginateFlags, PrivateSlot};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

pub const ENDPOINT_NAME: &str = "loopback";

const RATE: u32 = 8000;
const PTIME_MS: u32 = 20;
/// Frames buffered for echo before the oldest is dropped
const MAX_BUFFERED: usize = 50;

/// Per-session endpoint state, kept in the primary private slot
struct LoopbackPvt {
    frames: Mutex<VecDeque<Frame>>,
    timer: tokio::sync::Mutex<Box<dyn TimerHandle>>,
    killed: AtomicBool,
    interrupt: Notify,
    seq: AtomicU16,
    _timer_interface: InterfaceGuard<dyn TimerInterface>,
}

impl LoopbackPvt {
    fn new(runtime: &CoreRuntime) -> Result<Self> {
        let timer_interface = runtime
            .modules()
            .timer("soft")
            .ok_or_else(|| SwitchError::not_found("timer", "soft"))?;
        let timer = timer_interface.create(Duration::from_millis(u64::from(PTIME_MS)), RATE / 1000 * PTIME_MS)?;
        Ok(Self {
            frames: Mutex::new(VecDeque::new()),
            timer: tokio::sync::Mutex::new(timer),
            killed: AtomicBool::new(false),
            interrupt: Notify::new(),
            seq: AtomicU16::new(0),
            _timer_interface: timer_interface,
        })
    }
}

pub struct LoopbackEndpoint {
    handler: Arc<LoopbackStateHandler>,
}

impl Default for LoopbackEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEndpoint {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(LoopbackStateHandler),
        }
    }

    /// The session's state, created on first use
    fn pvt(session: &Session) -> Result<Arc<LoopbackPvt>> {
        if let Some(pvt) = session.private::<LoopbackPvt>(PrivateSlot::Primary) {
            return Ok(pvt);
        }
        let pvt = Arc::new(LoopbackPvt::new(session.runtime())?);
        session.set_private(PrivateSlot::Primary, pvt.clone());
        Ok(pvt)
    }
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    fn name(&self) -> &str {
        ENDPOINT_NAME
    }

    async fn outgoing_channel(
        &self,
        runtime: &Arc<CoreRuntime>,
        profile: &CallerProfile,
        flags: OriginateFlags,
    ) -> Result<Arc<Session>> {
        let endpoint = runtime
            .modules()
            .endpoint(ENDPOINT_NAME)
            .ok_or_else(|| SwitchError::not_found("endpoint", ENDPOINT_NAME))?;
        let session = runtime
            .sessions()
            .request(runtime, endpoint, CallDirection::Outbound, flags)
            .await?;

        let channel = session.channel();
        channel.set_name(format!("{}/{}", ENDPOINT_NAME, profile.destination_number));
        let mut profile = profile.clone();
        profile.source = ENDPOINT_NAME.to_string();
        channel.set_caller_profile(profile);
        channel.set_flag(ChannelFlag::Outbound);
        if let Err(e) = Self::pvt(&session) {
            // No driver yet, so nothing else will walk it to DESTROY
            session.hangup(HangupCause::DestinationOutOfOrder);
            runtime.sessions().destroy(runtime, &session).await;
            return Err(e);
        }
        debug!(uuid = %session.id(), name = %channel.name(), "Loopback channel created");
        Ok(session)
    }

    async fn read_frame(&self, session: &Arc<Session>, _stream: usize) -> Result<Frame> {
        let pvt = Self::pvt(session)?;
        if pvt.killed.load(Ordering::Acquire) {
            return Err(SwitchError::ChannelNotReady {
                uuid: session.id().to_string(),
            });
        }

        let samplecount = {
            let mut timer = pvt.timer.lock().await;
            tokio::select! {
                ticked = timer.next() => ticked?,
                _ = pvt.interrupt.notified() => {
                    return Err(SwitchError::ChannelNotReady {
                        uuid: session.id().to_string(),
                    });
                }
            }
            timer.samplecount()
        };

        let seq = pvt.seq.fetch_add(1, Ordering::Relaxed);
        let frame = pvt
            .frames
            .lock()
            .pop_front()
            .unwrap_or_else(|| Frame::silence(RATE, PTIME_MS));
        Ok(frame.with_timestamp(samplecount as u32, seq))
    }

    async fn write_frame(&self, session: &Arc<Session>, frame: Frame, _stream: usize) -> Result<()> {
        let pvt = Self::pvt(session)?;
        let mut frames = pvt.frames.lock();
        if frames.len() >= MAX_BUFFERED {
            frames.pop_front();
            trace!(uuid = %session.id(), "Loopback buffer full, dropping oldest frame");
        }
        frames.push_back(frame);
        Ok(())
    }

    async fn kill_channel(&self, session: &Arc<Session>, signal: Signal) -> Result<()> {
        if signal != Signal::Kill {
            return Ok(());
        }
        if let Some(pvt) = session.private::<LoopbackPvt>(PrivateSlot::Primary) {
            pvt.killed.store(true, Ordering::Release);
            pvt.interrupt.notify_one();
        }
        Ok(())
    }

    async fn receive_message(&self, session: &Arc<Session>, message: &mut Message) -> Result<()> {
        if message.kind == MessageKind::Answer {
            debug!(uuid = %session.id(), "Loopback answered");
        }
        Ok(())
    }

    fn state_handler(&self) -> Option<Arc<dyn StateHandler>> {
        Some(self.handler.clone())
    }
}

struct LoopbackStateHandler;

#[async_trait]
impl StateHandler for LoopbackStateHandler {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn on_hangup(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        if let Some(pvt) = session.private::<LoopbackPvt>(PrivateSlot::Primary) {
            pvt.frames.lock().clear();
        }
        Ok(HandlerOutcome::Continue)
    }

    async fn on_destroy(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        session.clear_private(PrivateSlot::Primary);
        Ok(HandlerOutcome::Continue)
    }
}

/// Registers the `loopback` endpoint
pub struct LoopbackModule;

#[async_trait]
impl Module for LoopbackModule {
    fn name(&self) -> &str {
        "core_loopback"
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        interfaces.add_endpoint(Arc::new(LoopbackEndpoint::new()));
        Ok(())
    }
}
