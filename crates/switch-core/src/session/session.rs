use super::guard::{SessionReadGuard, SessionWriteGuard};
use crate::channel::{CallerProfile, Channel, ChannelFlag, ChannelState, ExtensionApp};
use crate::errors::{Result, SwitchError};
use crate::event::{Event, EventType};
use crate::interface::{Codec, Endpoint, InterfaceGuard};
use crate::lock::SessionRwLock;
use crate::media_bug::{AbcType, BugChain, BugFlags, BugInfo, MediaBug};
use crate::message::{Message, MessageKind};
use crate::pool::MemoryPool;
use crate::queue::SessionQueue;
use crate::runtime::CoreRuntime;
use crate::state_machine::{Signal, SignalSet, StateMachine};
use crate::types::{
    CallDirection, Dtmf, HangupCause, MediaType, OriginateFlags, PrivateSlot, SessionId,
    PRIVATE_SLOT_COUNT,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Logical media streams a session may carry
pub const MAX_STREAMS: usize = 128;

const DTMF_QUEUE_LEN: usize = 128;
const APP_QUEUE_LEN: usize = 64;

type PrivateData = Arc<dyn Any + Send + Sync>;

/// Both codecs of a session, locked together
pub struct CodecLocks<'a> {
    pub read: MutexGuard<'a, Option<Codec>>,
    pub write: MutexGuard<'a, Option<Codec>>,
}

#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    interval: Duration,
    next: Instant,
}

/// One call leg: its channel, its resources and its driver task
pub struct Session {
    id: SessionId,
    numeric_id: u64,
    external_id: Mutex<Option<String>>,
    direction: CallDirection,
    originate_flags: OriginateFlags,
    created_at: DateTime<Utc>,
    runtime: Arc<CoreRuntime>,
    endpoint_name: String,
    endpoint: RwLock<Option<InterfaceGuard<dyn Endpoint>>>,
    channel: Arc<Channel>,
    pool: Mutex<Option<MemoryPool>>,
    rwlock: SessionRwLock,
    read_codec: Mutex<Option<Codec>>,
    write_codec: Mutex<Option<Codec>>,
    bugs: BugChain,
    next_bug_id: AtomicU64,
    message_queue: SessionQueue<Message>,
    event_queue: SessionQueue<Event>,
    private_event_queue: SessionQueue<Event>,
    dtmf_queue: SessionQueue<Dtmf>,
    app_queue: SessionQueue<ExtensionApp>,
    private: Mutex<[Option<PrivateData>; PRIVATE_SLOT_COUNT]>,
    streams: Mutex<Vec<MediaType>>,
    signals: Arc<SignalSet>,
    wake: Arc<Notify>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_launched: AtomicBool,
    driver_running: AtomicBool,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("numeric_id", &self.numeric_id)
            .field("direction", &self.direction)
            .field("endpoint", &self.endpoint_name)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        runtime: Arc<CoreRuntime>,
        endpoint: InterfaceGuard<dyn Endpoint>,
        numeric_id: u64,
        direction: CallDirection,
        originate_flags: OriginateFlags,
        pool: MemoryPool,
    ) -> Self {
        let id = SessionId::new();
        let signals = Arc::new(SignalSet::new());
        let wake = Arc::new(Notify::new());
        let channel = Arc::new(Channel::new(id, direction, signals.clone(), wake.clone()));
        if originate_flags.contains(OriginateFlags::BYPASS_MEDIA) {
            channel.set_flag(ChannelFlag::BypassMedia);
        }
        if originate_flags.contains(OriginateFlags::PROXY_MEDIA) {
            channel.set_flag(ChannelFlag::ProxyMedia);
        }
        let queues = runtime.config().queues;
        Self {
            id,
            numeric_id,
            external_id: Mutex::new(None),
            direction,
            originate_flags,
            created_at: Utc::now(),
            runtime,
            endpoint_name: endpoint.name().to_string(),
            endpoint: RwLock::new(Some(endpoint)),
            channel,
            pool: Mutex::new(Some(pool)),
            rwlock: SessionRwLock::new(),
            read_codec: Mutex::new(None),
            write_codec: Mutex::new(None),
            bugs: BugChain::new(),
            next_bug_id: AtomicU64::new(1),
            message_queue: SessionQueue::new("message", queues.message_queue_len),
            event_queue: SessionQueue::new("event", queues.event_queue_len),
            private_event_queue: SessionQueue::new("private_event", queues.private_event_queue_len),
            dtmf_queue: SessionQueue::new("dtmf", DTMF_QUEUE_LEN),
            app_queue: SessionQueue::new("application", APP_QUEUE_LEN),
            private: Mutex::new([None, None]),
            streams: Mutex::new(vec![MediaType::Audio]),
            signals,
            wake,
            thread: Mutex::new(None),
            thread_launched: AtomicBool::new(false),
            driver_running: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn numeric_id(&self) -> u64 {
        self.numeric_id
    }

    pub fn external_id(&self) -> Option<String> {
        self.external_id.lock().clone()
    }

    pub fn set_external_id(&self, external_id: impl Into<String>) {
        *self.external_id.lock() = Some(external_id.into());
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn originate_flags(&self) -> OriginateFlags {
        self.originate_flags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn runtime(&self) -> &Arc<CoreRuntime> {
        &self.runtime
    }

    /// The endpoint owning this leg; gone once the session is destroyed
    pub fn endpoint(&self) -> Result<Arc<dyn Endpoint>> {
        self.endpoint
            .read()
            .as_ref()
            .map(|e| e.implementation())
            .ok_or_else(|| SwitchError::ChannelNotReady {
                uuid: self.id.to_string(),
            })
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub(crate) fn rwlock(&self) -> &SessionRwLock {
        &self.rwlock
    }

    pub(crate) fn wake(&self) -> &Notify {
        &self.wake
    }

    pub(crate) fn driver_flag(&self) -> &AtomicBool {
        &self.driver_running
    }

    pub fn is_driver_running(&self) -> bool {
        self.driver_running.load(Ordering::Acquire)
    }

    /// Work with the session pool; `None` once the session is destroyed
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut MemoryPool) -> R) -> Option<R> {
        self.pool.lock().as_mut().map(f)
    }

    pub(crate) fn take_pool(&self) -> Option<MemoryPool> {
        self.pool.lock().take()
    }

    /// Take a read lock on a session already in hand
    #[track_caller]
    pub fn read_lock(self: &Arc<Self>) -> Result<SessionReadGuard> {
        let location = Location::caller();
        match self.rwlock.try_read(location) {
            Some((guard, token)) => Ok(SessionReadGuard::new(self.clone(), guard, token)),
            None => Err(SwitchError::not_found("session", self.id.to_string())),
        }
    }

    /// Take the write lock, waiting for every reader to drain
    #[track_caller]
    pub fn write_lock(self: &Arc<Self>) -> impl Future<Output = SessionWriteGuard> + Send + 'static {
        let location = Location::caller();
        let session = self.clone();
        async move {
            let (guard, token) = session.rwlock.write(location).await;
            SessionWriteGuard::new(session, guard, token)
        }
    }

    /// Readers currently holding the session
    pub fn lock_count(&self) -> usize {
        self.rwlock.readers()
    }

    /// Spawn the driver task. A session runs at most one.
    pub fn launch_thread(self: &Arc<Self>) -> Result<()> {
        if self.thread_launched.swap(true, Ordering::AcqRel) {
            return Err(SwitchError::in_use(format!("session {} thread", self.id)));
        }
        let session = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = StateMachine::run(session.clone()).await {
                warn!(uuid = %session.id(), error = %e, "State machine did not run");
            }
        });
        *self.thread.lock() = Some(handle);
        debug!(uuid = %self.id, "Session thread launched");
        Ok(())
    }

    pub fn thread_launched(&self) -> bool {
        self.thread_launched.load(Ordering::Acquire)
    }

    /// Wait for the driver task to finish
    pub async fn join(&self) -> Result<()> {
        let handle = self.thread.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| SwitchError::internal(format!("session task failed: {}", e))),
            None => Ok(()),
        }
    }

    pub fn signal(&self, signal: Signal) {
        debug!(uuid = %self.id, %signal, "Signal raised");
        self.channel.raise(signal);
    }

    pub fn hangup(&self, cause: HangupCause) -> ChannelState {
        self.channel.hangup(cause)
    }

    /// Answer through the endpoint
    pub async fn answer(self: &Arc<Self>) -> Result<()> {
        if self.channel.test_flag(ChannelFlag::Answered) {
            return Ok(());
        }
        self.receive_message(Message::new(MessageKind::Answer)).await
    }

    pub async fn pre_answer(self: &Arc<Self>) -> Result<()> {
        if self.channel.test_flag(ChannelFlag::EarlyMedia) || self.channel.test_flag(ChannelFlag::Answered) {
            return Ok(());
        }
        self.receive_message(Message::new(MessageKind::Progress)).await
    }

    /// Send a new destination back through routing
    pub fn transfer(&self, destination: &str, dialplan: Option<&str>, context: Option<&str>) -> Result<()> {
        if !self.channel.ready() {
            return Err(SwitchError::ChannelNotReady {
                uuid: self.id.to_string(),
            });
        }
        let profile = match self.channel.caller_profile() {
            Some(current) => current.transferred(destination, dialplan, context),
            None => {
                let mut profile = CallerProfile::new(destination).with_source(self.endpoint_name.as_str());
                if let Some(dialplan) = dialplan {
                    profile.dialplan = dialplan.to_string();
                }
                if let Some(context) = context {
                    profile.context = context.to_string();
                }
                profile
            }
        };
        info!(
            uuid = %self.id,
            name = %self.channel.name(),
            destination,
            dialplan = %profile.dialplan,
            context = %profile.context,
            "Transfer"
        );
        let mut history = self.channel.variable("transfer_history").unwrap_or_default();
        if !history.is_empty() {
            history.push('|');
        }
        history.push_str(&format!("{}:{}", Utc::now().timestamp(), destination));
        self.channel.set_variable("transfer_history", history);
        self.channel.set_caller_profile(profile);
        self.channel.set_extension(None);
        self.channel.mark_transferred();
        self.channel.set_flag(ChannelFlag::Transfer);
        self.channel.request_state(ChannelState::Routing)?;
        self.app_queue.flush();
        self.signal(Signal::Xfer);
        self.signal(Signal::Break);
        self.fire_channel_event(EventType::ChannelTransfer, |e| {
            e.add_header("Transfer-Destination", destination);
        });
        Ok(())
    }

    /// Sleep unless interrupted by KILL, XFER, BREAK or a state change
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let state = self.channel.state();
        loop {
            if self.interrupted(state) {
                return Err(SwitchError::Break);
            }
            let notified = self.wake.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
            }
        }
    }

    /// True when work started in `state` should stop
    pub fn interrupted(&self, state: ChannelState) -> bool {
        !self.channel.ready()
            || self.channel.state() != state
            || self.signals.is_pending(Signal::Kill)
            || self.signals.is_pending(Signal::Xfer)
            || self.signals.is_pending(Signal::Break)
    }

    pub(crate) fn signals(&self) -> &SignalSet {
        &self.signals
    }

    /// `${var}` expansion against the channel then the runtime globals
    pub fn expand(&self, input: &str) -> String {
        self.channel
            .expand_variables(input, |name| self.runtime.global_variable(name))
    }

    // Codecs

    pub fn set_read_codec(&self, codec: Option<Codec>) {
        if let Some(codec) = &codec {
            debug!(uuid = %self.id, codec = codec.name(), "Read codec set");
        }
        *self.read_codec.lock() = codec;
    }

    pub fn set_write_codec(&self, codec: Option<Codec>) {
        if let Some(codec) = &codec {
            debug!(uuid = %self.id, codec = codec.name(), "Write codec set");
        }
        *self.write_codec.lock() = codec;
    }

    pub fn read_codec_name(&self) -> Option<String> {
        self.read_codec.lock().as_ref().map(|c| c.name().to_string())
    }

    pub fn write_codec_name(&self) -> Option<String> {
        self.write_codec.lock().as_ref().map(|c| c.name().to_string())
    }

    pub(crate) fn read_codec(&self) -> MutexGuard<'_, Option<Codec>> {
        self.read_codec.lock()
    }

    pub(crate) fn write_codec(&self) -> MutexGuard<'_, Option<Codec>> {
        self.write_codec.lock()
    }

    /// Lock both codecs. Never blocks on one while holding the other, so a
    /// caller locking write-then-read elsewhere cannot deadlock with this.
    pub fn lock_codecs_full(&self) -> CodecLocks<'_> {
        loop {
            if let Some(read) = self.read_codec.try_lock() {
                if let Some(write) = self.write_codec.try_lock() {
                    return CodecLocks { read, write };
                }
            }
            std::thread::yield_now();
        }
    }

    pub(crate) fn release_codecs(&self) {
        let mut locks = self.lock_codecs_full();
        locks.read.take();
        locks.write.take();
    }

    // Media bugs

    /// Attach a media bug. Refused while the channel pauses bugs (unless
    /// `NO_PAUSE`) or once teardown has begun; a refusal has no side effects.
    pub fn media_bug_add<F>(
        &self,
        function: &str,
        target: MediaType,
        flags: BugFlags,
        stop_time: Option<Instant>,
        callback: F,
    ) -> Result<Arc<MediaBug>>
    where
        F: FnMut(&MediaBug, AbcType) -> bool + Send + 'static,
    {
        if self.channel.test_flag(ChannelFlag::PauseBugs) && !flags.contains(BugFlags::NO_PAUSE) {
            return Err(SwitchError::BugRejected {
                reason: "media bugs are paused".to_string(),
            });
        }
        if self.channel.test_flag(ChannelFlag::DestroyRequested)
            || self.channel.running_state() == ChannelState::Destroy
        {
            return Err(SwitchError::BugRejected {
                reason: "session is being destroyed".to_string(),
            });
        }
        let bug = Arc::new(MediaBug::new(
            self.next_bug_id.fetch_add(1, Ordering::Relaxed),
            self.id,
            function,
            target,
            flags,
            stop_time,
            Box::new(callback),
        ));
        let bug = self.bugs.add(bug)?;
        self.fire_channel_event(EventType::MediaBugStart, |e| {
            e.add_header("Media-Bug-Function", function);
            e.add_header("Media-Bug-Target", format!("{:?}", target));
        });
        Ok(bug)
    }

    pub fn media_bug_remove(&self, bug: &Arc<MediaBug>) -> Result<()> {
        self.bugs.remove(bug)?;
        self.fire_channel_event(EventType::MediaBugStop, |e| {
            e.add_header("Media-Bug-Function", bug.function());
        });
        Ok(())
    }

    pub fn media_bug_remove_all_function(&self, function: &str) -> usize {
        let removed = self.bugs.remove_all_function(function);
        if removed > 0 {
            self.fire_channel_event(EventType::MediaBugStop, |e| {
                e.add_header("Media-Bug-Function", function);
            });
        }
        removed
    }

    pub fn media_bug_remove_all(&self) -> usize {
        self.bugs.remove_all()
    }

    pub fn media_bug_flush(&self, bug: &MediaBug) {
        bug.flush();
    }

    pub fn media_bug_flush_all(&self) {
        self.bugs.flush_all();
    }

    pub fn media_bug_count(&self) -> usize {
        self.bugs.count()
    }

    pub fn media_bug_count_function(&self, function: &str) -> usize {
        self.bugs.count_function(function)
    }

    pub fn media_bug_enumerate(&self) -> Vec<BugInfo> {
        self.bugs.enumerate()
    }

    pub fn media_bugs(&self) -> &BugChain {
        &self.bugs
    }

    // Messages, events, DTMF

    /// Deliver a message to this leg's endpoint now and apply its effect on
    /// the channel
    pub async fn receive_message(self: &Arc<Self>, mut message: Message) -> Result<()> {
        if self.channel.state() == ChannelState::Destroy {
            return Err(SwitchError::ChannelNotReady {
                uuid: self.id.to_string(),
            });
        }
        self.endpoint()?.receive_message(self, &mut message).await?;
        match &message.kind {
            MessageKind::Answer => {
                if self.channel.mark_answered() {
                    info!(uuid = %self.id, name = %self.channel.name(), "Channel answered");
                    self.fire_channel_event(EventType::ChannelAnswer, |_| {});
                }
            }
            MessageKind::Progress => {
                self.channel.mark_early_media();
            }
            MessageKind::Ringing => self.channel.set_flag(ChannelFlag::Ring),
            MessageKind::Hold => self.channel.set_flag(ChannelFlag::Hold),
            MessageKind::Unhold => self.channel.clear_flag(ChannelFlag::Hold),
            MessageKind::Bridge => self.channel.set_flag(ChannelFlag::Bridged),
            MessageKind::Unbridge => self.channel.clear_flag(ChannelFlag::Bridged),
            MessageKind::Hangup => {
                let cause = u16::try_from(message.numeric_arg)
                    .ok()
                    .and_then(HangupCause::from_code)
                    .unwrap_or(HangupCause::NormalClearing);
                self.hangup(cause);
            }
            MessageKind::ApplicationExec => {
                if let Some(app) = message.string_arg.clone() {
                    let data = message.string_args.first().cloned().unwrap_or_default();
                    self.queue_application(&app, &data)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Queue a message for the driver task to deliver
    pub fn queue_message(&self, message: Message) -> Result<()> {
        self.message_queue.try_push(message)?;
        self.wake.notify_one();
        Ok(())
    }

    /// Next queued message whose delivery time has come
    pub fn dequeue_message(&self) -> Option<Message> {
        let now = Instant::now();
        self.message_queue.pop_where(|m| m.is_due(now))
    }

    pub fn message_count(&self) -> usize {
        self.message_queue.len()
    }

    /// Deliver every due queued message; returns how many
    pub async fn dispatch_queued_messages(self: &Arc<Self>) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.dequeue_message() {
            let kind = message.kind.clone();
            if let Err(e) = self.receive_message(message).await {
                debug!(uuid = %self.id, %kind, error = %e, "Queued message not delivered");
            }
            delivered += 1;
        }
        delivered
    }

    pub fn queue_event(&self, event: Event) -> Result<()> {
        self.event_queue.try_push(event)?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn dequeue_event(&self) -> Option<Event> {
        self.event_queue.try_pop().ok().flatten()
    }

    pub fn event_count(&self) -> usize {
        self.event_queue.len()
    }

    /// Queue an event for the session itself; priority events jump ahead of
    /// ordinary ones
    pub fn queue_private_event(&self, event: Event, priority: bool) -> Result<()> {
        if priority {
            self.private_event_queue.try_push_priority(event)?;
        } else {
            self.private_event_queue.try_push(event)?;
        }
        self.wake.notify_one();
        Ok(())
    }

    pub fn dequeue_private_event(&self) -> Option<Event> {
        self.private_event_queue.try_pop().ok().flatten()
    }

    pub async fn dequeue_private_event_timeout(&self, timeout: Duration) -> Result<Event> {
        self.private_event_queue.pop_timeout(timeout).await
    }

    pub fn private_event_count(&self) -> usize {
        self.private_event_queue.len()
    }

    pub fn flush_private_events(&self) -> usize {
        self.private_event_queue.flush().len()
    }

    /// Queue a received digit. Durations are clamped into the configured
    /// range; zero means the default.
    pub fn queue_dtmf(&self, dtmf: Dtmf) -> Result<()> {
        if !Dtmf::is_valid_digit(dtmf.digit) {
            return Err(SwitchError::internal(format!("invalid DTMF digit {:?}", dtmf.digit)));
        }
        let config = self.runtime.config().dtmf;
        let duration = config.clamp(dtmf.duration);
        if duration != dtmf.duration && dtmf.duration != 0 {
            warn!(
                uuid = %self.id,
                digit = %dtmf.digit,
                requested = dtmf.duration,
                clamped = duration,
                "DTMF duration out of range"
            );
        }
        let dtmf = Dtmf::new(dtmf.digit, duration);
        self.dtmf_queue.try_push(dtmf)?;
        self.fire_channel_event(EventType::Dtmf, |e| {
            e.add_header("DTMF-Digit", dtmf.digit.to_string());
            e.add_header("DTMF-Duration", dtmf.duration.to_string());
        });
        self.wake.notify_one();
        Ok(())
    }

    pub fn dequeue_dtmf(&self) -> Option<Dtmf> {
        self.dtmf_queue.try_pop().ok().flatten()
    }

    pub fn has_dtmf(&self) -> bool {
        !self.dtmf_queue.is_empty()
    }

    pub fn flush_dtmf(&self) -> usize {
        self.dtmf_queue.flush().len()
    }

    /// Send a digit out through the endpoint
    pub async fn send_dtmf(self: &Arc<Self>, dtmf: Dtmf) -> Result<()> {
        let dtmf = Dtmf::new(dtmf.digit, self.runtime.config().dtmf.clamp(dtmf.duration));
        self.endpoint()?.send_dtmf(self, dtmf).await
    }

    // Applications

    /// Queue an application for soft execution by the driver task
    pub fn queue_application(&self, application: &str, data: &str) -> Result<()> {
        self.app_queue.try_push(ExtensionApp::new(application, data))?;
        self.wake.notify_one();
        Ok(())
    }

    pub(crate) fn next_queued_application(&self) -> Option<ExtensionApp> {
        self.app_queue.try_pop().ok().flatten()
    }

    pub fn queued_application_count(&self) -> usize {
        self.app_queue.len()
    }

    /// Run one application to completion on this session
    pub async fn execute_application(self: &Arc<Self>, application: &str, data: &str) -> Result<()> {
        let app = self
            .runtime
            .modules()
            .application(application)
            .ok_or_else(|| SwitchError::not_found("application", application))?;
        let data = self.expand(data);
        info!(uuid = %self.id, name = %self.channel.name(), "Execute {}({})", application, data);
        self.channel.set_variable("current_application", application);
        self.channel.set_variable("current_application_data", data.clone());
        self.fire_channel_event(EventType::ChannelExecute, |e| {
            e.add_header("Application", application);
            e.add_header("Application-Data", data.clone());
        });
        let result = app.execute(self, &data).await;
        let response = match &result {
            Ok(()) => "_none_".to_string(),
            Err(e) => e.to_string(),
        };
        self.channel.set_variable("last_app", application);
        self.channel.set_variable("last_arg", data.clone());
        self.channel.unset_variable("current_application");
        self.channel.unset_variable("current_application_data");
        self.fire_channel_event(EventType::ChannelExecuteComplete, |e| {
            e.add_header("Application", application);
            e.add_header("Application-Data", data.clone());
            e.add_header("Application-Response", response);
        });
        result
    }

    // Heartbeat

    pub fn enable_heartbeat(&self, seconds: u32) {
        let seconds = seconds.max(1);
        let interval = Duration::from_secs(u64::from(seconds));
        *self.heartbeat.lock() = Some(Heartbeat {
            interval,
            next: Instant::now() + interval,
        });
        self.channel.set_flag(ChannelFlag::Heartbeat);
        self.wake.notify_one();
        debug!(uuid = %self.id, seconds, "Session heartbeat enabled");
    }

    pub fn disable_heartbeat(&self) {
        *self.heartbeat.lock() = None;
        self.channel.clear_flag(ChannelFlag::Heartbeat);
    }

    /// Fire SESSION_HEARTBEAT if due; returns when the next one is due
    pub(crate) fn heartbeat_tick(&self, now: Instant) -> Option<Instant> {
        let mut heartbeat = self.heartbeat.lock();
        let beat = heartbeat.as_mut()?;
        if now >= beat.next {
            beat.next = now + beat.interval;
            let next = beat.next;
            drop(heartbeat);
            self.fire_channel_event(EventType::SessionHeartbeat, |_| {});
            return Some(next);
        }
        Some(beat.next)
    }

    // Private slots and streams

    pub fn set_private<T: Any + Send + Sync>(&self, slot: PrivateSlot, value: Arc<T>) {
        self.private.lock()[slot as usize] = Some(value);
    }

    pub fn private<T: Any + Send + Sync>(&self, slot: PrivateSlot) -> Option<Arc<T>> {
        let data = self.private.lock()[slot as usize].clone()?;
        data.downcast::<T>().ok()
    }

    pub fn clear_private(&self, slot: PrivateSlot) {
        self.private.lock()[slot as usize] = None;
    }

    /// Register another logical stream; returns its index
    pub fn add_stream(&self, media: MediaType) -> Result<usize> {
        let mut streams = self.streams.lock();
        if streams.len() >= MAX_STREAMS {
            return Err(SwitchError::SlotsExhausted {
                what: "stream",
                max: MAX_STREAMS,
            });
        }
        streams.push(media);
        Ok(streams.len() - 1)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn stream(&self, index: usize) -> Option<MediaType> {
        self.streams.lock().get(index).copied()
    }

    // Events

    /// Event describing this channel, with the usual channel headers
    pub fn channel_event(&self, event_type: EventType) -> Event {
        let mut event = Event::new(event_type);
        event
            .add_header("Core-UUID", self.runtime.core_uuid().to_string())
            .add_header("Unique-ID", self.id.to_string())
            .add_header("Channel-Name", self.channel.name())
            .add_header("Channel-State", self.channel.state().as_str())
            .add_header("Channel-Call-State", self.channel.running_state().as_str())
            .add_header("Call-Direction", self.direction.to_string())
            .add_header("Answer-State", if self.channel.test_flag(ChannelFlag::Answered) {
                "answered"
            } else if self.channel.test_flag(ChannelFlag::EarlyMedia) {
                "early"
            } else {
                "ringing"
            });
        if let Some(profile) = self.channel.caller_profile() {
            event
                .add_header("Caller-Caller-ID-Name", profile.caller_id_name.clone())
                .add_header("Caller-Caller-ID-Number", profile.caller_id_number.clone())
                .add_header("Caller-Destination-Number", profile.destination_number.clone())
                .add_header("Caller-Context", profile.context.clone());
        }
        let cause = self.channel.cause();
        if cause != HangupCause::None {
            event.add_header("Hangup-Cause", cause.as_str());
        }
        event
    }

    pub(crate) fn fire_channel_event(&self, event_type: EventType, decorate: impl FnOnce(&mut Event)) {
        let mut event = self.channel_event(event_type);
        decorate(&mut event);
        self.runtime.fire_event(event);
    }

    /// Free everything the session owns except its pool. Idempotent.
    pub(crate) fn release_resources(&self) {
        let bugs = self.bugs.close();
        if bugs > 0 {
            debug!(uuid = %self.id, bugs, "Media bugs closed at destroy");
        }
        self.release_codecs();
        let dropped = self.message_queue.terminate().len()
            + self.event_queue.terminate().len()
            + self.private_event_queue.terminate().len()
            + self.dtmf_queue.terminate().len()
            + self.app_queue.terminate().len();
        if dropped > 0 {
            debug!(uuid = %self.id, dropped, "Discarded queued items at destroy");
        }
        for slot in self.private.lock().iter_mut() {
            slot.take();
        }
    }

    /// Drop the endpoint reference so its module may unload
    pub(crate) fn release_endpoint(&self) {
        self.endpoint.write().take();
    }
}
