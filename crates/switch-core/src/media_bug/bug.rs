use crate::frame::Frame;
use crate::types::{MediaType, SessionId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::time::Instant;

/// Frames buffered per direction before the oldest is dropped
pub const MAX_BUG_BUFFER_FRAMES: usize = 64;

/// Which side of the session a frame travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Frames read from the endpoint
    Read,
    /// Frames written to the endpoint
    Write,
}

/// Reason a bug callback is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbcType {
    Init,
    Read,
    Write,
    ReadReplace,
    WriteReplace,
    ReadPing,
    Close,
}

/// What a bug taps and how it attaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BugFlags(u32);

impl BugFlags {
    pub const NONE: BugFlags = BugFlags(0);
    /// Buffer read frames and call back with [`AbcType::Read`]
    pub const READ_STREAM: BugFlags = BugFlags(1 << 0);
    /// Buffer written frames and call back with [`AbcType::Write`]
    pub const WRITE_STREAM: BugFlags = BugFlags(1 << 1);
    /// May substitute read frames
    pub const READ_REPLACE: BugFlags = BugFlags(1 << 2);
    /// May substitute written frames
    pub const WRITE_REPLACE: BugFlags = BugFlags(1 << 3);
    /// Notified on every read without buffering
    pub const READ_PING: BugFlags = BugFlags(1 << 4);
    /// Refuse to attach if a bug with the same function is present
    pub const ONE_ONLY: BugFlags = BugFlags(1 << 5);
    /// Attach at the head of the chain
    pub const FIRST: BugFlags = BugFlags(1 << 6);
    /// Attach even while the channel pauses bugs
    pub const NO_PAUSE: BugFlags = BugFlags(1 << 7);

    pub fn contains(&self, other: BugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: BugFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BugFlags {
    type Output = BugFlags;

    fn bitor(self, rhs: BugFlags) -> BugFlags {
        BugFlags(self.0 | rhs.0)
    }
}

/// Callback a module installs; returning `false` detaches the bug
pub type BugCallback = Box<dyn FnMut(&MediaBug, AbcType) -> bool + Send>;

const ACTIVE: u8 = 0;
const PENDING_REMOVAL: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a bug inside its chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BugState {
    Active,
    /// Tombstoned; skipped by dispatch and reaped once no walk is running
    PendingRemoval,
    /// CLOSE delivered; the bug is out of the chain
    Closed,
}

/// A tap on one session's media streams
pub struct MediaBug {
    id: u64,
    session: SessionId,
    function: String,
    target: MediaType,
    flags: BugFlags,
    stop_time: Option<Instant>,
    state: AtomicU8,
    callback: Mutex<BugCallback>,
    read_buffer: Mutex<VecDeque<Frame>>,
    write_buffer: Mutex<VecDeque<Frame>>,
    read_replace: Mutex<Option<Frame>>,
    write_replace: Mutex<Option<Frame>>,
}

impl fmt::Debug for MediaBug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaBug")
            .field("id", &self.id)
            .field("session", &self.session)
            .field("function", &self.function)
            .field("target", &self.target)
            .field("flags", &self.flags)
            .field("state", &self.state())
            .finish()
    }
}

impl MediaBug {
    pub(crate) fn new(
        id: u64,
        session: SessionId,
        function: impl Into<String>,
        target: MediaType,
        flags: BugFlags,
        stop_time: Option<Instant>,
        callback: BugCallback,
    ) -> Self {
        Self {
            id,
            session,
            function: function.into(),
            target,
            flags,
            stop_time,
            state: AtomicU8::new(ACTIVE),
            callback: Mutex::new(callback),
            read_buffer: Mutex::new(VecDeque::new()),
            write_buffer: Mutex::new(VecDeque::new()),
            read_replace: Mutex::new(None),
            write_replace: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn target(&self) -> MediaType {
        self.target
    }

    pub fn flags(&self) -> BugFlags {
        self.flags
    }

    pub fn stop_time(&self) -> Option<Instant> {
        self.stop_time
    }

    pub fn state(&self) -> BugState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => BugState::Active,
            PENDING_REMOVAL => BugState::PendingRemoval,
            _ => BugState::Closed,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub(crate) fn expired(&self, now: Instant) -> bool {
        self.stop_time.map_or(false, |stop| now >= stop)
    }

    /// Active → PendingRemoval; false if someone else got there first
    pub(crate) fn tombstone(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, PENDING_REMOVAL, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Deliver CLOSE exactly once
    pub(crate) fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING_REMOVAL, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let mut callback = self.callback.lock();
        (*callback)(self, AbcType::Close);
        drop(callback);
        self.flush();
        true
    }

    pub(crate) fn invoke(&self, abc: AbcType) -> bool {
        let mut callback = self.callback.lock();
        (*callback)(self, abc)
    }

    pub(crate) fn buffer(&self, direction: StreamDirection, frame: &Frame) {
        let mut buffer = match direction {
            StreamDirection::Read => self.read_buffer.lock(),
            StreamDirection::Write => self.write_buffer.lock(),
        };
        if buffer.len() >= MAX_BUG_BUFFER_FRAMES {
            buffer.pop_front();
        }
        buffer.push_back(frame.clone());
    }

    /// Take the oldest buffered frame of one direction
    pub fn read(&self, direction: StreamDirection) -> Option<Frame> {
        match direction {
            StreamDirection::Read => self.read_buffer.lock().pop_front(),
            StreamDirection::Write => self.write_buffer.lock().pop_front(),
        }
    }

    pub fn buffered(&self, direction: StreamDirection) -> usize {
        match direction {
            StreamDirection::Read => self.read_buffer.lock().len(),
            StreamDirection::Write => self.write_buffer.lock().len(),
        }
    }

    /// Drop buffered frames without detaching
    pub fn flush(&self) {
        self.read_buffer.lock().clear();
        self.write_buffer.lock().clear();
    }

    /// The frame being replaced, available during a `ReadReplace` callback
    pub fn read_replace_frame(&self) -> Option<Frame> {
        self.read_replace.lock().clone()
    }

    pub fn set_read_replace_frame(&self, frame: Frame) {
        *self.read_replace.lock() = Some(frame);
    }

    /// The frame being replaced, available during a `WriteReplace` callback
    pub fn write_replace_frame(&self) -> Option<Frame> {
        self.write_replace.lock().clone()
    }

    pub fn set_write_replace_frame(&self, frame: Frame) {
        *self.write_replace.lock() = Some(frame);
    }

    pub(crate) fn replace_slot(&self, direction: StreamDirection) -> &Mutex<Option<Frame>> {
        match direction {
            StreamDirection::Read => &self.read_replace,
            StreamDirection::Write => &self.write_replace,
        }
    }
}

/// Snapshot row returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugInfo {
    pub id: u64,
    pub function: String,
    pub target: MediaType,
    pub flags: BugFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bug(flags: BugFlags) -> MediaBug {
        MediaBug::new(1, SessionId::new(), "test", MediaType::Audio, flags, None, Box::new(|_, _| true))
    }

    #[test]
    fn test_flags() {
        let flags = BugFlags::READ_STREAM | BugFlags::ONE_ONLY;
        assert!(flags.contains(BugFlags::READ_STREAM));
        assert!(!flags.contains(BugFlags::READ_STREAM | BugFlags::FIRST));
        assert!(flags.intersects(BugFlags::FIRST | BugFlags::ONE_ONLY));
    }

    #[test]
    fn test_buffer_is_bounded() {
        let bug = bug(BugFlags::READ_STREAM);
        for i in 0..(MAX_BUG_BUFFER_FRAMES + 5) {
            bug.buffer(StreamDirection::Read, &Frame::silence(8000, 20).with_timestamp(i as u32, 0));
        }
        assert_eq!(bug.buffered(StreamDirection::Read), MAX_BUG_BUFFER_FRAMES);
        assert_eq!(bug.read(StreamDirection::Read).unwrap().timestamp, 5);
        assert!(bug.read(StreamDirection::Write).is_none());
        bug.flush();
        assert_eq!(bug.buffered(StreamDirection::Read), 0);
    }

    #[test]
    fn test_state_transitions() {
        let bug = bug(BugFlags::NONE);
        assert!(!bug.close());
        assert!(bug.tombstone());
        assert!(!bug.tombstone());
        assert_eq!(bug.state(), BugState::PendingRemoval);
        assert!(bug.close());
        assert!(!bug.close());
        assert_eq!(bug.state(), BugState::Closed);
    }
}
