use super::bug::{AbcType, BugFlags, BugInfo, BugState, MediaBug, StreamDirection};
use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct ChainInner {
    bugs: Vec<Arc<MediaBug>>,
    /// Dispatch passes currently iterating a snapshot
    walkers: usize,
    /// Set once the session tears the chain down
    closed: bool,
}

/// Ordered taps on one session.
///
/// Dispatch walks a snapshot taken under the chain mutex, so callbacks run
/// without the lock held and may add or remove bugs. A bug removed while any
/// walk is in flight is tombstoned and only taken out of the chain (and sent
/// CLOSE) when the last walker finishes.
#[derive(Debug, Default)]
pub struct BugChain {
    inner: Mutex<ChainInner>,
}

/// Decrements the walker count and reaps on drop
struct Walk<'a> {
    chain: &'a BugChain,
    snapshot: Vec<Arc<MediaBug>>,
}

impl Drop for Walk<'_> {
    fn drop(&mut self) {
        let reaped = {
            let mut inner = self.chain.inner.lock();
            inner.walkers -= 1;
            if inner.walkers == 0 {
                BugChain::take_tombstoned(&mut inner)
            } else {
                Vec::new()
            }
        };
        BugChain::close_all(reaped);
    }
}

impl BugChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_tombstoned(inner: &mut ChainInner) -> Vec<Arc<MediaBug>> {
        if inner.bugs.iter().all(|b| b.is_active()) {
            return Vec::new();
        }
        let (active, removed): (Vec<_>, Vec<_>) =
            inner.bugs.drain(..).partition(|b| b.is_active());
        inner.bugs = active;
        removed
    }

    fn close_all(bugs: Vec<Arc<MediaBug>>) {
        for bug in bugs {
            if bug.close() {
                trace!(bug = bug.id(), function = bug.function(), "Media bug closed");
            }
        }
    }

    /// Attach a bug. INIT is delivered first; if it returns false nothing is
    /// attached. `ONE_ONLY` refuses a duplicate function, `FIRST` attaches at
    /// the head.
    pub fn add(&self, bug: Arc<MediaBug>) -> Result<Arc<MediaBug>> {
        if let Some(e) = Self::refusal(&self.inner.lock(), &bug) {
            return Err(e);
        }

        if !bug.invoke(AbcType::Init) {
            return Err(SwitchError::BugRejected {
                reason: format!("{} refused INIT", bug.function()),
            });
        }

        // The lock was dropped for INIT; a racing add may have won
        let mut inner = self.inner.lock();
        if let Some(e) = Self::refusal(&inner, &bug) {
            drop(inner);
            bug.tombstone();
            bug.close();
            return Err(e);
        }
        if bug.flags().contains(BugFlags::FIRST) {
            inner.bugs.insert(0, bug.clone());
        } else {
            inner.bugs.push(bug.clone());
        }
        debug!(session = %bug.session(), bug = bug.id(), function = bug.function(), "Media bug attached");
        Ok(bug)
    }

    fn refusal(inner: &ChainInner, bug: &MediaBug) -> Option<SwitchError> {
        if inner.closed {
            return Some(SwitchError::BugRejected {
                reason: "session is being destroyed".to_string(),
            });
        }
        if bug.flags().contains(BugFlags::ONE_ONLY)
            && inner
                .bugs
                .iter()
                .any(|b| b.is_active() && b.function() == bug.function())
        {
            return Some(SwitchError::BugRejected {
                reason: format!("only one {} bug allowed", bug.function()),
            });
        }
        None
    }

    /// Detach one bug. A bug that was already removed reports `NotFound`.
    pub fn remove(&self, bug: &Arc<MediaBug>) -> Result<()> {
        let reaped = {
            let mut inner = self.inner.lock();
            if !inner.bugs.iter().any(|b| Arc::ptr_eq(b, bug)) || !bug.tombstone() {
                return Err(SwitchError::not_found("media bug", bug.id().to_string()));
            }
            if inner.walkers == 0 {
                Self::take_tombstoned(&mut inner)
            } else {
                Vec::new()
            }
        };
        Self::close_all(reaped);
        Ok(())
    }

    /// Detach every bug whose function matches; returns how many
    pub fn remove_all_function(&self, function: &str) -> usize {
        self.remove_where(|b| b.function() == function, false)
    }

    /// Detach everything and refuse later adds
    pub fn close(&self) -> usize {
        self.remove_where(|_| true, true)
    }

    /// Detach everything, leaving the chain open
    pub fn remove_all(&self) -> usize {
        self.remove_where(|_| true, false)
    }

    fn remove_where(&self, pred: impl Fn(&Arc<MediaBug>) -> bool, close: bool) -> usize {
        let (count, reaped) = {
            let mut inner = self.inner.lock();
            if close {
                inner.closed = true;
            }
            let count = inner
                .bugs
                .iter()
                .filter(|&b| pred(b) && b.tombstone())
                .count();
            let reaped = if inner.walkers == 0 {
                Self::take_tombstoned(&mut inner)
            } else {
                Vec::new()
            };
            (count, reaped)
        };
        Self::close_all(reaped);
        count
    }

    /// Detach bugs past their stop time
    pub fn prune(&self, now: Instant) -> usize {
        self.remove_where(|b| b.expired(now), false)
    }

    /// Clear buffered frames of every bug
    pub fn flush_all(&self) {
        for bug in self.inner.lock().bugs.iter() {
            bug.flush();
        }
    }

    /// Active bugs
    pub fn count(&self) -> usize {
        self.inner.lock().bugs.iter().filter(|b| b.is_active()).count()
    }

    pub fn count_function(&self, function: &str) -> usize {
        self.inner
            .lock()
            .bugs
            .iter()
            .filter(|b| b.is_active() && b.function() == function)
            .count()
    }

    /// True when nothing, not even a tombstone, is left in the chain
    pub fn is_empty(&self) -> bool {
        self.inner.lock().bugs.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn enumerate(&self) -> Vec<BugInfo> {
        self.inner
            .lock()
            .bugs
            .iter()
            .filter(|b| b.is_active())
            .map(|b| BugInfo {
                id: b.id(),
                function: b.function().to_string(),
                target: b.target(),
                flags: b.flags(),
            })
            .collect()
    }

    fn begin_walk(&self) -> Option<Walk<'_>> {
        let mut inner = self.inner.lock();
        if inner.bugs.is_empty() {
            return None;
        }
        inner.walkers += 1;
        let snapshot = inner.bugs.clone();
        Some(Walk {
            chain: self,
            snapshot,
        })
    }

    /// Run every matching bug over `frame` in attach order. Replace-capable
    /// bugs may substitute the frame seen by the bugs after them and by the
    /// caller. Returns the number of callbacks invoked.
    pub fn dispatch(&self, direction: StreamDirection, frame: &mut Frame) -> usize {
        let Some(walk) = self.begin_walk() else {
            return 0;
        };
        let now = Instant::now();
        let (stream, replace, replace_abc, stream_abc) = match direction {
            StreamDirection::Read => (
                BugFlags::READ_STREAM,
                BugFlags::READ_REPLACE,
                AbcType::ReadReplace,
                AbcType::Read,
            ),
            StreamDirection::Write => (
                BugFlags::WRITE_STREAM,
                BugFlags::WRITE_REPLACE,
                AbcType::WriteReplace,
                AbcType::Write,
            ),
        };

        let mut invoked = 0;
        for bug in &walk.snapshot {
            if bug.state() != BugState::Active || bug.target() != frame.media {
                continue;
            }
            if bug.expired(now) {
                bug.tombstone();
                continue;
            }
            let flags = bug.flags();
            let mut keep = true;

            if flags.contains(replace) {
                *bug.replace_slot(direction).lock() = Some(frame.clone());
                keep = bug.invoke(replace_abc);
                invoked += 1;
                if let Some(replaced) = bug.replace_slot(direction).lock().take() {
                    *frame = replaced;
                }
            }
            if keep && flags.contains(stream) {
                bug.buffer(direction, frame);
                keep = bug.invoke(stream_abc);
                invoked += 1;
            }
            if keep && direction == StreamDirection::Read && flags.contains(BugFlags::READ_PING) {
                keep = bug.invoke(AbcType::ReadPing);
                invoked += 1;
            }
            if !keep {
                debug!(bug = bug.id(), function = bug.function(), "Media bug asked to detach");
                bug.tombstone();
            }
        }
        drop(walk);
        invoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaType, SessionId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn make_bug(
        id: u64,
        function: &str,
        flags: BugFlags,
        callback: impl FnMut(&MediaBug, AbcType) -> bool + Send + 'static,
    ) -> Arc<MediaBug> {
        Arc::new(MediaBug::new(
            id,
            SessionId::new(),
            function,
            MediaType::Audio,
            flags,
            None,
            Box::new(callback),
        ))
    }

    #[test]
    fn test_dispatch_in_attach_order() {
        let chain = BugChain::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for id in 1..=3 {
            let order = order.clone();
            chain
                .add(make_bug(id, "tap", BugFlags::READ_STREAM, move |bug, abc| {
                    if abc == AbcType::Read {
                        order.lock().push(bug.id());
                    }
                    true
                }))
                .unwrap();
        }
        let mut frame = Frame::silence(8000, 20);
        assert_eq!(chain.dispatch(StreamDirection::Read, &mut frame), 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_first_flag_goes_to_head() {
        let chain = BugChain::new();
        chain.add(make_bug(1, "a", BugFlags::NONE, |_, _| true)).unwrap();
        chain.add(make_bug(2, "b", BugFlags::FIRST, |_, _| true)).unwrap();
        let ids: Vec<_> = chain.enumerate().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_one_only_and_init_refusal() {
        let chain = BugChain::new();
        chain.add(make_bug(1, "record", BugFlags::ONE_ONLY, |_, _| true)).unwrap();
        assert!(matches!(
            chain.add(make_bug(2, "record", BugFlags::ONE_ONLY, |_, _| true)),
            Err(SwitchError::BugRejected { .. })
        ));
        let refuse = make_bug(3, "picky", BugFlags::NONE, |_, abc| abc != AbcType::Init);
        assert!(chain.add(refuse.clone()).is_err());
        assert_eq!(chain.count(), 1);
        assert_eq!(refuse.state(), BugState::Active);
    }

    #[test]
    fn test_remove_twice_reports_not_found() {
        let chain = BugChain::new();
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let bug = chain
            .add(make_bug(1, "tap", BugFlags::NONE, move |_, abc| {
                if abc == AbcType::Close {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                true
            }))
            .unwrap();
        chain.remove(&bug).unwrap();
        assert!(matches!(chain.remove(&bug), Err(SwitchError::NotFound { .. })));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_replace_substitutes_frame() {
        let chain = BugChain::new();
        chain
            .add(make_bug(1, "gain", BugFlags::WRITE_REPLACE, |bug, abc| {
                if abc == AbcType::WriteReplace {
                    if let Some(frame) = bug.write_replace_frame() {
                        bug.set_write_replace_frame(frame.with_timestamp(99, 1));
                    }
                }
                true
            }))
            .unwrap();
        let mut frame = Frame::silence(8000, 20);
        chain.dispatch(StreamDirection::Write, &mut frame);
        assert_eq!(frame.timestamp, 99);
        let mut read = Frame::silence(8000, 20);
        assert_eq!(chain.dispatch(StreamDirection::Read, &mut read), 0);
    }

    #[test]
    fn test_callback_false_detaches_after_pass() {
        let chain = BugChain::new();
        let bug = chain
            .add(make_bug(1, "once", BugFlags::READ_PING, |_, abc| abc != AbcType::ReadPing))
            .unwrap();
        let mut frame = Frame::silence(8000, 20);
        chain.dispatch(StreamDirection::Read, &mut frame);
        assert_eq!(bug.state(), BugState::Closed);
        assert!(chain.is_empty());
    }

    #[test]
    fn test_remove_from_inside_callback_is_deferred() {
        let chain = Arc::new(BugChain::new());
        let slot: Arc<parking_lot::Mutex<Option<Arc<MediaBug>>>> = Arc::default();
        let (chain_ref, slot_ref) = (chain.clone(), slot.clone());
        let bug = chain
            .add(make_bug(1, "self", BugFlags::READ_PING, move |_, abc| {
                if abc == AbcType::ReadPing {
                    if let Some(me) = slot_ref.lock().clone() {
                        chain_ref.remove(&me).unwrap();
                        assert_eq!(me.state(), BugState::PendingRemoval);
                        assert!(!chain_ref.is_empty());
                    }
                }
                true
            }))
            .unwrap();
        *slot.lock() = Some(bug.clone());
        let mut frame = Frame::silence(8000, 20);
        chain.dispatch(StreamDirection::Read, &mut frame);
        assert_eq!(bug.state(), BugState::Closed);
        assert!(chain.is_empty());
        slot.lock().take();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_at_stop_time() {
        let chain = BugChain::new();
        let bug = Arc::new(MediaBug::new(
            1,
            SessionId::new(),
            "timed",
            MediaType::Audio,
            BugFlags::READ_STREAM,
            Some(Instant::now() + Duration::from_secs(5)),
            Box::new(|_, _| true),
        ));
        chain.add(bug.clone()).unwrap();
        assert_eq!(chain.prune(Instant::now()), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        let mut frame = Frame::silence(8000, 20);
        assert_eq!(chain.dispatch(StreamDirection::Read, &mut frame), 0);
        assert_eq!(bug.state(), BugState::Closed);
    }

    #[test]
    fn test_close_refuses_new_bugs() {
        let chain = BugChain::new();
        chain.add(make_bug(1, "a", BugFlags::NONE, |_, _| true)).unwrap();
        chain.add(make_bug(2, "b", BugFlags::NONE, |_, _| true)).unwrap();
        assert_eq!(chain.remove_all_function("a"), 1);
        assert_eq!(chain.close(), 1);
        assert!(chain.is_closed());
        assert!(chain.add(make_bug(3, "c", BugFlags::NONE, |_, _| true)).is_err());
    }

    #[test]
    fn test_flush_all_keeps_bugs() {
        let chain = BugChain::new();
        let bug = chain.add(make_bug(1, "rec", BugFlags::READ_STREAM, |_, _| true)).unwrap();
        let mut frame = Frame::silence(8000, 20);
        chain.dispatch(StreamDirection::Read, &mut frame);
        assert_eq!(bug.buffered(StreamDirection::Read), 1);
        chain.flush_all();
        assert_eq!(bug.buffered(StreamDirection::Read), 0);
        assert_eq!(chain.count(), 1);
    }

    #[test]
    fn test_racing_one_only_adds_attach_once() {
        let chain = Arc::new(BugChain::new());
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let closes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (1..=2)
            .map(|id| {
                let chain = chain.clone();
                let barrier = barrier.clone();
                let closes = closes.clone();
                std::thread::spawn(move || {
                    let flags = BugFlags::WRITE_STREAM | BugFlags::ONE_ONLY;
                    let bug = make_bug(id, "record", flags, move |_, abc| {
                        match abc {
                            AbcType::Init => {
                                barrier.wait();
                            }
                            AbcType::Close => {
                                closes.fetch_add(1, Ordering::SeqCst);
                            }
                            _ => {}
                        }
                        true
                    });
                    chain.add(bug).is_ok()
                })
            })
            .collect();
        let added: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(added.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(chain.count_function("record"), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
