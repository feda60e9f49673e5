//! Reference-counted session read/write lock
//!
//! Readers are everyone who located the session (other legs, API callers,
//! signaling threads). The destroy path takes the write side, which waits for
//! every reader to drain; once it is queued no new reader gets in, so locate
//! can never starve destroy.
//!
//! Debug builds remember where each outstanding lock was taken so a leaked
//! guard can be traced back to its `file:line`.

use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[cfg(debug_assertions)]
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use std::collections::HashMap;

/// How long the write side waits before complaining about holders
const WRITE_WAIT_WARN: Duration = Duration::from_secs(5);

/// Identifies one acquisition for release bookkeeping
#[derive(Debug)]
pub(crate) struct LockToken {
    id: u64,
    location: &'static Location<'static>,
}

impl LockToken {
    pub(crate) fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

#[derive(Debug)]
pub(crate) struct SessionRwLock {
    inner: Arc<RwLock<()>>,
    readers: AtomicUsize,
    closed: AtomicBool,
    next_token: AtomicU64,
    #[cfg(debug_assertions)]
    holders: Mutex<HashMap<u64, &'static Location<'static>>>,
}

impl SessionRwLock {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(())),
            readers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_token: AtomicU64::new(1),
            #[cfg(debug_assertions)]
            holders: Mutex::new(HashMap::new()),
        }
    }

    fn token(&self, location: &'static Location<'static>) -> LockToken {
        let token = LockToken {
            id: self.next_token.fetch_add(1, Ordering::Relaxed),
            location,
        };
        #[cfg(debug_assertions)]
        self.holders.lock().insert(token.id, location);
        token
    }

    /// Non-blocking read acquisition; fails once the lock is closed or a
    /// writer holds or waits for it
    pub(crate) fn try_read(
        &self,
        location: &'static Location<'static>,
    ) -> Option<(OwnedRwLockReadGuard<()>, LockToken)> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.inner.clone().try_read_owned().ok()?;
        self.readers.fetch_add(1, Ordering::AcqRel);
        let token = self.token(location);
        tracing::trace!("read lock taken at {}:{}", location.file(), location.line());
        Some((guard, token))
    }

    pub(crate) fn release_read(&self, token: &LockToken) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
        #[cfg(debug_assertions)]
        self.holders.lock().remove(&token.id);
        tracing::trace!(
            "read lock released (taken at {}:{})",
            token.location.file(),
            token.location.line()
        );
    }

    /// Exclusive acquisition; waits for every reader to drain
    pub(crate) async fn write(
        &self,
        location: &'static Location<'static>,
    ) -> (OwnedRwLockWriteGuard<()>, LockToken) {
        loop {
            match tokio::time::timeout(WRITE_WAIT_WARN, self.inner.clone().write_owned()).await {
                Ok(guard) => return (guard, self.token(location)),
                Err(_) => {
                    tracing::warn!(
                        readers = self.readers(),
                        "write lock at {}:{} still waiting; held by [{}]",
                        location.file(),
                        location.line(),
                        self.holders().join(", ")
                    );
                }
            }
        }
    }

    pub(crate) fn release_write(&self, token: &LockToken) {
        #[cfg(debug_assertions)]
        self.holders.lock().remove(&token.id);
        tracing::trace!(
            "write lock released (taken at {}:{})",
            token.location.file(),
            token.location.line()
        );
    }

    /// Refuse all future readers
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// `file:line` of every outstanding acquisition (debug builds only)
    pub(crate) fn holders(&self) -> Vec<String> {
        #[cfg(debug_assertions)]
        {
            self.holders
                .lock()
                .values()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .collect()
        }
        #[cfg(not(debug_assertions))]
        {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readers_are_counted() {
        let lock = SessionRwLock::new();
        let (g1, t1) = lock.try_read(Location::caller()).unwrap();
        let (g2, t2) = lock.try_read(Location::caller()).unwrap();
        assert_eq!(lock.readers(), 2);
        #[cfg(debug_assertions)]
        assert_eq!(lock.holders().len(), 2);
        lock.release_read(&t1);
        drop(g1);
        lock.release_read(&t2);
        drop(g2);
        assert_eq!(lock.readers(), 0);
        assert!(lock.holders().is_empty());
    }

    #[tokio::test]
    async fn test_writer_blocks_new_readers() {
        let lock = Arc::new(SessionRwLock::new());
        let (reader, token) = lock.try_read(Location::caller()).unwrap();

        let writer_lock = lock.clone();
        let writer = tokio::spawn(async move {
            let (guard, token) = writer_lock.write(Location::caller()).await;
            writer_lock.release_write(&token);
            drop(guard);
        });

        // let the writer queue up behind the reader
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock.try_read(Location::caller()).is_none());

        lock.release_read(&token);
        drop(reader);
        writer.await.unwrap();
        assert!(lock.try_read(Location::caller()).is_some());
    }

    #[tokio::test]
    async fn test_closed_lock_refuses_readers() {
        let lock = SessionRwLock::new();
        lock.close();
        assert!(lock.is_closed());
        assert!(lock.try_read(Location::caller()).is_none());
    }
}
