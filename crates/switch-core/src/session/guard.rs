use super::Session;
use crate::lock::LockToken;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

/// A located session. While it lives the session cannot be destroyed;
/// dropping it is the unlock.
pub struct SessionReadGuard {
    session: Arc<Session>,
    token: LockToken,
    _guard: OwnedRwLockReadGuard<()>,
}

impl SessionReadGuard {
    pub(crate) fn new(session: Arc<Session>, guard: OwnedRwLockReadGuard<()>, token: LockToken) -> Self {
        Self {
            session,
            token,
            _guard: guard,
        }
    }

    /// The owning handle, for APIs that take `&Arc<Session>`
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for SessionReadGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionReadGuard {
    fn drop(&mut self) {
        self.session.rwlock().release_read(&self.token);
    }
}

impl fmt::Debug for SessionReadGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.token.location();
        f.debug_struct("SessionReadGuard")
            .field("uuid", &self.session.id())
            .field("taken_at", &format!("{}:{}", location.file(), location.line()))
            .finish()
    }
}

/// Exclusive hold on a session; no reader is inside while it lives
pub struct SessionWriteGuard {
    session: Arc<Session>,
    token: LockToken,
    _guard: OwnedRwLockWriteGuard<()>,
}

impl SessionWriteGuard {
    pub(crate) fn new(session: Arc<Session>, guard: OwnedRwLockWriteGuard<()>, token: LockToken) -> Self {
        Self {
            session,
            token,
            _guard: guard,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for SessionWriteGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionWriteGuard {
    fn drop(&mut self) {
        self.session.rwlock().release_write(&self.token);
    }
}

impl fmt::Debug for SessionWriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionWriteGuard")
            .field("uuid", &self.session.id())
            .finish()
    }
}
