//! Process-wide session table: admission, lookup and destruction

use super::throttle::Throttle;
use super::{Session, SessionReadGuard};
use crate::channel::{ChannelFlag, ChannelState};
use crate::errors::{Result, SwitchError};
use crate::interface::{Endpoint, InterfaceGuard};
use crate::runtime::CoreRuntime;
use crate::types::{CallDirection, HangupCause, OriginateFlags, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Row of [`SessionManager::snapshot`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub endpoint: String,
    pub direction: CallDirection,
    pub state: ChannelState,
    pub destination: Option<String>,
}

/// Owns every live session
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    throttle: Throttle,
    next_numeric_id: AtomicU64,
    peak: AtomicUsize,
    created: AtomicU64,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("count", &self.count())
            .field("peak", &self.sessions_peak())
            .finish()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            throttle: Throttle::new(),
            next_numeric_id: AtomicU64::new(1),
            peak: AtomicUsize::new(0),
            created: AtomicU64::new(0),
        }
    }

    /// Create a session on `endpoint`.
    ///
    /// Refused while the runtime does not accept sessions in `direction`.
    /// Unless `NO_LIMITS` is passed the request waits on the sessions per
    /// second throttle and counts against the session cap. The new session
    /// is registered but its driver is not started.
    pub async fn request(
        &self,
        runtime: &Arc<CoreRuntime>,
        endpoint: InterfaceGuard<dyn Endpoint>,
        direction: CallDirection,
        flags: OriginateFlags,
    ) -> Result<Arc<Session>> {
        runtime.check_accepting(direction)?;

        let config = runtime.config();
        let limited = !flags.contains(OriginateFlags::NO_LIMITS);
        if limited {
            self.throttle
                .admit(config.limits.sessions_per_second, config.throttle_wait())
                .await?;
        }

        let numeric_id = self.next_numeric_id.fetch_add(1, Ordering::Relaxed);
        let pool = runtime.pools().create(format!("session-{}", numeric_id));
        let endpoint_name = endpoint.name().to_string();
        let session = Arc::new(Session::new(
            runtime.clone(),
            endpoint,
            numeric_id,
            direction,
            flags,
            pool,
        ));

        let count = {
            let mut sessions = self.sessions.lock();
            let max = config.limits.max_sessions;
            if limited && sessions.len() >= max as usize {
                drop(sessions);
                warn!(max, endpoint = %endpoint_name, "Session limit reached");
                if let Some(pool) = session.take_pool() {
                    runtime.pools().destroy(pool);
                }
                return Err(SwitchError::SessionLimit { max });
            }
            sessions.insert(session.id(), session.clone());
            sessions.len()
        };
        self.peak.fetch_max(count, Ordering::AcqRel);
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            uuid = %session.id(),
            numeric_id,
            endpoint = %endpoint_name,
            %direction,
            count,
            "Session created"
        );
        Ok(session)
    }

    /// Find a live session and read-lock it. Hung-up sessions are not
    /// returned; see [`SessionManager::force_locate`].
    #[track_caller]
    pub fn locate(&self, id: &SessionId) -> Option<SessionReadGuard> {
        let session = self.sessions.lock().get(id).cloned()?;
        if session.channel().state() >= ChannelState::Hangup {
            return None;
        }
        session.read_lock().ok()
    }

    /// Like [`SessionManager::locate`] but also finds sessions that are
    /// hanging up, as long as destroy has not started
    #[track_caller]
    pub fn force_locate(&self, id: &SessionId) -> Option<SessionReadGuard> {
        let session = self.sessions.lock().get(id).cloned()?;
        session.read_lock().ok()
    }

    /// Locate by the uuid text form
    #[track_caller]
    pub fn locate_str(&self, uuid: &str) -> Option<SessionReadGuard> {
        let id: SessionId = uuid.parse().ok()?;
        self.locate(&id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Tear a session down: refuse new readers, wait for the current ones,
    /// unregister it and free what it owns
    pub async fn destroy(&self, runtime: &CoreRuntime, session: &Arc<Session>) {
        session.channel().set_flag(ChannelFlag::DestroyRequested);
        session.rwlock().close();
        let guard = session.write_lock().await;

        let removed = self.sessions.lock().remove(&session.id()).is_some();
        session.release_resources();
        session.release_endpoint();
        if let Some(pool) = session.take_pool() {
            runtime.pools().destroy(pool);
        }
        drop(guard);

        if removed {
            info!(
                uuid = %session.id(),
                name = %session.channel().name(),
                cause = %session.channel().cause(),
                remaining = self.count(),
                "Session destroyed"
            );
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn list_uuids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }

    fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Hang up every session; returns how many were told to
    pub fn hupall(&self, cause: HangupCause) -> usize {
        self.hupall_where(cause, |_| true)
    }

    /// Hang up sessions whose channel variable `name` equals `value`
    pub fn hupall_matching_var(&self, name: &str, value: &str, cause: HangupCause) -> usize {
        self.hupall_where(cause, |s| s.channel().variable(name).as_deref() == Some(value))
    }

    /// Hang up sessions owned by one endpoint
    pub fn hupall_endpoint(&self, endpoint: &str, cause: HangupCause) -> usize {
        self.hupall_where(cause, |s| s.endpoint_name() == endpoint)
    }

    fn hupall_where(&self, cause: HangupCause, pred: impl Fn(&Session) -> bool) -> usize {
        let mut count = 0;
        for session in self.all() {
            if pred(&session) && !session.channel().state().is_hungup() {
                session.hangup(cause);
                count += 1;
            }
        }
        if count > 0 {
            info!(count, %cause, "Hung up sessions");
        }
        count
    }

    /// Highest concurrent session count seen
    pub fn sessions_peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Sessions created since start
    pub fn sessions_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Sessions admitted in the last full second
    pub fn sps_last(&self) -> u32 {
        self.throttle.last()
    }

    /// Highest per-second admission count seen
    pub fn sps_peak(&self) -> u32 {
        self.throttle.peak()
    }

    pub fn reset_peaks(&self) {
        self.peak.store(self.count(), Ordering::Release);
        self.throttle.reset_peak();
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .all()
            .into_iter()
            .map(|s| SessionSummary {
                id: s.id(),
                name: s.channel().name(),
                endpoint: s.endpoint_name().to_string(),
                direction: s.direction(),
                state: s.channel().state(),
                destination: s.channel().caller_profile().map(|p| p.destination_number.clone()),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}
