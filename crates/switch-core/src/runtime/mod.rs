//! Process-wide runtime context
//!
//! [`CoreRuntime`] owns everything that outlives a single call: the session
//! table, the module registry, the global state handlers, the event bus,
//! global variables and the runtime flags. It is created once, handed out as
//! an `Arc`, and moved through an explicit `start()` / `stop()` lifecycle.

mod control;
mod flags;
mod heartbeat;

pub use control::{CtlResponse, PauseDirection, SessionCtl, ShutdownMode};
pub use flags::{RuntimeFlag, RuntimeFlags};

use crate::channel::CallerProfile;
use crate::config::CoreConfig;
use crate::errors::{Result, SwitchError};
use crate::event::{Event, EventBus, EventType};
use crate::interface::{LoadableModule, Module, ModuleRegistry};
use crate::pool::PoolAllocator;
use crate::session::{Session, SessionManager};
use crate::state_machine::StateHandlerTable;
use crate::types::{CallDirection, HangupCause, OriginateFlags};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rvoip_infra_common::{ConfigRegistry, LogHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_BUS_CAPACITY: usize = 4096;

/// How often `stop` re-checks the session count while draining
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Builder for [`CoreRuntime`]
#[derive(Default)]
pub struct RuntimeBuilder {
    config: CoreConfig,
    registry: Option<Arc<dyn ConfigRegistry>>,
    log: Option<LogHandle>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration registry used by modules such as the `registry` dialplan
    pub fn registry(mut self, registry: Arc<dyn ConfigRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Handle the control surface uses to change the log level
    pub fn log_handle(mut self, log: LogHandle) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Arc<CoreRuntime> {
        let core_uuid = self.config.core_uuid.unwrap_or_else(Uuid::new_v4);
        Arc::new(CoreRuntime {
            pools: PoolAllocator::new(self.config.pool_recycle_max),
            config: RwLock::new(self.config),
            flags: RuntimeFlags::new(),
            globals: RwLock::new(IndexMap::new()),
            sessions: SessionManager::new(),
            modules: ModuleRegistry::new(),
            state_handlers: StateHandlerTable::new(),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            registry: self.registry,
            log: RwLock::new(self.log),
            shutdown: CancellationToken::new(),
            shutdown_watch: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            core_uuid,
            stopped: AtomicBool::new(false),
        })
    }
}

/// The switching core's process-wide state
pub struct CoreRuntime {
    config: RwLock<CoreConfig>,
    flags: RuntimeFlags,
    globals: RwLock<IndexMap<String, String>>,
    sessions: SessionManager,
    modules: ModuleRegistry,
    state_handlers: StateHandlerTable,
    pools: PoolAllocator,
    events: EventBus,
    registry: Option<Arc<dyn ConfigRegistry>>,
    log: RwLock<Option<LogHandle>>,
    shutdown: CancellationToken,
    /// Cancels a pending graceful shutdown
    shutdown_watch: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
    core_uuid: Uuid,
    stopped: AtomicBool,
}

impl std::fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("core_uuid", &self.core_uuid)
            .field("flags", &self.flags)
            .field("sessions", &self.sessions)
            .field("modules", &self.modules)
            .finish()
    }
}

impl CoreRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn new(config: CoreConfig) -> Arc<Self> {
        Self::builder().config(config).build()
    }

    /// Current configuration
    pub fn config(&self) -> CoreConfig {
        self.config.read().clone()
    }

    /// Change the configuration in place
    pub fn update_config<R>(&self, f: impl FnOnce(&mut CoreConfig) -> R) -> R {
        let mut config = self.config.write();
        let result = f(&mut config);
        self.pools.set_max_free(config.pool_recycle_max);
        result
    }

    pub fn flags(&self) -> &RuntimeFlags {
        &self.flags
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn state_handlers(&self) -> &StateHandlerTable {
        &self.state_handlers
    }

    pub fn pools(&self) -> &PoolAllocator {
        &self.pools
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> Option<&Arc<dyn ConfigRegistry>> {
        self.registry.as_ref()
    }

    pub fn log_handle(&self) -> Option<LogHandle> {
        self.log.read().clone()
    }

    pub fn set_log_handle(&self, log: LogHandle) {
        *self.log.write() = Some(log);
    }

    pub fn core_uuid(&self) -> Uuid {
        self.core_uuid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stamp `event` with the core identity and put it on the bus
    pub fn fire_event(&self, mut event: Event) {
        if event.header("Core-UUID").is_none() {
            event.add_header("Core-UUID", self.core_uuid.to_string());
        }
        self.events.fire(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Arc<Event>> {
        self.events.subscribe()
    }

    // Global variables

    pub fn global_variable(&self, name: &str) -> Option<String> {
        self.globals.read().get(name).cloned()
    }

    pub fn set_global_variable(&self, name: impl Into<String>, value: impl Into<String>) {
        self.globals.write().insert(name.into(), value.into());
    }

    pub fn unset_global_variable(&self, name: &str) -> Option<String> {
        self.globals.write().shift_remove(name)
    }

    /// Every global variable in insertion order
    pub fn global_variables(&self) -> Vec<(String, String)> {
        self.globals
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Refuse a new session in `direction` while the runtime is pausing or
    /// shutting down
    pub fn check_accepting(&self, direction: CallDirection) -> Result<()> {
        if self.flags.test(RuntimeFlag::ShuttingDown) {
            return Err(SwitchError::NotAccepting {
                reason: "system is shutting down".to_string(),
                cause: HangupCause::SystemShutdown,
            });
        }
        let paused = match direction {
            CallDirection::Inbound => self.flags.test(RuntimeFlag::NoNewInbound),
            CallDirection::Outbound => self.flags.test(RuntimeFlag::NoNewOutbound),
        };
        if paused {
            return Err(SwitchError::NotAccepting {
                reason: format!("new {} sessions are paused", direction),
                cause: HangupCause::NormalTemporaryFailure,
            });
        }
        Ok(())
    }

    /// True once started and not shutting down
    pub fn is_ready(&self) -> bool {
        self.flags.test(RuntimeFlag::Ready) && !self.flags.test(RuntimeFlag::ShuttingDown)
    }

    /// Start the background tasks. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SwitchError::internal("runtime was stopped and cannot restart"));
        }
        if !self.flags.test_and_set(RuntimeFlag::Running) {
            warn!("Runtime already started");
            return Ok(());
        }

        let heartbeat = tokio::spawn(heartbeat::run(Arc::downgrade(self), self.shutdown.clone()));
        self.tasks.lock().push(heartbeat);

        self.flags.set(RuntimeFlag::Ready);
        info!(
            core_uuid = %self.core_uuid,
            switchname = %self.config.read().switchname,
            "Switch core started"
        );
        Ok(())
    }

    /// Shut down: stop accepting sessions, hang up every live one, wait up to
    /// the grace period for them to drain, stop the background tasks and
    /// unload all modules. Only the first call does anything.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Runtime already stopped");
            return Ok(());
        }
        info!("Stopping switch core");
        self.flags.update(
            &[
                RuntimeFlag::ShuttingDown,
                RuntimeFlag::NoNewInbound,
                RuntimeFlag::NoNewOutbound,
            ],
            &[RuntimeFlag::Ready, RuntimeFlag::ShutdownRequested],
        );
        if let Some(watch) = self.shutdown_watch.lock().take() {
            watch.cancel();
        }

        self.sessions.hupall(HangupCause::SystemShutdown);
        let grace = Duration::from_secs(self.config.read().shutdown_grace_secs);
        let deadline = tokio::time::Instant::now() + grace;
        while self.sessions.count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let remaining = self.sessions.count();
        if remaining > 0 {
            warn!(remaining, "Sessions still present after shutdown grace period");
        }

        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Runtime task ended abnormally: {}", e);
            }
        }

        self.modules.unload_all().await;
        self.flags.clear(RuntimeFlag::Running);

        let mut event = Event::new(EventType::Shutdown);
        event.add_header("Shutdown-Cause", HangupCause::SystemShutdown.as_str());
        self.fire_event(event);
        info!("Switch core stopped");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Load a module and announce it
    pub async fn load_module(&self, module: Arc<dyn Module>) -> Result<Arc<LoadableModule>> {
        let loaded = self.modules.load(module).await?;
        let mut event = Event::new(EventType::ModuleLoad);
        event.add_header("module", loaded.name());
        for (kind, name) in loaded.provides() {
            event.add_header("type", kind.as_str()).add_header("name", name.as_str());
        }
        self.fire_event(event);
        Ok(loaded)
    }

    /// Unload a module. Fails while any of its interfaces is in use.
    pub async fn unload_module(&self, name: &str) -> Result<()> {
        self.modules.unload(name).await?;
        self.fire_event(Event::new(EventType::ModuleUnload).with_header("module", name));
        Ok(())
    }

    /// Create a session on the named endpoint. The driver is not started.
    pub async fn request_session(
        self: &Arc<Self>,
        endpoint: &str,
        direction: CallDirection,
        flags: OriginateFlags,
    ) -> Result<Arc<Session>> {
        self.check_accepting(direction)?;
        let guard = self
            .modules
            .endpoint(endpoint)
            .ok_or_else(|| SwitchError::not_found("endpoint", endpoint))?;
        self.sessions.request(self, guard, direction, flags).await
    }

    /// Place an outbound leg on the named endpoint and start its driver
    pub async fn originate(
        self: &Arc<Self>,
        endpoint: &str,
        profile: CallerProfile,
        flags: OriginateFlags,
    ) -> Result<Arc<Session>> {
        self.check_accepting(CallDirection::Outbound)?;
        let guard = self
            .modules
            .endpoint(endpoint)
            .ok_or_else(|| SwitchError::not_found("endpoint", endpoint))?;
        let session = guard.implementation().outgoing_channel(self, &profile, flags).await?;
        drop(guard);
        if let Err(e) = session.launch_thread() {
            // Only a driver the endpoint already started refuses the launch,
            // and that driver owns the walk to DESTROY
            session.hangup(HangupCause::DestinationOutOfOrder);
            return Err(e);
        }
        info!(
            uuid = %session.id(),
            name = %session.channel().name(),
            destination = %profile.destination_number,
            "Originated"
        );
        Ok(session)
    }

    pub(crate) fn spawn_shutdown_watch(self: &Arc<Self>) -> bool {
        let mut slot = self.shutdown_watch.lock();
        if slot.is_some() {
            return false;
        }
        let token = self.shutdown.child_token();
        *slot = Some(token.clone());
        drop(slot);

        let runtime = Arc::downgrade(self);
        // Not tracked in `tasks`: it calls `stop`, which joins them
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(DRAIN_POLL) => {}
                }
                let Some(runtime) = runtime.upgrade() else {
                    return;
                };
                if runtime.sessions.count() == 0 {
                    info!("All sessions drained, shutting down");
                    if let Err(e) = runtime.stop().await {
                        error!("Shutdown failed: {}", e);
                    }
                    return;
                }
            }
        });
        true
    }

    pub(crate) fn cancel_shutdown_watch(&self) -> bool {
        match self.shutdown_watch.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_accepting() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        assert!(runtime.check_accepting(CallDirection::Inbound).is_ok());

        runtime.flags().set(RuntimeFlag::NoNewInbound);
        assert!(runtime.check_accepting(CallDirection::Inbound).is_err());
        assert!(runtime.check_accepting(CallDirection::Outbound).is_ok());

        runtime.flags().set(RuntimeFlag::ShuttingDown);
        let err = runtime.check_accepting(CallDirection::Outbound).unwrap_err();
        assert_eq!(err.hangup_cause(), Some(HangupCause::SystemShutdown));
    }

    #[test]
    fn test_global_variables() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        runtime.set_global_variable("domain", "example.org");
        runtime.set_global_variable("zone", "eu");
        assert_eq!(runtime.global_variable("domain").as_deref(), Some("example.org"));
        assert_eq!(runtime.unset_global_variable("domain").as_deref(), Some("example.org"));
        assert_eq!(runtime.global_variables(), vec![("zone".to_string(), "eu".to_string())]);
    }

    #[test]
    fn test_fixed_core_uuid() {
        let id = Uuid::new_v4();
        let config = CoreConfig {
            core_uuid: Some(id),
            ..CoreConfig::default()
        };
        assert_eq!(CoreRuntime::new(config).core_uuid(), id);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let runtime = CoreRuntime::new(CoreConfig::default());
        runtime.start().unwrap();
        let mut events = runtime.subscribe_events();

        runtime.stop().await.unwrap();
        runtime.stop().await.unwrap();
        assert!(runtime.is_stopped());
        assert!(!runtime.is_ready());
        assert!(runtime.start().is_err());

        let event = events.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Shutdown);
        assert!(events.try_recv().is_err());
    }
}
