use crate::channel::ChannelState;
use crate::errors::{Result, SwitchError};
use crate::session::Session;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// Global state handlers allowed at once
pub const MAX_STATE_HANDLERS: usize = 30;

/// What a state handler wants the driver to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Run the remaining handlers for this state
    Continue,
    /// Skip the remaining handlers and move to this state
    Transition(ChannelState),
    /// Skip the remaining handlers, including the built-in behavior
    Exclusive,
}

/// Per-state hooks. Every method defaults to [`HandlerOutcome::Continue`].
///
/// An `Err` is treated like a KILL signal: the channel hangs up and the error
/// is logged.
#[async_trait]
pub trait StateHandler: Send + Sync {
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn on_init(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_routing(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_execute(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_soft_execute(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_exchange_media(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_park(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_consume_media(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_hibernate(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_reset(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_hangup(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_reporting(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }

    async fn on_destroy(&self, _session: &Arc<Session>) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::Continue)
    }
}

/// Call the hook of `handler` that belongs to `state`
pub(crate) async fn dispatch(
    handler: &dyn StateHandler,
    state: ChannelState,
    session: &Arc<Session>,
) -> Result<HandlerOutcome> {
    match state {
        ChannelState::New => Ok(HandlerOutcome::Continue),
        ChannelState::Init => handler.on_init(session).await,
        ChannelState::Routing => handler.on_routing(session).await,
        ChannelState::SoftExecute => handler.on_soft_execute(session).await,
        ChannelState::Execute => handler.on_execute(session).await,
        ChannelState::ExchangeMedia => handler.on_exchange_media(session).await,
        ChannelState::Park => handler.on_park(session).await,
        ChannelState::ConsumeMedia => handler.on_consume_media(session).await,
        ChannelState::Hibernate => handler.on_hibernate(session).await,
        ChannelState::Reset => handler.on_reset(session).await,
        ChannelState::Hangup => handler.on_hangup(session).await,
        ChannelState::Reporting => handler.on_reporting(session).await,
        ChannelState::Destroy => handler.on_destroy(session).await,
    }
}

/// Process-wide handlers run for every session before the endpoint's own
#[derive(Default)]
pub struct StateHandlerTable {
    handlers: RwLock<Vec<Arc<dyn StateHandler>>>,
}

impl std::fmt::Debug for StateHandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.handlers.read().iter().map(|h| h.name().to_string()).collect();
        f.debug_struct("StateHandlerTable").field("handlers", &names).finish()
    }
}

impl StateHandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; returns its index
    pub fn add(&self, handler: Arc<dyn StateHandler>) -> Result<usize> {
        let mut handlers = self.handlers.write();
        if handlers.len() >= MAX_STATE_HANDLERS {
            return Err(SwitchError::SlotsExhausted {
                what: "state handler",
                max: MAX_STATE_HANDLERS,
            });
        }
        handlers.push(handler);
        Ok(handlers.len() - 1)
    }

    /// Remove a handler previously added; order of the rest is kept
    pub fn remove(&self, handler: &Arc<dyn StateHandler>) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Handlers in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn StateHandler>> {
        self.handlers.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl StateHandler for Noop {}

    #[test]
    fn test_table_is_bounded() {
        let table = StateHandlerTable::new();
        for i in 0..MAX_STATE_HANDLERS {
            assert_eq!(table.add(Arc::new(Noop)).unwrap(), i);
        }
        assert!(matches!(
            table.add(Arc::new(Noop)),
            Err(SwitchError::SlotsExhausted { max: MAX_STATE_HANDLERS, .. })
        ));
    }

    #[test]
    fn test_remove_keeps_order() {
        let table = StateHandlerTable::new();
        let a: Arc<dyn StateHandler> = Arc::new(Noop);
        let b: Arc<dyn StateHandler> = Arc::new(Noop);
        let c: Arc<dyn StateHandler> = Arc::new(Noop);
        for h in [&a, &b, &c] {
            table.add(h.clone()).unwrap();
        }
        assert!(table.remove(&b));
        assert!(!table.remove(&b));
        let left = table.snapshot();
        assert!(Arc::ptr_eq(&left[0], &a));
        assert!(Arc::ptr_eq(&left[1], &c));
    }
}
