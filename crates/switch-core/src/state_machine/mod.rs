//! Channel state machine: signals, state handlers and the per-session driver

mod driver;
mod handler;
mod signal;
mod standard;

pub use driver::StateMachine;
pub use handler::{HandlerOutcome, StateHandler, StateHandlerTable, MAX_STATE_HANDLERS};
pub use signal::{Signal, SignalSet};
