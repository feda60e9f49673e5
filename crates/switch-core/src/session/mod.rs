//! Sessions: one call leg each, with its channel, queues, media bugs and
//! driver task, plus the manager that admits and destroys them

mod guard;
mod io;
mod manager;
#[allow(clippy::module_inception)]
mod session;
mod throttle;

pub use guard::{SessionReadGuard, SessionWriteGuard};
pub use manager::{SessionManager, SessionSummary};
pub use session::{CodecLocks, Session, MAX_STREAMS};
