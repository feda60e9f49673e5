//! Media bugs: taps on a session's read and write streams
//!
//! A bug is attached with a callback that sees every frame flowing in the
//! directions its [`BugFlags`] select, in attach order, and may replace the
//! frame. Bugs are detached explicitly, when their callback returns `false`,
//! at their stop time, or when the session is destroyed; each detached bug
//! receives [`AbcType::Close`] exactly once.

mod bug;
mod chain;

pub use bug::{
    AbcType, BugCallback, BugFlags, BugInfo, BugState, MediaBug, StreamDirection,
    MAX_BUG_BUFFER_FRAMES,
};
pub use chain::BugChain;
