//! Asynchronous interrupts observed by the state machine between handler calls

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Interrupt raised on a session from another task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Tear the call down
    Kill,
    /// Stop current I/O and re-enter routing
    Xfer,
    /// Interrupt the running application only
    Break,
}

impl Signal {
    fn bit(self) -> u8 {
        match self {
            Signal::Kill => 0b001,
            Signal::Xfer => 0b010,
            Signal::Break => 0b100,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Kill => "KILL",
            Signal::Xfer => "XFER",
            Signal::Break => "BREAK",
        };
        f.write_str(name)
    }
}

/// Pending signals for one session
#[derive(Debug, Default)]
pub struct SignalSet(AtomicU8);

impl SignalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, signal: Signal) {
        self.0.fetch_or(signal.bit(), Ordering::AcqRel);
    }

    pub fn is_pending(&self, signal: Signal) -> bool {
        self.0.load(Ordering::Acquire) & signal.bit() != 0
    }

    /// Consume a pending signal
    pub fn take(&self, signal: Signal) -> bool {
        self.0.fetch_and(!signal.bit(), Ordering::AcqRel) & signal.bit() != 0
    }

    pub fn any_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_take() {
        let signals = SignalSet::new();
        assert!(!signals.any_pending());
        signals.raise(Signal::Kill);
        signals.raise(Signal::Break);
        assert!(signals.is_pending(Signal::Kill));
        assert!(signals.take(Signal::Break));
        assert!(!signals.take(Signal::Break));
        assert!(signals.is_pending(Signal::Kill));
        signals.clear();
        assert!(!signals.any_pending());
    }
}
