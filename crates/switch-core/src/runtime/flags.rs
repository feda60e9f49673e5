//! Process-wide runtime flags

use parking_lot::Mutex;
use std::fmt;

/// One bit of the runtime flag mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFlag {
    /// Refuse new inbound sessions
    NoNewInbound,
    /// Refuse new outbound sessions
    NoNewOutbound,
    /// A graceful shutdown is waiting for sessions to drain
    ShutdownRequested,
    /// Teardown has begun; nothing new is accepted
    ShuttingDown,
    /// Startup finished
    Ready,
    /// Background tasks are running
    Running,
}

impl RuntimeFlag {
    fn bit(self) -> u32 {
        match self {
            RuntimeFlag::NoNewInbound => 1 << 0,
            RuntimeFlag::NoNewOutbound => 1 << 1,
            RuntimeFlag::ShutdownRequested => 1 << 2,
            RuntimeFlag::ShuttingDown => 1 << 3,
            RuntimeFlag::Ready => 1 << 4,
            RuntimeFlag::Running => 1 << 5,
        }
    }

    const ALL: [RuntimeFlag; 6] = [
        RuntimeFlag::NoNewInbound,
        RuntimeFlag::NoNewOutbound,
        RuntimeFlag::ShutdownRequested,
        RuntimeFlag::ShuttingDown,
        RuntimeFlag::Ready,
        RuntimeFlag::Running,
    ];
}

/// The runtime's flag mask. A single mutex guards it so compound updates
/// (set one, clear another) are atomic with respect to readers.
#[derive(Default)]
pub struct RuntimeFlags {
    mask: Mutex<u32>,
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.active()).finish()
    }
}

impl RuntimeFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flag: RuntimeFlag) {
        *self.mask.lock() |= flag.bit();
    }

    pub fn clear(&self, flag: RuntimeFlag) {
        *self.mask.lock() &= !flag.bit();
    }

    pub fn test(&self, flag: RuntimeFlag) -> bool {
        *self.mask.lock() & flag.bit() != 0
    }

    /// Set and clear several flags under one lock
    pub fn update(&self, set: &[RuntimeFlag], clear: &[RuntimeFlag]) {
        let mut mask = self.mask.lock();
        for flag in set {
            *mask |= flag.bit();
        }
        for flag in clear {
            *mask &= !flag.bit();
        }
    }

    /// Set `flag` unless it already is; true if this call set it
    pub fn test_and_set(&self, flag: RuntimeFlag) -> bool {
        let mut mask = self.mask.lock();
        if *mask & flag.bit() != 0 {
            return false;
        }
        *mask |= flag.bit();
        true
    }

    pub fn active(&self) -> Vec<RuntimeFlag> {
        let mask = *self.mask.lock();
        RuntimeFlag::ALL
            .iter()
            .copied()
            .filter(|f| mask & f.bit() != 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_is_all_or_nothing() {
        let flags = RuntimeFlags::new();
        flags.set(RuntimeFlag::NoNewInbound);
        flags.update(&[RuntimeFlag::ShuttingDown], &[RuntimeFlag::NoNewInbound]);
        assert_eq!(flags.active(), vec![RuntimeFlag::ShuttingDown]);
        assert!(!flags.test_and_set(RuntimeFlag::ShuttingDown));
        assert!(flags.test_and_set(RuntimeFlag::Ready));
        flags.clear(RuntimeFlag::Ready);
        assert!(!flags.test(RuntimeFlag::Ready));
    }
}
