//! Lock-free channel flag set

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Boolean channel attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelFlag {
    Answered = 0,
    EarlyMedia,
    Outbound,
    Originator,
    Bridged,
    Hold,
    Video,
    PauseBugs,
    Park,
    Transfer,
    DestroyRequested,
    MediaAck,
    BypassMedia,
    ProxyMedia,
    Ring,
    Intercepted,
    Hibernate,
    Reset,
    Heartbeat,
    Break,
}

impl ChannelFlag {
    const ALL: [ChannelFlag; 20] = [
        ChannelFlag::Answered,
        ChannelFlag::EarlyMedia,
        ChannelFlag::Outbound,
        ChannelFlag::Originator,
        ChannelFlag::Bridged,
        ChannelFlag::Hold,
        ChannelFlag::Video,
        ChannelFlag::PauseBugs,
        ChannelFlag::Park,
        ChannelFlag::Transfer,
        ChannelFlag::DestroyRequested,
        ChannelFlag::MediaAck,
        ChannelFlag::BypassMedia,
        ChannelFlag::ProxyMedia,
        ChannelFlag::Ring,
        ChannelFlag::Intercepted,
        ChannelFlag::Hibernate,
        ChannelFlag::Reset,
        ChannelFlag::Heartbeat,
        ChannelFlag::Break,
    ];

    fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}

/// Set of [`ChannelFlag`]s, safe to flip from any task
#[derive(Default)]
pub struct ChannelFlags(AtomicU64);

impl ChannelFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, flag: ChannelFlag) {
        self.0.fetch_or(flag.bit(), Ordering::AcqRel);
    }

    pub fn clear(&self, flag: ChannelFlag) {
        self.0.fetch_and(!flag.bit(), Ordering::AcqRel);
    }

    pub fn test(&self, flag: ChannelFlag) -> bool {
        self.0.load(Ordering::Acquire) & flag.bit() != 0
    }

    /// Set the flag and report whether it was already set
    pub fn test_and_set(&self, flag: ChannelFlag) -> bool {
        self.0.fetch_or(flag.bit(), Ordering::AcqRel) & flag.bit() != 0
    }

    /// Clear the flag and report whether it was set
    pub fn test_and_clear(&self, flag: ChannelFlag) -> bool {
        self.0.fetch_and(!flag.bit(), Ordering::AcqRel) & flag.bit() != 0
    }

    pub fn active(&self) -> Vec<ChannelFlag> {
        let bits = self.0.load(Ordering::Acquire);
        ChannelFlag::ALL
            .into_iter()
            .filter(|f| bits & f.bit() != 0)
            .collect()
    }
}

impl fmt::Debug for ChannelFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.active()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clear() {
        let flags = ChannelFlags::new();
        assert!(!flags.test(ChannelFlag::Answered));
        flags.set(ChannelFlag::Answered);
        flags.set(ChannelFlag::Break);
        assert!(flags.test(ChannelFlag::Answered));
        assert_eq!(flags.active(), vec![ChannelFlag::Answered, ChannelFlag::Break]);
        flags.clear(ChannelFlag::Answered);
        assert!(!flags.test(ChannelFlag::Answered));
    }

    #[test]
    fn test_test_and_set() {
        let flags = ChannelFlags::new();
        assert!(!flags.test_and_set(ChannelFlag::Park));
        assert!(flags.test_and_set(ChannelFlag::Park));
        assert!(flags.test_and_clear(ChannelFlag::Park));
        assert!(!flags.test_and_clear(ChannelFlag::Park));
    }
}
