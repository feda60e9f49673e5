//! Channel states and the transitions allowed between them

use serde::{Deserialize, Serialize};
use std::fmt;

/// States a channel moves through, in lifecycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    New,
    Init,
    Routing,
    SoftExecute,
    Execute,
    ExchangeMedia,
    Park,
    ConsumeMedia,
    Hibernate,
    Reset,
    Hangup,
    Reporting,
    Destroy,
}

impl ChannelState {
    pub const ALL: [ChannelState; 13] = [
        ChannelState::New,
        ChannelState::Init,
        ChannelState::Routing,
        ChannelState::SoftExecute,
        ChannelState::Execute,
        ChannelState::ExchangeMedia,
        ChannelState::Park,
        ChannelState::ConsumeMedia,
        ChannelState::Hibernate,
        ChannelState::Reset,
        ChannelState::Hangup,
        ChannelState::Reporting,
        ChannelState::Destroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::New => "CS_NEW",
            ChannelState::Init => "CS_INIT",
            ChannelState::Routing => "CS_ROUTING",
            ChannelState::SoftExecute => "CS_SOFT_EXECUTE",
            ChannelState::Execute => "CS_EXECUTE",
            ChannelState::ExchangeMedia => "CS_EXCHANGE_MEDIA",
            ChannelState::Park => "CS_PARK",
            ChannelState::ConsumeMedia => "CS_CONSUME_MEDIA",
            ChannelState::Hibernate => "CS_HIBERNATE",
            ChannelState::Reset => "CS_RESET",
            ChannelState::Hangup => "CS_HANGUP",
            ChannelState::Reporting => "CS_REPORTING",
            ChannelState::Destroy => "CS_DESTROY",
        }
    }

    /// States an application may move between freely
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            ChannelState::SoftExecute
                | ChannelState::Execute
                | ChannelState::ExchangeMedia
                | ChannelState::Park
                | ChannelState::ConsumeMedia
                | ChannelState::Hibernate
        )
    }

    /// HANGUP and everything after it
    pub fn is_hungup(&self) -> bool {
        *self >= ChannelState::Hangup
    }

    pub fn is_terminal(&self) -> bool {
        *self == ChannelState::Destroy
    }

    /// Whether a request to move from `self` to `next` is legal.
    ///
    /// NEW and INIT are never re-entered, ROUTING through RESET move
    /// laterally, any live state may hang up, and HANGUP → REPORTING →
    /// DESTROY only moves forward. Requesting the current state is a no-op
    /// and always allowed except from DESTROY.
    pub fn can_transition_to(&self, next: ChannelState) -> bool {
        use ChannelState::*;
        if *self == Destroy {
            return false;
        }
        if *self == next {
            return true;
        }
        match next {
            New => false,
            Init => *self == New,
            Routing | SoftExecute | Execute | ExchangeMedia | Park | ConsumeMedia | Hibernate
            | Reset => (Init..=Reset).contains(self),
            Hangup => *self < Hangup,
            Reporting => *self == Hangup,
            Destroy => *self == Reporting,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChannelState::*;

    #[test]
    fn test_forward_path() {
        let path = [New, Init, Routing, Execute, Hangup, Reporting, Destroy];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_lateral_moves() {
        assert!(Park.can_transition_to(Routing));
        assert!(Execute.can_transition_to(Park));
        assert!(Park.can_transition_to(ExchangeMedia));
        assert!(ExchangeMedia.can_transition_to(Execute));
        assert!(Reset.can_transition_to(Execute));
        assert!(Hibernate.can_transition_to(SoftExecute));
    }

    #[test]
    fn test_no_reentry_after_hangup() {
        for state in ChannelState::ALL {
            if state < Hangup {
                assert!(!Hangup.can_transition_to(state));
                assert!(!Reporting.can_transition_to(state));
            }
            if state != Destroy {
                assert!(!Destroy.can_transition_to(state));
            }
        }
        assert!(!Destroy.can_transition_to(Destroy));
        assert!(!Hangup.can_transition_to(Destroy));
        assert!(!Execute.can_transition_to(Reporting));
    }

    #[test]
    fn test_new_and_init_not_reentered() {
        assert!(!Routing.can_transition_to(Init));
        assert!(!Init.can_transition_to(New));
        assert!(!New.can_transition_to(Routing));
        assert!(New.can_transition_to(Hangup));
    }

    #[test]
    fn test_classification() {
        assert!(Park.is_working());
        assert!(!Routing.is_working());
        assert!(Reporting.is_hungup());
        assert!(!Reset.is_hungup());
        assert_eq!(ExchangeMedia.to_string(), "CS_EXCHANGE_MEDIA");
    }
}
