//! Shared identifiers and small value types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique session identifier
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Which side created the call leg
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => write!(f, "inbound"),
            CallDirection::Outbound => write!(f, "outbound"),
        }
    }
}

/// Flags passed along with a session request
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct OriginateFlags(u32);

impl OriginateFlags {
    pub const NONE: OriginateFlags = OriginateFlags(0);
    /// Skip the session cap and the sessions-per-second throttle
    pub const NO_LIMITS: OriginateFlags = OriginateFlags(1 << 0);
    pub const BYPASS_MEDIA: OriginateFlags = OriginateFlags(1 << 1);
    pub const PROXY_MEDIA: OriginateFlags = OriginateFlags(1 << 2);
    pub const EARLY_MEDIA: OriginateFlags = OriginateFlags(1 << 3);

    pub fn contains(&self, other: OriginateFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for OriginateFlags {
    type Output = OriginateFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        OriginateFlags(self.0 | rhs.0)
    }
}

/// Kind of media carried by a frame or tapped by a bug
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaType {
    Audio,
    Video,
    Text,
}

/// Per-technology private data slots on a session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum PrivateSlot {
    Primary = 0,
    Secondary = 1,
}

/// Number of [`PrivateSlot`]s per session
pub const PRIVATE_SLOT_COUNT: usize = 2;

/// A single DTMF digit with its duration in samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dtmf {
    pub digit: char,
    pub duration: u32,
}

impl Dtmf {
    pub fn new(digit: char, duration: u32) -> Self {
        Self { digit, duration }
    }

    pub fn is_valid_digit(digit: char) -> bool {
        matches!(digit, '0'..='9' | '*' | '#' | 'A'..='D' | 'a'..='d' | 'w' | 'W')
    }
}

macro_rules! hangup_causes {
    ($($variant:ident = $code:literal => $name:literal),* $(,)?) => {
        /// Why a call leg ended, Q.850 numbering plus switch-specific causes
        #[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub enum HangupCause {
            $($variant),*
        }

        impl HangupCause {
            /// Numeric cause code
            pub fn code(&self) -> u16 {
                match self {
                    $(HangupCause::$variant => $code),*
                }
            }

            /// Upper-case cause name as used in variables and events
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(HangupCause::$variant => $name),*
                }
            }

            pub fn from_code(code: u16) -> Option<HangupCause> {
                match code {
                    $($code => Some(HangupCause::$variant),)*
                    _ => None,
                }
            }
        }

        impl FromStr for HangupCause {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                match upper.as_str() {
                    $($name => Ok(HangupCause::$variant),)*
                    other => other
                        .parse::<u16>()
                        .ok()
                        .and_then(HangupCause::from_code)
                        .ok_or_else(|| format!("unknown hangup cause: {}", s)),
                }
            }
        }
    };
}

hangup_causes! {
    None = 0 => "NONE",
    UnallocatedNumber = 1 => "UNALLOCATED_NUMBER",
    NoRouteTransitNet = 2 => "NO_ROUTE_TRANSIT_NET",
    NoRouteDestination = 3 => "NO_ROUTE_DESTINATION",
    ChannelUnacceptable = 6 => "CHANNEL_UNACCEPTABLE",
    NormalClearing = 16 => "NORMAL_CLEARING",
    UserBusy = 17 => "USER_BUSY",
    NoUserResponse = 18 => "NO_USER_RESPONSE",
    NoAnswer = 19 => "NO_ANSWER",
    SubscriberAbsent = 20 => "SUBSCRIBER_ABSENT",
    CallRejected = 21 => "CALL_REJECTED",
    NumberChanged = 22 => "NUMBER_CHANGED",
    DestinationOutOfOrder = 27 => "DESTINATION_OUT_OF_ORDER",
    InvalidNumberFormat = 28 => "INVALID_NUMBER_FORMAT",
    FacilityRejected = 29 => "FACILITY_REJECTED",
    NormalUnspecified = 31 => "NORMAL_UNSPECIFIED",
    NormalCircuitCongestion = 34 => "NORMAL_CIRCUIT_CONGESTION",
    NetworkOutOfOrder = 38 => "NETWORK_OUT_OF_ORDER",
    NormalTemporaryFailure = 41 => "NORMAL_TEMPORARY_FAILURE",
    SwitchCongestion = 42 => "SWITCH_CONGESTION",
    RequestedChanUnavail = 44 => "REQUESTED_CHAN_UNAVAIL",
    OutgoingCallBarred = 52 => "OUTGOING_CALL_BARRED",
    IncomingCallBarred = 54 => "INCOMING_CALL_BARRED",
    ServiceUnavailable = 63 => "SERVICE_UNAVAILABLE",
    ChanNotImplemented = 66 => "CHAN_NOT_IMPLEMENTED",
    FacilityNotImplemented = 69 => "FACILITY_NOT_IMPLEMENTED",
    ServiceNotImplemented = 79 => "SERVICE_NOT_IMPLEMENTED",
    IncompatibleDestination = 88 => "INCOMPATIBLE_DESTINATION",
    RecoveryOnTimerExpire = 102 => "RECOVERY_ON_TIMER_EXPIRE",
    ProtocolError = 111 => "PROTOCOL_ERROR",
    Interworking = 127 => "INTERWORKING",
    OriginatorCancel = 487 => "ORIGINATOR_CANCEL",
    Crash = 500 => "CRASH",
    SystemShutdown = 501 => "SYSTEM_SHUTDOWN",
    LoseRace = 502 => "LOSE_RACE",
    ManagerRequest = 503 => "MANAGER_REQUEST",
    BlindTransfer = 600 => "BLIND_TRANSFER",
    AttendedTransfer = 601 => "ATTENDED_TRANSFER",
    AllottedTimeout = 602 => "ALLOTTED_TIMEOUT",
    MediaTimeout = 604 => "MEDIA_TIMEOUT",
    PickedOff = 605 => "PICKED_OFF",
}

impl Default for HangupCause {
    fn default() -> Self {
        HangupCause::None
    }
}

impl fmt::Display for HangupCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hangup_cause_names_and_codes() {
        assert_eq!(HangupCause::NormalClearing.code(), 16);
        assert_eq!(HangupCause::NormalClearing.to_string(), "NORMAL_CLEARING");
        assert_eq!("user_busy".parse::<HangupCause>().unwrap(), HangupCause::UserBusy);
        assert_eq!("503".parse::<HangupCause>().unwrap(), HangupCause::ManagerRequest);
        assert!("NOT_A_CAUSE".parse::<HangupCause>().is_err());
        assert_eq!(HangupCause::from_code(42), Some(HangupCause::SwitchCongestion));
    }

    #[test]
    fn test_originate_flags() {
        let flags = OriginateFlags::NO_LIMITS | OriginateFlags::EARLY_MEDIA;
        assert!(flags.contains(OriginateFlags::NO_LIMITS));
        assert!(!flags.contains(OriginateFlags::BYPASS_MEDIA));
        assert!(OriginateFlags::default().contains(OriginateFlags::NONE));
    }

    #[test]
    fn test_session_id_roundtrip_text() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_dtmf_digits() {
        assert!(Dtmf::is_valid_digit('5'));
        assert!(Dtmf::is_valid_digit('#'));
        assert!(!Dtmf::is_valid_digit('x'));
    }
}
