//! Messages exchanged between sessions and their endpoints

use crate::types::SessionId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// What a message asks the receiving endpoint or session to do
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Answer,
    Progress,
    Ringing,
    Bridge,
    Unbridge,
    Transfer,
    Hold,
    Unhold,
    Display,
    TransmitText,
    Broadcast,
    ApplicationExec,
    Hangup,
    Heartbeat,
    Custom(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Answer => "ANSWER",
            MessageKind::Progress => "PROGRESS",
            MessageKind::Ringing => "RINGING",
            MessageKind::Bridge => "BRIDGE",
            MessageKind::Unbridge => "UNBRIDGE",
            MessageKind::Transfer => "TRANSFER",
            MessageKind::Hold => "HOLD",
            MessageKind::Unhold => "UNHOLD",
            MessageKind::Display => "DISPLAY",
            MessageKind::TransmitText => "TRANSMIT_TEXT",
            MessageKind::Broadcast => "BROADCAST",
            MessageKind::ApplicationExec => "APPLICATION_EXEC",
            MessageKind::Hangup => "HANGUP",
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued or directly delivered session message.
///
/// Ownership moves to the queue on push and to the consumer on pop. The
/// optional reply slot lets the sender wait for the receiver's answer.
pub struct Message {
    pub kind: MessageKind,
    pub from: Option<SessionId>,
    pub numeric_arg: i64,
    pub string_arg: Option<String>,
    pub string_args: Vec<String>,
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
    /// Not delivered before this instant
    pub delivery_time: Option<Instant>,
    reply: Option<oneshot::Sender<String>>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind)
            .field("from", &self.from)
            .field("numeric_arg", &self.numeric_arg)
            .field("string_arg", &self.string_arg)
            .field("string_args", &self.string_args)
            .field("has_payload", &self.payload.is_some())
            .field("delivery_time", &self.delivery_time)
            .field("wants_reply", &self.reply.is_some())
            .finish()
    }
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            from: None,
            numeric_arg: 0,
            string_arg: None,
            string_args: Vec::new(),
            payload: None,
            delivery_time: None,
            reply: None,
        }
    }

    pub fn from_session(mut self, from: SessionId) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_string(mut self, arg: impl Into<String>) -> Self {
        self.string_arg = Some(arg.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.string_args = args;
        self
    }

    pub fn with_numeric(mut self, arg: i64) -> Self {
        self.numeric_arg = arg;
        self
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    pub fn deliver_at(mut self, when: Instant) -> Self {
        self.delivery_time = Some(when);
        self
    }

    /// Attach a reply slot and return the receiving end
    pub fn with_reply(mut self) -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        self.reply = Some(tx);
        (self, rx)
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.delivery_time.map_or(true, |at| at <= now)
    }

    /// Answer the sender; false when nobody asked or the sender went away
    pub fn reply(&mut self, answer: impl Into<String>) -> bool {
        match self.reply.take() {
            Some(tx) => tx.send(answer.into()).is_ok(),
            None => false,
        }
    }
}
