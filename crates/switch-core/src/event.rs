//! Events: typed header multimaps with an optional body, and the runtime bus
//! that fans them out to subscribers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    ChannelCreate,
    ChannelDestroy,
    ChannelState,
    ChannelAnswer,
    ChannelHangup,
    ChannelHangupComplete,
    ChannelExecute,
    ChannelExecuteComplete,
    ChannelPark,
    ChannelUnpark,
    ChannelTransfer,
    MediaBugStart,
    MediaBugStop,
    Dtmf,
    Heartbeat,
    SessionHeartbeat,
    ModuleLoad,
    ModuleUnload,
    Shutdown,
    PrivateCommand,
    Message,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ChannelCreate => "CHANNEL_CREATE",
            EventType::ChannelDestroy => "CHANNEL_DESTROY",
            EventType::ChannelState => "CHANNEL_STATE",
            EventType::ChannelAnswer => "CHANNEL_ANSWER",
            EventType::ChannelHangup => "CHANNEL_HANGUP",
            EventType::ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
            EventType::ChannelExecute => "CHANNEL_EXECUTE",
            EventType::ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
            EventType::ChannelPark => "CHANNEL_PARK",
            EventType::ChannelUnpark => "CHANNEL_UNPARK",
            EventType::ChannelTransfer => "CHANNEL_TRANSFER",
            EventType::MediaBugStart => "MEDIA_BUG_START",
            EventType::MediaBugStop => "MEDIA_BUG_STOP",
            EventType::Dtmf => "DTMF",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::SessionHeartbeat => "SESSION_HEARTBEAT",
            EventType::ModuleLoad => "MODULE_LOAD",
            EventType::ModuleUnload => "MODULE_UNLOAD",
            EventType::Shutdown => "SHUTDOWN",
            EventType::PrivateCommand => "PRIVATE_COMMAND",
            EventType::Message => "MESSAGE",
            EventType::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event. Headers form an ordered multimap: a name may repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub subclass: Option<String>,
    headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        let mut event = Self {
            event_type,
            subclass: None,
            headers: Vec::new(),
            body: None,
            timestamp: Utc::now(),
        };
        event.add_header("Event-Name", event_type.as_str());
        event
    }

    /// A `CUSTOM` event identified by its subclass
    pub fn custom(subclass: impl Into<String>) -> Self {
        let subclass = subclass.into();
        let mut event = Self::new(EventType::Custom);
        event.add_header("Event-Subclass", subclass.clone());
        event.subclass = Some(subclass);
        event
    }

    /// Append a header, keeping existing values of the same name
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace every value of `name` with a single one
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.del_header(&name);
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// First value of `name` (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn del_header(&mut self, name: &str) -> usize {
        let before = self.headers.len();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.headers.len()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// JSON object form; repeated headers become arrays
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.headers {
            match map.get_mut(name) {
                Some(serde_json::Value::Array(values)) => {
                    values.push(serde_json::Value::String(value.clone()))
                }
                Some(existing) => {
                    let first = existing.take();
                    *existing = serde_json::Value::Array(vec![
                        first,
                        serde_json::Value::String(value.clone()),
                    ]);
                }
                None => {
                    map.insert(name.clone(), serde_json::Value::String(value.clone()));
                }
            }
        }
        map.insert(
            "Event-Date-Timestamp".to_string(),
            serde_json::Value::String(self.timestamp.to_rfc3339()),
        );
        if let Some(body) = &self.body {
            map.insert("_body".to_string(), serde_json::Value::String(body.clone()));
        }
        serde_json::Value::Object(map)
    }
}

/// Fan-out of runtime events to any number of subscribers.
///
/// Firing never blocks; a subscriber that falls behind loses the oldest
/// events and sees `RecvError::Lagged`.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Event>>,
    fired: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            fired: AtomicU64::new(0),
        }
    }

    pub fn fire(&self, event: Event) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event = %event.event_type, "Firing event");
        // No receivers is fine
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}
