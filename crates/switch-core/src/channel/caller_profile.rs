//! Caller profiles, dialplan extensions and channel timestamps

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who is calling, whom they asked for and where routing should look
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerProfile {
    pub caller_id_name: String,
    pub caller_id_number: String,
    pub destination_number: String,
    /// Dialplan interface(s) to hunt, comma separated; empty means the default
    pub dialplan: String,
    pub context: String,
    pub network_addr: Option<String>,
    pub ani: Option<String>,
    pub rdnis: Option<String>,
    /// Endpoint that produced the profile
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl CallerProfile {
    pub fn new(destination_number: impl Into<String>) -> Self {
        Self {
            caller_id_name: String::new(),
            caller_id_number: String::new(),
            destination_number: destination_number.into(),
            dialplan: String::new(),
            context: String::new(),
            network_addr: None,
            ani: None,
            rdnis: None,
            source: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_caller_id(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.caller_id_name = name.into();
        self.caller_id_number = number.into();
        self
    }

    pub fn with_dialplan(mut self, dialplan: impl Into<String>) -> Self {
        self.dialplan = dialplan.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_network_addr(mut self, addr: impl Into<String>) -> Self {
        self.network_addr = Some(addr.into());
        self
    }

    pub fn with_ani(mut self, ani: impl Into<String>) -> Self {
        self.ani = Some(ani.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Copy used when a transfer rewrites the destination
    pub fn transferred(&self, destination: &str, dialplan: Option<&str>, context: Option<&str>) -> Self {
        let mut next = self.clone();
        next.rdnis = Some(self.destination_number.clone());
        next.destination_number = destination.to_string();
        if let Some(dialplan) = dialplan {
            next.dialplan = dialplan.to_string();
        }
        if let Some(context) = context {
            next.context = context.to_string();
        }
        next.created_at = Utc::now();
        next
    }
}

/// One application invocation inside an extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionApp {
    pub application: String,
    pub data: String,
}

impl ExtensionApp {
    pub fn new(application: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            data: data.into(),
        }
    }
}

/// Result of a dialplan hunt: the applications to run, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    pub number: String,
    pub applications: Vec<ExtensionApp>,
}

impl Extension {
    pub fn new(name: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            number: number.into(),
            applications: Vec::new(),
        }
    }

    pub fn add_application(&mut self, application: impl Into<String>, data: impl Into<String>) {
        self.applications.push(ExtensionApp::new(application, data));
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

/// Wall-clock milestones of a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timetable {
    pub created: Option<DateTime<Utc>>,
    pub progress: Option<DateTime<Utc>>,
    pub answered: Option<DateTime<Utc>>,
    pub hungup: Option<DateTime<Utc>>,
    pub transferred: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_keeps_caller_and_sets_rdnis() {
        let profile = CallerProfile::new("1000")
            .with_caller_id("Alice", "2000")
            .with_context("default");
        let next = profile.transferred("3000", Some("inline"), None);
        assert_eq!(next.destination_number, "3000");
        assert_eq!(next.rdnis.as_deref(), Some("1000"));
        assert_eq!(next.caller_id_number, "2000");
        assert_eq!(next.dialplan, "inline");
        assert_eq!(next.context, "default");
    }

    #[test]
    fn test_extension_apps() {
        let mut ext = Extension::new("test", "1000");
        assert!(ext.is_empty());
        ext.add_application("answer", "");
        ext.add_application("park", "");
        assert_eq!(ext.applications[1].application, "park");
    }
}
