//! Built-in dialplans
//!
//! - `inline`: the extension is spelled out as `app:data,app:data`, taken
//!   from the dialplan argument or else from the destination number
//! - `registry`: extensions live in the configuration registry under
//!   `dialplan` / `context[name=...]`, each with a `destination` regex and an
//!   ordered list of `action` children

use crate::channel::{CallerProfile, Extension};
use crate::errors::Result;
use crate::interface::{DialplanInterface, Module, ModuleInterfaces};
use crate::session::Session;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct InlineDialplan;

impl InlineDialplan {
    /// Parse `app[:data][,app[:data]...]`
    pub fn parse(apps: &str) -> Extension {
        let mut extension = Extension::new("inline", apps);
        for entry in apps.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (application, data) = match entry.split_once(':') {
                Some((app, data)) => (app.trim(), data.trim()),
                None => (entry, ""),
            };
            if !application.is_empty() {
                extension.add_application(application, data);
            }
        }
        extension
    }
}

#[async_trait]
impl DialplanInterface for InlineDialplan {
    fn name(&self) -> &str {
        "inline"
    }

    async fn hunt(
        &self,
        session: &Arc<Session>,
        profile: &CallerProfile,
        arg: Option<&str>,
    ) -> Result<Option<Extension>> {
        let apps = arg.unwrap_or(&profile.destination_number);
        let extension = Self::parse(apps);
        if extension.is_empty() {
            debug!(uuid = %session.id(), "Inline dialplan has nothing to run");
            return Ok(None);
        }
        Ok(Some(extension))
    }
}

pub struct RegistryDialplan;

impl RegistryDialplan {
    /// First extension of `context` whose destination pattern matches.
    /// Capture groups are available to action data as `$1`, `${name}` and so on.
    fn hunt_context(context: &rvoip_infra_common::ConfigNode, destination: &str) -> Option<Extension> {
        for node in context.children_named("extension") {
            let name = node.attr("name").unwrap_or("unnamed");
            let pattern = node.attr("destination").unwrap_or("");
            let regex = match Regex::new(pattern) {
                Ok(regex) => regex,
                Err(e) => {
                    warn!(extension = name, pattern, error = %e, "Invalid destination pattern");
                    continue;
                }
            };
            let Some(captures) = regex.captures(destination) else {
                continue;
            };

            let mut extension = Extension::new(name, destination);
            for action in node.children_named("action") {
                let Some(application) = action.attr("application") else {
                    continue;
                };
                let mut data = String::new();
                captures.expand(action.attr("data").unwrap_or(""), &mut data);
                extension.add_application(application, data);
            }
            return Some(extension);
        }
        None
    }
}

#[async_trait]
impl DialplanInterface for RegistryDialplan {
    fn name(&self) -> &str {
        "registry"
    }

    async fn hunt(
        &self,
        session: &Arc<Session>,
        profile: &CallerProfile,
        arg: Option<&str>,
    ) -> Result<Option<Extension>> {
        let runtime = session.runtime();
        let Some(registry) = runtime.registry() else {
            debug!(uuid = %session.id(), "No configuration registry");
            return Ok(None);
        };
        let context_name = match arg {
            Some(context) => context.to_string(),
            None if profile.context.is_empty() => runtime.config().default_context,
            None => profile.context.clone(),
        };
        let Some(context) = registry.locate("dialplan", "context", Some("name"), Some(context_name.as_str())) else {
            warn!(uuid = %session.id(), context = %context_name, "Dialplan context not found");
            return Ok(None);
        };
        Ok(Self::hunt_context(&context, &profile.destination_number))
    }
}

/// Registers the `inline` and `registry` dialplans
pub struct DialplanModule;

#[async_trait]
impl Module for DialplanModule {
    fn name(&self) -> &str {
        "core_dialplan"
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        interfaces
            .add_dialplan(Arc::new(InlineDialplan))
            .add_dialplan(Arc::new(RegistryDialplan));
        Ok(())
    }
}
