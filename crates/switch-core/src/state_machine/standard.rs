//! Built-in behavior run after every other handler of a state

use super::handler::{HandlerOutcome, StateHandler};
use super::Signal;
use crate::channel::{ChannelFlag, ChannelState};
use crate::errors::{Result, SwitchError};
use crate::event::EventType;
use crate::session::Session;
use crate::types::HangupCause;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stream every built-in media loop works on
const PRIMARY_STREAM: usize = 0;

pub(crate) struct StandardHandlers;

impl StandardHandlers {
    /// Parse `name[,name...]`. An entry written `name:arg` takes the rest of
    /// the list as its argument, so inline application lists keep their
    /// commas.
    fn parse_dialplans(list: &str) -> Vec<(&str, Option<&str>)> {
        let mut out = Vec::new();
        let mut rest = list.trim();
        while !rest.is_empty() {
            let colon = rest.find(':');
            let comma = rest.find(',');
            match (colon, comma) {
                (Some(c), comma) if comma.map_or(true, |m| c < m) => {
                    let arg = rest[c + 1..].trim();
                    out.push((rest[..c].trim(), (!arg.is_empty()).then_some(arg)));
                    break;
                }
                (_, Some(m)) => {
                    out.push((rest[..m].trim(), None));
                    rest = rest[m + 1..].trim_start();
                }
                (_, None) => {
                    out.push((rest, None));
                    break;
                }
            }
        }
        out.retain(|(name, _)| !name.is_empty());
        out
    }
}

#[async_trait]
impl StateHandler for StandardHandlers {
    fn name(&self) -> &str {
        "standard"
    }

    async fn on_init(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        session.fire_channel_event(EventType::ChannelCreate, |_| {});
        if session.channel().state() == ChannelState::Init {
            session.channel().request_state(ChannelState::Routing)?;
        }
        Ok(HandlerOutcome::Continue)
    }

    /// Hunt the dialplans named by the caller profile, in order, until one
    /// returns an extension
    async fn on_routing(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        let runtime = session.runtime();
        let Some(profile) = channel.caller_profile() else {
            error!(uuid = %session.id(), name = %channel.name(), "No caller profile to route");
            session.hangup(HangupCause::DestinationOutOfOrder);
            return Ok(HandlerOutcome::Continue);
        };

        let dialplans = if profile.dialplan.is_empty() {
            runtime.config().default_dialplan
        } else {
            profile.dialplan.clone()
        };

        for (name, arg) in Self::parse_dialplans(&dialplans) {
            let Some(dialplan) = runtime.modules().dialplan(name) else {
                warn!(uuid = %session.id(), dialplan = name, "No dialplan interface");
                continue;
            };
            debug!(uuid = %session.id(), dialplan = name, destination = %profile.destination_number, "Hunting");
            if let Some(extension) = dialplan.hunt(session, &profile, arg).await? {
                info!(
                    uuid = %session.id(),
                    name = %channel.name(),
                    dialplan = name,
                    extension = %extension.name,
                    "Found extension"
                );
                channel.set_extension(Some(extension));
                if channel.state() == ChannelState::Routing {
                    channel.request_state(ChannelState::Execute)?;
                }
                return Ok(HandlerOutcome::Continue);
            }
        }

        warn!(
            uuid = %session.id(),
            name = %channel.name(),
            destination = %profile.destination_number,
            context = %profile.context,
            "No route"
        );
        session.hangup(HangupCause::NoRouteDestination);
        Ok(HandlerOutcome::Continue)
    }

    /// Run the extension's applications in order until one moves the
    /// channel elsewhere; hang up when they run out
    async fn on_execute(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        let Some(extension) = channel.extension() else {
            warn!(uuid = %session.id(), name = %channel.name(), "No extension to execute");
            session.hangup(HangupCause::NormalClearing);
            return Ok(HandlerOutcome::Continue);
        };

        for app in &extension.applications {
            if session.interrupted(ChannelState::Execute) {
                break;
            }
            match session.execute_application(&app.application, &app.data).await {
                Ok(()) | Err(SwitchError::Break) => {}
                Err(SwitchError::NotFound { .. }) => {
                    error!(uuid = %session.id(), application = %app.application, "Invalid application");
                    session.hangup(HangupCause::DestinationOutOfOrder);
                    return Ok(HandlerOutcome::Continue);
                }
                Err(e) => {
                    warn!(uuid = %session.id(), application = %app.application, error = %e, "Application failed");
                }
            }
            session.signals().take(Signal::Break);
            if channel.state() != ChannelState::Execute {
                return Ok(HandlerOutcome::Continue);
            }
        }

        if channel.state() == ChannelState::Execute && channel.ready() {
            debug!(uuid = %session.id(), name = %channel.name(), "No more applications");
            session.hangup(HangupCause::NormalClearing);
        }
        Ok(HandlerOutcome::Continue)
    }

    /// Echo whatever is read back to the endpoint
    async fn on_exchange_media(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        while !session.interrupted(ChannelState::ExchangeMedia) {
            let frame = match session.read_frame(PRIMARY_STREAM).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(uuid = %session.id(), error = %e, "Media exchange read ended");
                    break;
                }
            };
            if let Err(e) = session.write_frame(frame, PRIMARY_STREAM).await {
                debug!(uuid = %session.id(), error = %e, "Media exchange write ended");
                break;
            }
        }
        Ok(HandlerOutcome::Continue)
    }

    /// Read and discard media
    async fn on_consume_media(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        while !session.interrupted(ChannelState::ConsumeMedia) {
            if let Err(e) = session.read_frame(PRIMARY_STREAM).await {
                debug!(uuid = %session.id(), error = %e, "Media consume ended");
                break;
            }
        }
        Ok(HandlerOutcome::Continue)
    }

    async fn on_park(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        if !channel.flags().test_and_set(ChannelFlag::Park) {
            debug!(uuid = %session.id(), name = %channel.name(), "Parked");
            session.fire_channel_event(EventType::ChannelPark, |_| {});
        }
        Ok(HandlerOutcome::Continue)
    }

    async fn on_hibernate(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        session.channel().set_flag(ChannelFlag::Hibernate);
        Ok(HandlerOutcome::Continue)
    }

    /// Back to the extension if there is one, otherwise park
    async fn on_reset(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        channel.clear_flag(ChannelFlag::Hibernate);
        channel.clear_flag(ChannelFlag::Transfer);
        channel.set_flag(ChannelFlag::Reset);
        let next = if channel.extension().is_some() {
            ChannelState::Execute
        } else {
            ChannelState::Park
        };
        if channel.state() == ChannelState::Reset {
            channel.request_state(next)?;
        }
        Ok(HandlerOutcome::Continue)
    }

    async fn on_hangup(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        channel.clear_flag(ChannelFlag::Hibernate);
        session.disable_heartbeat();
        session.fire_channel_event(EventType::ChannelHangup, |e| {
            e.add_header("Hangup-Cause-Code", channel.cause().code().to_string());
        });
        Ok(HandlerOutcome::Continue)
    }

    async fn on_reporting(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        let channel = session.channel();
        session.fire_channel_event(EventType::ChannelHangupComplete, |e| {
            let timetable = channel.timetable();
            if let (Some(created), Some(hungup)) = (timetable.created, timetable.hungup) {
                e.add_header("Duration-Ms", (hungup - created).num_milliseconds().to_string());
            }
            for (name, value) in channel.variables() {
                e.add_header(format!("variable_{}", name), value);
            }
        });
        Ok(HandlerOutcome::Continue)
    }

    /// Tear down media bugs, codecs and queues
    async fn on_destroy(&self, session: &Arc<Session>) -> Result<HandlerOutcome> {
        session.release_resources();
        session.fire_channel_event(EventType::ChannelDestroy, |_| {});
        Ok(HandlerOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dialplans() {
        assert_eq!(StandardHandlers::parse_dialplans("inline"), vec![("inline", None)]);
        assert_eq!(
            StandardHandlers::parse_dialplans("registry, inline:answer,park"),
            vec![("registry", None), ("inline", Some("answer,park"))]
        );
        assert_eq!(StandardHandlers::parse_dialplans("registry:"), vec![("registry", None)]);
        assert_eq!(StandardHandlers::parse_dialplans(" , inline"), vec![("inline", None)]);
        assert!(StandardHandlers::parse_dialplans("").is_empty());
    }
}
