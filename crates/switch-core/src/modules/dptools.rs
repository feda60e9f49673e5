//! Core dialplan applications

use crate::channel::ChannelState;
use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use crate::interface::{Application, Module, ModuleInterfaces};
use crate::session::Session;
use crate::types::HangupCause;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn, Level};

/// Packetization used when generating media
const PTIME_MS: u32 = 20;
const DEFAULT_RATE: u32 = 8000;

fn parse_millis(app: &str, data: &str) -> Result<Duration> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(Duration::ZERO);
    }
    data.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| SwitchError::handler(format!("{}: invalid duration '{}'", app, data)))
}

fn move_to(session: &Session, state: ChannelState) -> Result<()> {
    let channel = session.channel();
    if channel.state() != state {
        channel.request_state(state)?;
    }
    Ok(())
}

pub struct AnswerApp;

#[async_trait]
impl Application for AnswerApp {
    fn name(&self) -> &str {
        "answer"
    }

    fn description(&self) -> &str {
        "Answer the call"
    }

    async fn execute(&self, session: &Arc<Session>, _data: &str) -> Result<()> {
        session.answer().await
    }
}

pub struct HangupApp;

#[async_trait]
impl Application for HangupApp {
    fn name(&self) -> &str {
        "hangup"
    }

    fn description(&self) -> &str {
        "Hang up the call"
    }

    fn syntax(&self) -> &str {
        "[<cause>]"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let data = data.trim();
        let cause = if data.is_empty() {
            HangupCause::NormalClearing
        } else {
            data.parse().unwrap_or_else(|_| {
                warn!(uuid = %session.id(), cause = data, "Unknown hangup cause");
                HangupCause::NormalClearing
            })
        };
        session.hangup(cause);
        Ok(())
    }
}

pub struct ParkApp;

#[async_trait]
impl Application for ParkApp {
    fn name(&self) -> &str {
        "park"
    }

    fn description(&self) -> &str {
        "Park the call"
    }

    async fn execute(&self, session: &Arc<Session>, _data: &str) -> Result<()> {
        move_to(session, ChannelState::Park)
    }
}

pub struct EchoApp;

#[async_trait]
impl Application for EchoApp {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Send the caller's media back to them"
    }

    async fn execute(&self, session: &Arc<Session>, _data: &str) -> Result<()> {
        move_to(session, ChannelState::ExchangeMedia)
    }
}

pub struct SleepApp;

#[async_trait]
impl Application for SleepApp {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Pause the channel for a number of milliseconds"
    }

    fn syntax(&self) -> &str {
        "<ms>"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let duration = parse_millis(self.name(), data)?;
        session.sleep(duration).await
    }
}

pub struct SetApp;

#[async_trait]
impl Application for SetApp {
    fn name(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Set a channel variable; an empty value unsets it"
    }

    fn syntax(&self) -> &str {
        "<name>=<value>"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let Some((name, value)) = data.split_once('=') else {
            warn!(uuid = %session.id(), data, "set: missing '='");
            return Ok(());
        };
        let name = name.trim();
        if name.is_empty() {
            warn!(uuid = %session.id(), data, "set: missing variable name");
            return Ok(());
        }
        if value.is_empty() {
            session.channel().unset_variable(name);
        } else {
            session.channel().set_variable(name, value);
        }
        debug!(uuid = %session.id(), name, value, "Variable set");
        Ok(())
    }
}

pub struct LogApp;

#[async_trait]
impl Application for LogApp {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a line to the log"
    }

    fn syntax(&self) -> &str {
        "[<level>] <message>"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let data = data.trim();
        let (level, message) = match data.split_once(' ') {
            Some((first, rest)) => match rvoip_infra_common::parse_log_level(first) {
                Ok(level) => (level, rest.trim()),
                Err(_) => (Level::DEBUG, data),
            },
            None => (Level::DEBUG, data),
        };
        let uuid = session.id();
        match level {
            Level::ERROR => error!(%uuid, "{}", message),
            Level::WARN => warn!(%uuid, "{}", message),
            Level::INFO => info!(%uuid, "{}", message),
            Level::DEBUG => debug!(%uuid, "{}", message),
            _ => trace!(%uuid, "{}", message),
        }
        Ok(())
    }
}

pub struct TransferApp;

#[async_trait]
impl Application for TransferApp {
    fn name(&self) -> &str {
        "transfer"
    }

    fn description(&self) -> &str {
        "Route the call to a new destination"
    }

    fn syntax(&self) -> &str {
        "<destination> [<dialplan> [<context>]]"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let mut args = data.split_whitespace();
        let destination = args
            .next()
            .ok_or_else(|| SwitchError::handler("transfer: missing destination"))?;
        session.transfer(destination, args.next(), args.next())
    }
}

/// Write silence to the endpoint, paced by the `soft` timer
pub struct PlaybackSilenceApp;

#[async_trait]
impl Application for PlaybackSilenceApp {
    fn name(&self) -> &str {
        "playback_silence"
    }

    fn description(&self) -> &str {
        "Play silence for a number of milliseconds"
    }

    fn syntax(&self) -> &str {
        "<ms>"
    }

    async fn execute(&self, session: &Arc<Session>, data: &str) -> Result<()> {
        let duration = parse_millis(self.name(), data)?;
        let timer = session
            .runtime()
            .modules()
            .timer("soft")
            .ok_or_else(|| SwitchError::not_found("timer", "soft"))?;
        let rate = session
            .write_codec()
            .as_ref()
            .map_or(DEFAULT_RATE, |c| c.implementation().rate);
        let samples = rate / 1000 * PTIME_MS;
        let mut handle = timer.create(Duration::from_millis(u64::from(PTIME_MS)), samples)?;
        drop(timer);

        let state = session.channel().state();
        let frames = duration.as_millis() as u64 / u64::from(PTIME_MS);
        for seq in 0..frames {
            if session.interrupted(state) {
                return Err(SwitchError::Break);
            }
            handle.next().await?;
            let frame = Frame::silence(rate, PTIME_MS).with_timestamp(handle.samplecount() as u32, seq as u16);
            session.write_frame(frame, 0).await?;
        }
        Ok(())
    }
}

/// Registers the core applications
pub struct DptoolsModule;

#[async_trait]
impl Module for DptoolsModule {
    fn name(&self) -> &str {
        "core_dptools"
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        interfaces
            .add_application(Arc::new(AnswerApp))
            .add_application(Arc::new(HangupApp))
            .add_application(Arc::new(ParkApp))
            .add_application(Arc::new(SleepApp))
            .add_application(Arc::new(SetApp))
            .add_application(Arc::new(EchoApp))
            .add_application(Arc::new(LogApp))
            .add_application(Arc::new(TransferApp))
            .add_application(Arc::new(PlaybackSilenceApp));
        Ok(())
    }
}
