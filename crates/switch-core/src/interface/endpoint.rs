use crate::channel::CallerProfile;
use crate::errors::{Result, SwitchError};
use crate::event::Event;
use crate::frame::Frame;
use crate::message::Message;
use crate::runtime::CoreRuntime;
use crate::session::Session;
use crate::state_machine::{Signal, StateHandler};
use crate::types::{Dtmf, OriginateFlags};
use async_trait::async_trait;
use std::sync::Arc;

/// A signaling/transport technology that owns call legs.
///
/// Only `name`, `read_frame` and `write_frame` are mandatory; everything else
/// has a neutral default.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    /// Create an outbound leg towards `profile.destination_number`. The
    /// returned session is not yet running.
    async fn outgoing_channel(
        &self,
        _runtime: &Arc<CoreRuntime>,
        _profile: &CallerProfile,
        _flags: OriginateFlags,
    ) -> Result<Arc<Session>> {
        Err(SwitchError::not_implemented(format!("{} outgoing_channel", self.name())))
    }

    async fn read_frame(&self, session: &Arc<Session>, stream: usize) -> Result<Frame>;

    async fn write_frame(&self, session: &Arc<Session>, frame: Frame, stream: usize) -> Result<()>;

    /// Told about KILL/BREAK so blocking I/O can be interrupted
    async fn kill_channel(&self, _session: &Arc<Session>, _signal: Signal) -> Result<()> {
        Ok(())
    }

    async fn send_dtmf(&self, _session: &Arc<Session>, _dtmf: Dtmf) -> Result<()> {
        Ok(())
    }

    /// Synchronous indication (answer, ring, hold...) for this leg
    async fn receive_message(&self, _session: &Arc<Session>, _message: &mut Message) -> Result<()> {
        Ok(())
    }

    async fn receive_event(&self, _session: &Arc<Session>, _event: &Event) -> Result<()> {
        Ok(())
    }

    /// Per-state hooks run after the global handlers
    fn state_handler(&self) -> Option<Arc<dyn StateHandler>> {
        None
    }
}
