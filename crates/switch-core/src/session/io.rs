//! Frame read/write through the endpoint, the session codecs and the bug chain

use super::Session;
use crate::channel::{ChannelFlag, ChannelState};
use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use crate::media_bug::StreamDirection;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

impl Session {
    fn media_closed(&self) -> bool {
        self.channel().running_state() == ChannelState::Destroy || self.media_bugs().is_closed()
    }

    /// Read one frame from the endpoint, decode it to linear and pass it
    /// through the read side of the bug chain.
    ///
    /// Reads keep working after hangup so bugs can still see media until the
    /// session is destroyed.
    pub async fn read_frame(self: &Arc<Self>, stream: usize) -> Result<Frame> {
        if self.media_closed() {
            return Err(SwitchError::ChannelNotReady {
                uuid: self.id().to_string(),
            });
        }
        self.media_bugs().prune(Instant::now());

        let raw = self.endpoint()?.read_frame(self, stream).await?;
        let mut frame = {
            let codec = self.read_codec();
            match codec.as_ref() {
                Some(codec) if raw.is_audio() => codec.decode(&raw)?,
                _ => raw,
            }
        };

        if !self.channel().test_flag(ChannelFlag::PauseBugs) {
            let invoked = self.media_bugs().dispatch(StreamDirection::Read, &mut frame);
            if invoked > 0 {
                trace!(uuid = %self.id(), invoked, "Read frame tapped");
            }
        }
        Ok(frame)
    }

    /// Pass one linear frame through the write side of the bug chain, encode
    /// it and hand it to the endpoint
    pub async fn write_frame(self: &Arc<Self>, mut frame: Frame, stream: usize) -> Result<()> {
        if self.media_closed() {
            return Err(SwitchError::ChannelNotReady {
                uuid: self.id().to_string(),
            });
        }

        if !self.channel().test_flag(ChannelFlag::PauseBugs) {
            self.media_bugs().prune(Instant::now());
            self.media_bugs().dispatch(StreamDirection::Write, &mut frame);
        }

        let frame = {
            let codec = self.write_codec();
            match codec.as_ref() {
                Some(codec) if frame.is_audio() => codec.encode(&frame)?,
                _ => frame,
            }
        };
        self.endpoint()?.write_frame(self, frame, stream).await
    }
}
