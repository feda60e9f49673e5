use super::InterfaceGuard;
use crate::errors::{Result, SwitchError};
use crate::frame::Frame;
use bytes::Bytes;
use std::fmt;

/// One concrete packetization a codec supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecImplementation {
    pub iananame: String,
    /// Static RTP payload type, if any
    pub payload: Option<u8>,
    pub rate: u32,
    pub channels: u8,
    pub ptime_ms: u32,
    pub bits_per_second: u32,
}

impl CodecImplementation {
    pub fn samples_per_packet(&self) -> u32 {
        self.rate / 1000 * self.ptime_ms
    }
}

/// Encoder/decoder between linear PCM and a wire format
pub trait CodecInterface: Send + Sync {
    fn name(&self) -> &str;

    fn implementations(&self) -> Vec<CodecImplementation>;

    fn encode(&self, implementation: &CodecImplementation, pcm: &[i16]) -> Result<Bytes>;

    fn decode(&self, implementation: &CodecImplementation, data: &[u8]) -> Result<Vec<i16>>;
}

/// A codec bound to one implementation, held by a session as its read or
/// write codec. Holding it keeps the codec module loaded.
pub struct Codec {
    interface: InterfaceGuard<dyn CodecInterface>,
    implementation: CodecImplementation,
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("name", &self.interface.name())
            .field("implementation", &self.implementation)
            .finish()
    }
}

impl Codec {
    /// Pick the implementation matching `rate` and `ptime_ms`; zero matches any
    pub fn new(interface: InterfaceGuard<dyn CodecInterface>, rate: u32, ptime_ms: u32) -> Result<Self> {
        let implementation = interface
            .implementations()
            .into_iter()
            .find(|i| (rate == 0 || i.rate == rate) && (ptime_ms == 0 || i.ptime_ms == ptime_ms))
            .ok_or_else(|| {
                SwitchError::Codec(format!(
                    "{} has no implementation for {}Hz/{}ms",
                    interface.name(),
                    rate,
                    ptime_ms
                ))
            })?;
        Ok(Self {
            interface,
            implementation,
        })
    }

    pub fn name(&self) -> &str {
        self.interface.name()
    }

    pub fn implementation(&self) -> &CodecImplementation {
        &self.implementation
    }

    fn is_linear(&self) -> bool {
        self.implementation.iananame.eq_ignore_ascii_case("L16")
    }

    /// Linear frame in, wire frame out
    pub fn encode(&self, frame: &Frame) -> Result<Frame> {
        if frame.codec.is_some() || self.is_linear() {
            return Ok(frame.clone());
        }
        let data = self.interface.encode(&self.implementation, &frame.linear_samples())?;
        let mut out = frame.clone();
        out.data = data;
        out.codec = Some(self.implementation.iananame.clone());
        Ok(out)
    }

    /// Wire frame in, linear frame out. Frames in another encoding are an error.
    pub fn decode(&self, frame: &Frame) -> Result<Frame> {
        match frame.codec.as_deref() {
            None => Ok(frame.clone()),
            Some(name) if name.eq_ignore_ascii_case(&self.implementation.iananame) => {
                let pcm = self.interface.decode(&self.implementation, &frame.data)?;
                let mut out = Frame::from_linear(&pcm, self.implementation.rate);
                out.timestamp = frame.timestamp;
                out.seq = frame.seq;
                out.cng = frame.cng;
                Ok(out)
            }
            Some(name) => Err(SwitchError::Codec(format!(
                "{} cannot decode {}",
                self.implementation.iananame, name
            ))),
        }
    }
}
