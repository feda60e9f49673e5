//! Media frames flowing through a session

use crate::types::MediaType;
use bytes::Bytes;

/// One packetization interval worth of media
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub media: MediaType,
    /// Payload, linear 16-bit little-endian PCM unless `codec` says otherwise
    pub data: Bytes,
    pub samples: u32,
    pub rate: u32,
    pub channels: u8,
    pub timestamp: u32,
    pub seq: u16,
    /// Comfort noise / silence placeholder
    pub cng: bool,
    /// Encoding name when the payload is not linear
    pub codec: Option<String>,
}

impl Frame {
    /// Linear audio frame
    pub fn audio(data: impl Into<Bytes>, rate: u32) -> Self {
        let data = data.into();
        Self {
            media: MediaType::Audio,
            samples: (data.len() / 2) as u32,
            data,
            rate,
            channels: 1,
            timestamp: 0,
            seq: 0,
            cng: false,
            codec: None,
        }
    }

    /// A frame of linear silence for `ptime_ms`
    pub fn silence(rate: u32, ptime_ms: u32) -> Self {
        let samples = rate / 1000 * ptime_ms;
        let mut frame = Frame::audio(vec![0u8; samples as usize * 2], rate);
        frame.cng = true;
        frame
    }

    pub fn video(data: impl Into<Bytes>) -> Self {
        Self {
            media: MediaType::Video,
            data: data.into(),
            samples: 0,
            rate: 90_000,
            channels: 0,
            timestamp: 0,
            seq: 0,
            cng: false,
            codec: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u32, seq: u16) -> Self {
        self.timestamp = timestamp;
        self.seq = seq;
        self
    }

    pub fn is_audio(&self) -> bool {
        self.media == MediaType::Audio
    }

    pub fn is_video(&self) -> bool {
        self.media == MediaType::Video
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Linear samples of an uncompressed audio frame
    pub fn linear_samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    pub fn from_linear(samples: &[i16], rate: u32) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Frame::audio(data, rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_frame_size() {
        let frame = Frame::silence(8000, 20);
        assert_eq!(frame.samples, 160);
        assert_eq!(frame.len(), 320);
        assert!(frame.cng);
        assert!(frame.is_audio());
    }

    #[test]
    fn test_linear_conversion() {
        let frame = Frame::from_linear(&[1, -1, 300], 8000);
        assert_eq!(frame.samples, 3);
        assert_eq!(frame.linear_samples(), vec![1, -1, 300]);
    }
}
