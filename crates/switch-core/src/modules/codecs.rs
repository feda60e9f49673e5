//! Linear and G.711 codecs
//!
//! G.711 packs each 16-bit linear sample into one byte. PCMU (mu-law) is
//! used in North America and Japan, PCMA (A-law) everywhere else. Both run
//! at 8kHz only.

use crate::errors::{Result, SwitchError};
use crate::interface::{CodecImplementation, CodecInterface, Module, ModuleInterfaces};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// Packetizations offered by every codec here
const PTIMES_MS: [u32; 3] = [20, 10, 30];

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32_635;

fn implementations(iananame: &str, payload: Option<u8>, rates: &[u32], bits_per_sample: u32) -> Vec<CodecImplementation> {
    let mut out = Vec::new();
    for &rate in rates {
        for &ptime_ms in &PTIMES_MS {
            out.push(CodecImplementation {
                iananame: iananame.to_string(),
                payload,
                rate,
                channels: 1,
                ptime_ms,
                bits_per_second: rate * bits_per_sample,
            });
        }
    }
    out
}

/// Uncompressed 16-bit PCM
pub struct LinearCodec;

impl CodecInterface for LinearCodec {
    fn name(&self) -> &str {
        "L16"
    }

    fn implementations(&self) -> Vec<CodecImplementation> {
        implementations("L16", None, &[8000, 16_000, 32_000, 48_000], 16)
    }

    fn encode(&self, _implementation: &CodecImplementation, pcm: &[i16]) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(pcm.len() * 2);
        for sample in pcm {
            out.put_i16_le(*sample);
        }
        Ok(out.freeze())
    }

    fn decode(&self, _implementation: &CodecImplementation, data: &[u8]) -> Result<Vec<i16>> {
        if data.len() % 2 != 0 {
            return Err(SwitchError::Codec(format!("L16 payload of odd length {}", data.len())));
        }
        Ok(data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// G.711 variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// mu-law, static payload type 0
    Pcmu,
    /// A-law, static payload type 8
    Pcma,
}

pub struct G711Codec {
    variant: G711Variant,
}

impl G711Codec {
    pub fn new(variant: G711Variant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> G711Variant {
        self.variant
    }
}

impl CodecInterface for G711Codec {
    fn name(&self) -> &str {
        match self.variant {
            G711Variant::Pcmu => "PCMU",
            G711Variant::Pcma => "PCMA",
        }
    }

    fn implementations(&self) -> Vec<CodecImplementation> {
        let payload = match self.variant {
            G711Variant::Pcmu => 0,
            G711Variant::Pcma => 8,
        };
        implementations(self.name(), Some(payload), &[8000], 8)
    }

    fn encode(&self, _implementation: &CodecImplementation, pcm: &[i16]) -> Result<Bytes> {
        let encode = match self.variant {
            G711Variant::Pcmu => linear_to_ulaw,
            G711Variant::Pcma => linear_to_alaw,
        };
        Ok(pcm.iter().map(|s| encode(*s)).collect::<Vec<u8>>().into())
    }

    fn decode(&self, _implementation: &CodecImplementation, data: &[u8]) -> Result<Vec<i16>> {
        let decode = match self.variant {
            G711Variant::Pcmu => ulaw_to_linear,
            G711Variant::Pcma => alaw_to_linear,
        };
        Ok(data.iter().map(|b| decode(*b)).collect())
    }
}

/// Segment (exponent) of a biased magnitude: position of its highest set bit
/// above bit 7, capped at 7
fn segment(magnitude: i32) -> i32 {
    let mut seg = 0;
    let mut value = magnitude >> 8;
    while value > 0 && seg < 7 {
        seg += 1;
        value >>= 1;
    }
    seg
}

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let sample = i32::from(sample);
    let sign = if sample < 0 { 0x80 } else { 0 };
    let magnitude = sample.abs().min(ULAW_CLIP) + ULAW_BIAS;
    let exponent = segment(magnitude);
    let mantissa = (magnitude >> (exponent + 3)) & 0x0f;
    !(sign | (exponent << 4) | mantissa) as u8
}

pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = i32::from((byte >> 4) & 0x07);
    let mantissa = i32::from(byte & 0x0f);
    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn linear_to_alaw(sample: i16) -> u8 {
    let sample = i32::from(sample);
    let (sign, magnitude) = if sample >= 0 {
        (0x80, sample)
    } else {
        (0x00, (-sample - 1).min(i32::from(i16::MAX)))
    };
    let byte = if magnitude < 256 {
        magnitude >> 4
    } else {
        let exponent = segment(magnitude).min(7);
        let mantissa = (magnitude >> (exponent + 3)) & 0x0f;
        (exponent << 4) | mantissa
    };
    ((byte | sign) ^ 0x55) as u8
}

pub fn alaw_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let exponent = i32::from((byte >> 4) & 0x07);
    let mantissa = i32::from(byte & 0x0f);
    let magnitude = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };
    if byte & 0x80 != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

/// Registers `L16`, `PCMU` and `PCMA`
pub struct CodecModule;

#[async_trait]
impl Module for CodecModule {
    fn name(&self) -> &str {
        "core_codecs"
    }

    async fn load(&self, interfaces: &mut ModuleInterfaces) -> Result<()> {
        interfaces
            .add_codec(Arc::new(LinearCodec))
            .add_codec(Arc::new(G711Codec::new(G711Variant::Pcmu)))
            .add_codec(Arc::new(G711Codec::new(G711Variant::Pcma)));
        Ok(())
    }
}
