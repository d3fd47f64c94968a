//! Opus encoder wrapper
//!
//! Mono voice encoding at the fixed codec rate.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::constants::{CODEC_FRAME_SIZE, CODEC_SAMPLE_RATE, DEFAULT_BITRATE};
use crate::error::CodecError;

/// Opus encoder wrapper with voice settings
pub struct OpusEncoder {
    encoder: Encoder,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a mono VoIP encoder for `frame_size` samples per frame
    pub fn new(sample_rate: u32, frame_size: usize, bitrate: u32) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Max Opus frame is about 1275 bytes
        let encode_buffer = vec![0u8; 4000];

        Ok(Self {
            encoder,
            frame_size,
            encode_buffer,
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Encoder at the codec rate with the default 10 ms frame
    pub fn voice() -> Result<Self, CodecError> {
        Self::new(CODEC_SAMPLE_RATE, CODEC_FRAME_SIZE, DEFAULT_BITRATE)
    }

    /// Encode exactly one frame of mono f32 samples
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    /// Samples per frame
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
