//! Opus decoder wrapper

use opus::{Channels, Decoder};

use crate::constants::CODEC_SAMPLE_RATE;
use crate::error::CodecError;

/// Mono Opus decoder
pub struct OpusDecoder {
    decoder: Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<f32>,
    frames_decoded: u64,
    frames_failed: u64,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // 120ms at 48kHz mono = 5760 samples
        let decode_buffer = vec![0.0f32; 48000 * 120 / 1000];

        Ok(Self {
            decoder,
            decode_buffer,
            frames_decoded: 0,
            frames_failed: 0,
        })
    }

    /// Decoder at the codec rate
    pub fn voice() -> Result<Self, CodecError> {
        Self::new(CODEC_SAMPLE_RATE)
    }

    /// Decode one Opus packet to mono f32 samples
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, CodecError> {
        match self.decoder.decode_float(data, &mut self.decode_buffer, false) {
            Ok(samples) => {
                self.frames_decoded += 1;
                Ok(self.decode_buffer[..samples].to_vec())
            }
            Err(e) => {
                self.frames_failed += 1;
                Err(CodecError::DecodingFailed(e.to_string()))
            }
        }
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_failed: self.frames_failed,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_failed: u64,
}
