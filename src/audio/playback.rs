//! Audio playback: queue → Opus decode → resample → speaker
//!
//! The playback callback pops at most one encoded frame per buffer request
//! and never waits for one to arrive.

use cpal::traits::DeviceTrait;
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::audio::buffer::SharedPlaybackQueue;
use crate::audio::pipeline::PipelineStats;
use crate::audio::resample::resample;
use crate::codec::OpusDecoder;
use crate::constants::CODEC_SAMPLE_RATE;
use crate::error::{AudioError, CodecError};

/// Per-buffer playback processing, independent of the audio host
pub struct PlaybackProcessor {
    device_rate: u32,
    decoder: OpusDecoder,
    queue: SharedPlaybackQueue,
    stats: Arc<PipelineStats>,
}

impl PlaybackProcessor {
    pub fn new(
        device_rate: u32,
        queue: SharedPlaybackQueue,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, CodecError> {
        Ok(Self {
            device_rate,
            decoder: OpusDecoder::voice()?,
            queue,
            stats,
        })
    }

    /// Produce mono samples at the device rate for a request of `frames`.
    ///
    /// Silence is always exactly `frames` long. Decoded audio is returned as
    /// resampled, which can differ from `frames` by a sample or so.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        let Some(encoded) = self.queue.pop() else {
            return vec![0.0; frames];
        };

        let decoded = match self.decoder.decode(&encoded) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::debug!("Decoding failed, playing silence: {}", e);
                return vec![0.0; frames];
            }
        };

        let resampled = resample(&decoded, CODEC_SAMPLE_RATE, self.device_rate);
        if resampled.len() != frames {
            tracing::debug!(
                "Resampled {} samples for a {} frame output buffer",
                resampled.len(),
                frames
            );
        }
        self.stats.record_played();
        resampled
    }

    /// Fill an interleaved output buffer, duplicating mono across channels
    pub fn fill<T>(&mut self, output: &mut [T], channels: usize)
    where
        T: Sample + FromSample<f32>,
    {
        let channels = channels.max(1);
        let mono = self.render(output.len() / channels);

        for (i, frame) in output.chunks_mut(channels).enumerate() {
            let value = match mono.get(i) {
                Some(v) => T::from_sample_(*v),
                None => T::EQUILIBRIUM,
            };
            for sample in frame.iter_mut() {
                *sample = value;
            }
        }
    }
}

/// Build an output stream driven by `make_processor`'s processor.
///
/// A fixed buffer of `frame_size` frames is requested first; hosts that refuse
/// it get the default buffer size.
pub fn build_playback_stream<M>(
    device: &cpal::Device,
    sample_format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    frame_size: usize,
    make_processor: M,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    M: Fn() -> Result<PlaybackProcessor, CodecError>,
{
    match sample_format {
        SampleFormat::F32 => build_typed::<f32, M>(device, channels, sample_rate, frame_size, make_processor, error_tx),
        SampleFormat::I16 => build_typed::<i16, M>(device, channels, sample_rate, frame_size, make_processor, error_tx),
        SampleFormat::U16 => build_typed::<u16, M>(device, channels, sample_rate, frame_size, make_processor, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed<T, M>(
    device: &cpal::Device,
    channels: u16,
    sample_rate: u32,
    frame_size: usize,
    make_processor: M,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
    M: Fn() -> Result<PlaybackProcessor, CodecError>,
{
    let mut last_error = None;
    let channel_count = channels as usize;

    for buffer_size in [cpal::BufferSize::Fixed(frame_size as u32), cpal::BufferSize::Default] {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size,
        };
        let mut processor = make_processor().map_err(|e| AudioError::StreamError(e.to_string()))?;
        let error_tx = error_tx.clone();

        let stream = device.build_output_stream(
            &config,
            move |output: &mut [T], _: &cpal::OutputCallbackInfo| {
                processor.fill(output, channel_count);
            },
            move |err| {
                tracing::error!("Playback stream error: {}", err);
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        );

        match stream {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::warn!("Failed to build playback stream with {:?}: {}", config.buffer_size, e);
                last_error = Some(e);
            }
        }
    }

    Err(AudioError::StreamError(
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}
