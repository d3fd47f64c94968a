//! Audio capture: microphone → resample → Opus → sink
//!
//! The capture callback runs on the host's real-time audio thread. It never
//! blocks: the push-to-talk gate is an atomic, and the sink slot is only
//! probed with `try_read`.

use bytes::Bytes;
use cpal::traits::DeviceTrait;
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::pipeline::PipelineStats;
use crate::audio::resample::{downmix_to_mono, resample};
use crate::codec::OpusEncoder;
use crate::constants::CODEC_SAMPLE_RATE;
use crate::error::{AudioError, CodecError};

/// Receiver of encoded frames produced by capture
pub type EncodedSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Sink slot shared between the pipeline and the capture callback
pub type SharedSink = Arc<RwLock<Option<EncodedSink>>>;

/// Per-buffer capture processing, independent of the audio host
pub struct CaptureProcessor {
    device_rate: u32,
    channels: usize,
    encoder: OpusEncoder,
    /// Resampled samples waiting for a full codec frame
    pending: Vec<f32>,
    ptt: Arc<AtomicBool>,
    sink: SharedSink,
    stats: Arc<PipelineStats>,
}

impl CaptureProcessor {
    pub fn new(
        device_rate: u32,
        channels: u16,
        ptt: Arc<AtomicBool>,
        sink: SharedSink,
        stats: Arc<PipelineStats>,
    ) -> Result<Self, CodecError> {
        let encoder = OpusEncoder::voice()?;
        Ok(Self {
            device_rate,
            channels: channels.max(1) as usize,
            pending: Vec::with_capacity(encoder.frame_size() * 2),
            encoder,
            ptt,
            sink,
            stats,
        })
    }

    /// Handle one interleaved input buffer at the device rate
    pub fn process(&mut self, interleaved: &[f32]) {
        if !self.ptt.load(Ordering::Relaxed) {
            self.pending.clear();
            return;
        }

        let sink = match self.sink.try_read() {
            Some(slot) => slot.clone(),
            None => return,
        };
        let Some(sink) = sink else {
            self.pending.clear();
            return;
        };

        let mono = downmix_to_mono(interleaved, self.channels);
        let resampled = resample(&mono, self.device_rate, CODEC_SAMPLE_RATE);
        if resampled.is_empty() {
            tracing::debug!("Capture buffer resampled to zero samples, skipping");
            return;
        }
        self.pending.extend_from_slice(&resampled);

        let frame_size = self.encoder.frame_size();
        while self.pending.len() >= frame_size {
            let encoded = self.encoder.encode(&self.pending[..frame_size]);
            self.pending.drain(..frame_size);

            match encoded {
                Ok(frame) if !frame.is_empty() => {
                    self.stats.record_encoded();
                    sink(frame);
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Encoding failed: {}", e),
            }
        }
    }
}

/// Build an input stream feeding `make_processor`'s processor.
///
/// A fixed buffer of `frame_size` frames is requested first; hosts that refuse
/// it get the default buffer size.
pub fn build_capture_stream<M>(
    device: &cpal::Device,
    sample_format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    frame_size: usize,
    make_processor: M,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    M: Fn() -> Result<CaptureProcessor, CodecError>,
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
    T: SizedSample,
    f32: FromSample<T>,
    M: Fn() -> Result<CaptureProcessor, CodecError>,
{
    let mut last_error = None;

    for buffer_size in [cpal::BufferSize::Fixed(frame_size as u32), cpal::BufferSize::Default] {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size,
        };
        let mut processor = make_processor().map_err(|e| AudioError::StreamError(e.to_string()))?;
        let mut scratch: Vec<f32> = Vec::new();
        let error_tx = error_tx.clone();

        let stream = device.build_input_stream(
            &config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| <f32 as FromSample<T>>::from_sample_(*s)));
                processor.process(&scratch);
            },
            move |err| {
                tracing::error!("Capture stream error: {}", err);
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        );

        match stream {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::warn!("Failed to build capture stream with {:?}: {}", config.buffer_size, e);
                last_error = Some(e);
            }
        }
    }

    Err(AudioError::StreamError(
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}
